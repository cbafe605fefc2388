//! SQLite-backed result store over the `artifacts` table.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use strand_domain::error::{Error, Result};

use crate::detect::{build_metadata, detect_data_type, DataType};
use crate::query::run_query;
use crate::store::{
    checksum_hex, LargeResultRef, Location, QueryOutput, QuerySpec, ResultMetadata, ResultStore,
};

const DEFAULT_TTL_SECS: i64 = 30 * 60;

pub struct SqliteResultStore {
    conn: Arc<Mutex<Connection>>,
    ttl: Duration,
}

impl SqliteResultStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::Internal(format!("opening artifact db: {e}")))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Internal(format!("opening artifact db: {e}")))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS artifacts (
                id TEXT PRIMARY KEY,
                content_type TEXT NOT NULL,
                data BLOB NOT NULL,
                data_type TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                checksum TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT
            );
            "#,
        )
        .map_err(|e| Error::Internal(format!("artifact schema: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            ttl: Duration::seconds(DEFAULT_TTL_SECS),
        })
    }

    pub fn with_ttl(mut self, ttl_secs: i64) -> Self {
        self.ttl = Duration::seconds(ttl_secs);
        self
    }

    async fn run_blocking<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            f(&mut conn)
        })
        .await
        .map_err(|e| Error::Internal(format!("artifact task failed: {e}")))?
    }

    async fn load_live(&self, id: &str) -> Result<(Vec<u8>, String, DataType)> {
        let id = id.to_owned();
        self.run_blocking(move |conn| {
            let row: Option<(Vec<u8>, String, String, Option<String>)> = conn
                .query_row(
                    "SELECT data, content_type, data_type, expires_at FROM artifacts WHERE id = ?1",
                    [&id],
                    |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
                )
                .optional()
                .map_err(|e| Error::Internal(format!("artifact read: {e}")))?;
            let (data, content_type, data_type, expires_at) =
                row.ok_or_else(|| Error::NotFound(format!("result {id}")))?;
            if let Some(raw) = expires_at {
                let expires: DateTime<Utc> = DateTime::parse_from_rfc3339(&raw)
                    .map(|d| d.with_timezone(&Utc))
                    .map_err(|e| Error::Corrupt(format!("bad expiry on {id}: {e}")))?;
                if Utc::now() > expires {
                    return Err(Error::NotFound(format!("result {id} expired")));
                }
            }
            Ok((data, content_type, DataType::parse(&data_type)))
        })
        .await
    }
}

#[async_trait::async_trait]
impl ResultStore for SqliteResultStore {
    async fn store(
        &self,
        id: &str,
        bytes: &[u8],
        content_type: &str,
        _metadata: Option<serde_json::Value>,
    ) -> Result<LargeResultRef> {
        let data_type = detect_data_type(bytes, content_type);
        let checksum = checksum_hex(bytes);
        let size_bytes = bytes.len();
        let expires_at = (Utc::now() + self.ttl).to_rfc3339();

        let id_owned = id.to_owned();
        let bytes = bytes.to_vec();
        let content_type_owned = content_type.to_owned();
        let checksum_owned = checksum.clone();
        self.run_blocking(move |conn| {
            conn.execute(
                r#"
                INSERT INTO artifacts (id, content_type, data, data_type, size_bytes,
                                       checksum, created_at, expires_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(id) DO UPDATE SET
                    content_type = ?2, data = ?3, data_type = ?4, size_bytes = ?5,
                    checksum = ?6, created_at = ?7, expires_at = ?8
                "#,
                params![
                    &id_owned,
                    &content_type_owned,
                    &bytes,
                    data_type.as_str(),
                    size_bytes as i64,
                    &checksum_owned,
                    Utc::now().to_rfc3339(),
                    expires_at,
                ],
            )
            .map_err(|e| Error::Internal(format!("artifact write: {e}")))?;
            Ok(())
        })
        .await?;

        Ok(LargeResultRef {
            id: id.to_owned(),
            location: Location::Sql,
            content_type: content_type.to_owned(),
            size_bytes,
            checksum,
        })
    }

    async fn metadata(&self, id: &str) -> Result<ResultMetadata> {
        let (bytes, content_type, data_type) = self.load_live(id).await?;
        Ok(build_metadata(id, &bytes, &content_type, data_type))
    }

    async fn query(&self, id: &str, spec: QuerySpec) -> Result<QueryOutput> {
        let (bytes, _, data_type) = self.load_live(id).await?;
        run_query(&bytes, data_type, &spec)
    }

    async fn fetch(&self, id: &str) -> Result<Vec<u8>> {
        Ok(self.load_live(id).await?.0)
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let id = id.to_owned();
        self.run_blocking(move |conn| {
            let deleted = conn
                .execute("DELETE FROM artifacts WHERE id = ?1", [&id])
                .map_err(|e| Error::Internal(format!("artifact delete: {e}")))?;
            if deleted == 0 {
                return Err(Error::NotFound(format!("result {id}")));
            }
            Ok(())
        })
        .await
    }

    async fn sweep_expired(&self) -> Result<usize> {
        self.run_blocking(move |conn| {
            let swept = conn
                .execute(
                    "DELETE FROM artifacts WHERE expires_at IS NOT NULL AND expires_at < ?1",
                    [Utc::now().to_rfc3339()],
                )
                .map_err(|e| Error::Internal(format!("artifact sweep: {e}")))?;
            Ok(swept)
        })
        .await
    }
}
