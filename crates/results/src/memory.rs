//! In-memory result store with TTL and threshold gzip compression.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::RwLock;

use strand_domain::error::{Error, Result};

use crate::detect::{build_metadata, detect_data_type, DataType};
use crate::query::run_query;
use crate::store::{
    checksum_hex, LargeResultRef, Location, QueryOutput, QuerySpec, ResultMetadata, ResultStore,
};

/// Entries older than this are eligible for eviction.
const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);
/// Payloads at or above this size are gzip-compressed at rest.
const DEFAULT_COMPRESS_THRESHOLD: usize = 64 * 1024;

struct Entry {
    data: Vec<u8>,
    compressed: bool,
    content_type: String,
    data_type: DataType,
    size_bytes: usize,
    checksum: String,
    stored_at: Instant,
}

pub struct MemoryResultStore {
    entries: RwLock<HashMap<String, Entry>>,
    ttl: Duration,
    compress_threshold: usize,
}

impl Default for MemoryResultStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_TTL, DEFAULT_COMPRESS_THRESHOLD)
    }

    pub fn with_limits(ttl: Duration, compress_threshold: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            compress_threshold,
        }
    }

    fn payload(&self, id: &str) -> Result<(Vec<u8>, DataType)> {
        let entries = self.entries.read();
        let entry = entries
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("result {id}")))?;
        if entry.stored_at.elapsed() > self.ttl {
            return Err(Error::NotFound(format!("result {id} expired")));
        }
        let bytes = if entry.compressed {
            let mut decoder = GzDecoder::new(entry.data.as_slice());
            let mut out = Vec::with_capacity(entry.size_bytes);
            decoder
                .read_to_end(&mut out)
                .map_err(|e| Error::Corrupt(format!("decompressing result {id}: {e}")))?;
            out
        } else {
            entry.data.clone()
        };
        Ok((bytes, entry.data_type))
    }
}

#[async_trait::async_trait]
impl ResultStore for MemoryResultStore {
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

        let (data, compressed) = if size_bytes >= self.compress_threshold {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
            encoder
                .write_all(bytes)
                .and_then(|_| encoder.finish())
                .map(|out| (out, true))
                .map_err(|e| Error::Internal(format!("compressing result {id}: {e}")))?
        } else {
            (bytes.to_vec(), false)
        };

        tracing::debug!(
            id,
            size_bytes,
            compressed,
            data_type = data_type.as_str(),
            "large result stored"
        );
        self.entries.write().insert(
            id.to_owned(),
            Entry {
                data,
                compressed,
                content_type: content_type.to_owned(),
                data_type,
                size_bytes,
                checksum: checksum.clone(),
                stored_at: Instant::now(),
            },
        );

        Ok(LargeResultRef {
            id: id.to_owned(),
            location: Location::Memory,
            content_type: content_type.to_owned(),
            size_bytes,
            checksum,
        })
    }

    async fn metadata(&self, id: &str) -> Result<ResultMetadata> {
        let content_type = {
            let entries = self.entries.read();
            entries
                .get(id)
                .map(|e| e.content_type.clone())
                .ok_or_else(|| Error::NotFound(format!("result {id}")))?
        };
        let (bytes, data_type) = self.payload(id)?;
        Ok(build_metadata(id, &bytes, &content_type, data_type))
    }

    async fn query(&self, id: &str, spec: QuerySpec) -> Result<QueryOutput> {
        let (bytes, data_type) = self.payload(id)?;
        run_query(&bytes, data_type, &spec)
    }

    async fn fetch(&self, id: &str) -> Result<Vec<u8>> {
        Ok(self.payload(id)?.0)
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.entries
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("result {id}")))
    }

    async fn sweep_expired(&self) -> Result<usize> {
        let ttl = self.ttl;
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.stored_at.elapsed() <= ttl);
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn store_and_fetch_round_trip() {
        let store = MemoryResultStore::new();
        let payload = serde_json::to_vec(&json!([{"a": 1}, {"a": 2}])).unwrap();
        let reference = store
            .store("r1", &payload, "application/json", None)
            .await
            .unwrap();
        assert_eq!(reference.location, Location::Memory);
        assert_eq!(reference.size_bytes, payload.len());
        assert_eq!(store.fetch("r1").await.unwrap(), payload);
    }

    #[tokio::test]
    async fn large_payload_is_compressed_transparently() {
        let store = MemoryResultStore::with_limits(DEFAULT_TTL, 1024);
        let text = "row after row of data, ".repeat(200);
        store
            .store("big", text.as_bytes(), "text/plain", None)
            .await
            .unwrap();
        // Stored compressed, fetched identical.
        assert!(store.entries.read().get("big").unwrap().compressed);
        assert_eq!(store.fetch("big").await.unwrap(), text.as_bytes());
    }

    #[tokio::test]
    async fn expired_entries_are_not_found() {
        let store = MemoryResultStore::with_limits(Duration::from_millis(0), usize::MAX);
        store.store("r1", b"[1]", "application/json", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(matches!(store.fetch("r1").await, Err(Error::NotFound(_))));
        assert_eq!(store.sweep_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn metadata_never_contains_full_payload() {
        let store = MemoryResultStore::new();
        let elements: Vec<_> = (0..1000).map(|i| json!({"n": i, "name": format!("user-{i}")})).collect();
        let payload = serde_json::to_vec(&elements).unwrap();
        store
            .store("r1", &payload, "application/json", None)
            .await
            .unwrap();

        let meta = store.metadata("r1").await.unwrap();
        assert_eq!(meta.data_type, DataType::JsonArray);
        let serialized = serde_json::to_vec(&meta).unwrap();
        assert!(serialized.len() <= payload.len() / 10);
    }

    #[tokio::test]
    async fn query_runs_against_stored_payload() {
        let store = MemoryResultStore::new();
        let elements: Vec<_> = (0..20).map(|i| json!({"n": i})).collect();
        store
            .store("r1", &serde_json::to_vec(&elements).unwrap(), "application/json", None)
            .await
            .unwrap();

        let out = store
            .query(
                "r1",
                QuerySpec::Sql("SELECT n FROM results WHERE CAST(n AS INTEGER) >= 18".into()),
            )
            .await
            .unwrap();
        assert_eq!(out.row_count, 2);
    }

    #[tokio::test]
    async fn store_replaces_existing_entry() {
        let store = MemoryResultStore::new();
        store.store("r1", b"old", "text/plain", None).await.unwrap();
        store.store("r1", b"new", "text/plain", None).await.unwrap();
        assert_eq!(store.fetch("r1").await.unwrap(), b"new");
    }
}
