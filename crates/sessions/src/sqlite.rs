//! SQLite-backed session store.
//!
//! One bundled connection behind a mutex; every operation runs on the
//! blocking pool via `spawn_blocking`. Message content is mirrored into
//! an FTS5 table so full-text search ranks with `bm25()`. Cleanup hooks
//! fire after a delete commits, with the connection lock released.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use strand_domain::error::{Error, Result};
use strand_domain::message::{Message, Role, SessionContext, ToolResult};
use strand_domain::record::{MemorySnapshot, SessionRecord, SessionStats, ToolExecutionRecord};

use crate::store::{CleanupHook, SearchHit, SessionStore, SoftDeleteStore};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SqliteSessionStore {
    conn: Arc<Mutex<Connection>>,
    hooks: Mutex<Vec<CleanupHook>>,
}

impl SqliteSessionStore {
    /// Open (or create) the store at `path` and run schema setup +
    /// migration.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::Internal(format!("opening session db: {e}")))?;
        Self::from_connection(conn)
    }

    /// In-memory store, used by tests and ephemeral deployments.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Internal(format!("opening session db: {e}")))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute("PRAGMA foreign_keys = ON", [])
            .map_err(db_err)?;
        init_schema(&conn)?;
        migrate_schema(&conn)?;
        tracing::info!("session store ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            hooks: Mutex::new(Vec::new()),
        })
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
        .map_err(|e| Error::Internal(format!("store task failed: {e}")))?
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Schema
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            agent_id TEXT,
            parent_session_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            total_cost_usd REAL NOT NULL DEFAULT 0,
            total_input_tokens INTEGER NOT NULL DEFAULT 0,
            total_output_tokens INTEGER NOT NULL DEFAULT 0,
            deleted_at TEXT
        );

        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            tool_calls TEXT,
            tool_use_id TEXT,
            tool_result TEXT,
            session_context TEXT NOT NULL DEFAULT 'direct',
            timestamp TEXT NOT NULL,
            token_count INTEGER NOT NULL DEFAULT 0,
            cost_usd REAL NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS tool_executions (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            tool_name TEXT NOT NULL,
            input TEXT NOT NULL,
            result TEXT,
            error TEXT,
            duration_ms INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS memory_snapshots (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            snapshot_type TEXT NOT NULL,
            content TEXT NOT NULL,
            token_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

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

        CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id);
        CREATE INDEX IF NOT EXISTS idx_messages_session_ts ON messages(session_id, timestamp);
        CREATE INDEX IF NOT EXISTS idx_sessions_agent ON sessions(agent_id);
        CREATE INDEX IF NOT EXISTS idx_sessions_parent ON sessions(parent_session_id);
        CREATE INDEX IF NOT EXISTS idx_snapshots_session ON memory_snapshots(session_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_tool_exec_session ON tool_executions(session_id);

        CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts USING fts5(
            content,
            session_id UNINDEXED,
            message_id UNINDEXED
        );
        "#,
    )
    .map_err(db_err)
}

/// Add optional columns introduced after the initial schema. Safe to run
/// on every startup: columns that already exist are skipped.
fn migrate_schema(conn: &Connection) -> Result<()> {
    add_column_if_missing(conn, "sessions", "deleted_at", "TEXT")?;
    add_column_if_missing(conn, "messages", "session_context", "TEXT NOT NULL DEFAULT 'direct'")?;
    add_column_if_missing(conn, "messages", "cost_usd", "REAL NOT NULL DEFAULT 0")?;
    add_column_if_missing(conn, "tool_executions", "error", "TEXT")?;
    Ok(())
}

fn add_column_if_missing(conn: &Connection, table: &str, column: &str, decl: &str) -> Result<()> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .map_err(db_err)?;
    let exists = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(db_err)?
        .filter_map(|r| r.ok())
        .any(|name| name == column);
    if !exists {
        conn.execute(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"), [])
            .map_err(db_err)?;
        tracing::info!(table, column, "schema migrated");
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Row mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const MESSAGE_COLUMNS: &str = "id, session_id, role, content, tool_calls, tool_use_id, \
     tool_result, session_context, timestamp, token_count, cost_usd";

fn db_err(e: rusqlite::Error) -> Error {
    match &e {
        rusqlite::Error::QueryReturnedNoRows => Error::NotFound("row".into()),
        rusqlite::Error::SqliteFailure(code, _)
            if code.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Error::Conflict(e.to_string())
        }
        _ => Error::Internal(format!("sqlite: {e}")),
    }
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| Error::Corrupt(format!("bad timestamp {raw:?}: {e}")))
}

fn parse_role(raw: &str) -> Result<Role> {
    match raw {
        "system" => Ok(Role::System),
        "user" => Ok(Role::User),
        "assistant" => Ok(Role::Assistant),
        "tool" => Ok(Role::Tool),
        other => Err(Error::Corrupt(format!("unknown role {other:?}"))),
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, RawMessage)> {
    Ok((
        row.get(0)?,
        RawMessage {
            role: row.get(2)?,
            content: row.get(3)?,
            tool_calls: row.get(4)?,
            tool_use_id: row.get(5)?,
            tool_result: row.get(6)?,
            session_context: row.get(7)?,
            timestamp: row.get(8)?,
            token_count: row.get(9)?,
            cost_usd: row.get(10)?,
        },
    ))
}

/// Columns as stored, before JSON/timestamp decoding.
struct RawMessage {
    role: String,
    content: String,
    tool_calls: Option<String>,
    tool_use_id: Option<String>,
    tool_result: Option<String>,
    session_context: String,
    timestamp: String,
    token_count: u32,
    cost_usd: f64,
}

fn decode_message(raw: RawMessage) -> Result<Message> {
    let tool_calls = match raw.tool_calls {
        Some(json) => serde_json::from_str(&json)
            .map_err(|e| Error::Corrupt(format!("bad tool_calls: {e}")))?,
        None => Vec::new(),
    };
    let tool_result: Option<ToolResult> = match raw.tool_result {
        Some(json) => Some(
            serde_json::from_str(&json)
                .map_err(|e| Error::Corrupt(format!("bad tool_result: {e}")))?,
        ),
        None => None,
    };
    Ok(Message {
        role: parse_role(&raw.role)?,
        content: raw.content,
        tool_calls,
        tool_use_id: raw.tool_use_id,
        tool_result,
        session_context: SessionContext::parse(&raw.session_context),
        timestamp: parse_ts(&raw.timestamp)?,
        token_count: raw.token_count,
        cost_usd: raw.cost_usd,
    })
}

fn insert_message(conn: &Connection, session_id: &str, msg: &Message) -> Result<()> {
    let tool_calls = if msg.tool_calls.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&msg.tool_calls)?)
    };
    let tool_result = match &msg.tool_result {
        Some(r) => Some(serde_json::to_string(r)?),
        None => None,
    };
    conn.execute(
        r#"
        INSERT INTO messages (session_id, role, content, tool_calls, tool_use_id,
                              tool_result, session_context, timestamp, token_count, cost_usd)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
        params![
            session_id,
            role_str(msg.role),
            &msg.content,
            tool_calls,
            &msg.tool_use_id,
            tool_result,
            msg.session_context.as_str(),
            msg.timestamp.to_rfc3339(),
            msg.token_count,
            msg.cost_usd,
        ],
    )
    .map_err(db_err)?;

    let message_id = conn.last_insert_rowid();
    conn.execute(
        "INSERT INTO messages_fts (content, session_id, message_id) VALUES (?1, ?2, ?3)",
        params![&msg.content, session_id, message_id],
    )
    .map_err(db_err)?;
    Ok(())
}

fn query_messages(conn: &Connection, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(sql).map_err(db_err)?;
    let rows = stmt
        .query_map(params, row_to_message)
        .map_err(db_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err)?;
    rows.into_iter().map(|(_, raw)| decode_message(raw)).collect()
}

fn session_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(SessionRecord, String, String)> {
    Ok((
        SessionRecord {
            id: row.get(0)?,
            agent_id: row.get(1)?,
            parent_session_id: row.get(2)?,
            created_at: Utc::now(), // replaced after timestamp decode
            updated_at: Utc::now(),
            total_cost_usd: row.get(5)?,
            total_input_tokens: row.get::<_, i64>(6)? as u64,
            total_output_tokens: row.get::<_, i64>(7)? as u64,
        },
        row.get(3)?,
        row.get(4)?,
    ))
}

fn decode_session(parts: (SessionRecord, String, String)) -> Result<SessionRecord> {
    let (mut rec, created, updated) = parts;
    rec.created_at = parse_ts(&created)?;
    rec.updated_at = parse_ts(&updated)?;
    Ok(rec)
}

const SESSION_COLUMNS: &str = "id, agent_id, parent_session_id, created_at, updated_at, \
     total_cost_usd, total_input_tokens, total_output_tokens";

/// Build an FTS5 MATCH expression: terms OR'd, each quoted so query
/// syntax characters are treated literally.
fn fts_match_expr(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SessionStore impl
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl SessionStore for SqliteSessionStore {
    async fn save_session(&self, session: &SessionRecord) -> Result<()> {
        let session = session.clone();
        self.run_blocking(move |conn| {
            if let Some(parent) = &session.parent_session_id {
                let exists: Option<i64> = conn
                    .query_row("SELECT 1 FROM sessions WHERE id = ?1", [parent], |r| r.get(0))
                    .optional()
                    .map_err(db_err)?;
                if exists.is_none() {
                    return Err(Error::InvalidInput(format!(
                        "parent session {parent} does not exist"
                    )));
                }
            }
            conn.execute(
                r#"
                INSERT INTO sessions (id, agent_id, parent_session_id, created_at, updated_at,
                                      total_cost_usd, total_input_tokens, total_output_tokens)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(id) DO UPDATE SET
                    agent_id = ?2,
                    parent_session_id = ?3,
                    updated_at = ?5,
                    total_cost_usd = ?6,
                    total_input_tokens = ?7,
                    total_output_tokens = ?8
                "#,
                params![
                    &session.id,
                    &session.agent_id,
                    &session.parent_session_id,
                    session.created_at.to_rfc3339(),
                    session.updated_at.to_rfc3339(),
                    session.total_cost_usd,
                    session.total_input_tokens as i64,
                    session.total_output_tokens as i64,
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn load_session(&self, id: &str) -> Result<(SessionRecord, Vec<Message>)> {
        let id = id.to_owned();
        self.run_blocking(move |conn| {
            let parts = conn
                .query_row(
                    &format!(
                        "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1 AND deleted_at IS NULL"
                    ),
                    [&id],
                    session_from_row,
                )
                .optional()
                .map_err(db_err)?
                .ok_or_else(|| Error::NotFound(format!("session {id}")))?;
            let record = decode_session(parts)?;
            let messages = query_messages(
                conn,
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages WHERE session_id = ?1 ORDER BY id"
                ),
                params![&id],
            )?;
            Ok((record, messages))
        })
        .await
    }

    async fn save_message(&self, session_id: &str, message: &Message) -> Result<()> {
        let session_id = session_id.to_owned();
        let message = message.clone();
        self.run_blocking(move |conn| insert_message(conn, &session_id, &message))
            .await
    }

    async fn save_turn(
        &self,
        session_id: &str,
        assistant: &Message,
        tool_results: &[Message],
    ) -> Result<()> {
        // The pairing invariant is checked before anything touches disk.
        let call_ids: Vec<&str> = assistant.tool_calls.iter().map(|c| c.id.as_str()).collect();
        let mut consumed: Vec<&str> = Vec::new();
        for result in tool_results {
            match result.tool_use_id.as_deref() {
                Some(id) if call_ids.contains(&id) && !consumed.contains(&id) => consumed.push(id),
                Some(id) => {
                    return Err(Error::InvalidInput(format!(
                        "tool result {id} does not match an open tool call"
                    )))
                }
                None => {
                    return Err(Error::InvalidInput(
                        "tool result message without tool_use_id".into(),
                    ))
                }
            }
        }
        if consumed.len() != call_ids.len() {
            return Err(Error::InvalidInput(format!(
                "assistant issued {} tool calls but {} results were provided",
                call_ids.len(),
                consumed.len()
            )));
        }

        let session_id = session_id.to_owned();
        let assistant = assistant.clone();
        let tool_results = tool_results.to_vec();
        self.run_blocking(move |conn| {
            let tx = conn.transaction().map_err(db_err)?;
            insert_message(&tx, &session_id, &assistant)?;
            for result in &tool_results {
                insert_message(&tx, &session_id, result)?;
            }
            tx.commit().map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn load_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let session_id = session_id.to_owned();
        self.run_blocking(move |conn| {
            query_messages(
                conn,
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages WHERE session_id = ?1 ORDER BY id"
                ),
                params![&session_id],
            )
        })
        .await
    }

    async fn load_messages_for_agent(&self, agent_id: &str) -> Result<Vec<Message>> {
        let agent_id = agent_id.to_owned();
        self.run_blocking(move |conn| {
            query_messages(
                conn,
                &format!(
                    r#"
                    SELECT {MESSAGE_COLUMNS} FROM messages
                    WHERE session_id IN (SELECT id FROM sessions WHERE agent_id = ?1)
                       OR (session_id IN (
                               SELECT parent_session_id FROM sessions
                               WHERE agent_id = ?1 AND parent_session_id IS NOT NULL)
                           AND session_context IN ('coordinator', 'shared'))
                    ORDER BY id
                    "#
                ),
                params![&agent_id],
            )
        })
        .await
    }

    async fn load_messages_from_parent_session(&self, session_id: &str) -> Result<Vec<Message>> {
        let session_id = session_id.to_owned();
        self.run_blocking(move |conn| {
            let parent: Option<String> = conn
                .query_row(
                    "SELECT parent_session_id FROM sessions WHERE id = ?1",
                    [&session_id],
                    |r| r.get(0),
                )
                .optional()
                .map_err(db_err)?
                .ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;
            let Some(parent) = parent else {
                return Ok(Vec::new());
            };
            query_messages(
                conn,
                &format!(
                    r#"
                    SELECT {MESSAGE_COLUMNS} FROM messages
                    WHERE session_id = ?1 AND session_context IN ('shared', 'coordinator')
                    ORDER BY id
                    "#
                ),
                params![&parent],
            )
        })
        .await
    }

    async fn save_tool_execution(&self, record: &ToolExecutionRecord) -> Result<()> {
        let record = record.clone();
        self.run_blocking(move |conn| {
            conn.execute(
                r#"
                INSERT INTO tool_executions (id, session_id, tool_name, input, result, error,
                                             duration_ms, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    &record.id,
                    &record.session_id,
                    &record.tool_name,
                    serde_json::to_string(&record.input)?,
                    record
                        .result
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    &record.error,
                    record.duration_ms as i64,
                    record.created_at.to_rfc3339(),
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn save_memory_snapshot(&self, snapshot: &MemorySnapshot) -> Result<()> {
        let snapshot = snapshot.clone();
        self.run_blocking(move |conn| {
            conn.execute(
                r#"
                INSERT INTO memory_snapshots (id, session_id, snapshot_type, content,
                                              token_count, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    &snapshot.id,
                    &snapshot.session_id,
                    &snapshot.snapshot_type,
                    &snapshot.content,
                    snapshot.token_count,
                    snapshot.created_at.to_rfc3339(),
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn load_memory_snapshots(&self, session_id: &str) -> Result<Vec<MemorySnapshot>> {
        let session_id = session_id.to_owned();
        self.run_blocking(move |conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT id, session_id, snapshot_type, content, token_count, created_at
                    FROM memory_snapshots
                    WHERE session_id = ?1
                    ORDER BY created_at
                    "#,
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map([&session_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, u32>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                })
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            rows.into_iter()
                .map(|(id, session_id, snapshot_type, content, token_count, created)| {
                    Ok(MemorySnapshot {
                        id,
                        session_id,
                        snapshot_type,
                        content,
                        token_count,
                        created_at: parse_ts(&created)?,
                    })
                })
                .collect()
        })
        .await
    }

    async fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        self.run_blocking(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions WHERE deleted_at IS NULL \
                     ORDER BY created_at"
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], session_from_row)
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            rows.into_iter().map(decode_session).collect()
        })
        .await
    }

    async fn delete_session(&self, id: &str) -> Result<()> {
        let session_id = id.to_owned();
        self.run_blocking(move |conn| {
            let tx = conn.transaction().map_err(db_err)?;
            tx.execute("DELETE FROM messages_fts WHERE session_id = ?1", [&session_id])
                .map_err(db_err)?;
            tx.execute("DELETE FROM messages WHERE session_id = ?1", [&session_id])
                .map_err(db_err)?;
            tx.execute("DELETE FROM tool_executions WHERE session_id = ?1", [&session_id])
                .map_err(db_err)?;
            tx.execute("DELETE FROM memory_snapshots WHERE session_id = ?1", [&session_id])
                .map_err(db_err)?;
            let deleted = tx
                .execute("DELETE FROM sessions WHERE id = ?1", [&session_id])
                .map_err(db_err)?;
            if deleted == 0 {
                return Err(Error::NotFound(format!("session {session_id}")));
            }
            tx.commit().map_err(db_err)?;
            Ok(())
        })
        .await?;

        // The delete has committed and the connection lock is released;
        // hooks run last and exactly once.
        let hooks: Vec<CleanupHook> = self.hooks.lock().clone();
        for hook in hooks {
            hook(id);
        }
        Ok(())
    }

    async fn record_usage(
        &self,
        session_id: &str,
        input_tokens: u64,
        output_tokens: u64,
        cost_usd: f64,
    ) -> Result<()> {
        let session_id = session_id.to_owned();
        self.run_blocking(move |conn| {
            let changed = conn
                .execute(
                    r#"
                    UPDATE sessions SET
                        total_input_tokens = total_input_tokens + ?2,
                        total_output_tokens = total_output_tokens + ?3,
                        total_cost_usd = total_cost_usd + ?4,
                        updated_at = ?5
                    WHERE id = ?1
                    "#,
                    params![
                        &session_id,
                        input_tokens as i64,
                        output_tokens as i64,
                        cost_usd,
                        Utc::now().to_rfc3339(),
                    ],
                )
                .map_err(db_err)?;
            if changed == 0 {
                return Err(Error::NotFound(format!("session {session_id}")));
            }
            Ok(())
        })
        .await
    }

    async fn search_full_text(
        &self,
        session_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let Some(match_expr) = fts_match_expr(query) else {
            return Ok(Vec::new());
        };
        let session_id = session_id.to_owned();
        self.run_blocking(move |conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT messages_fts.session_id, messages_fts.message_id,
                           m.role, m.content, bm25(messages_fts) AS score
                    FROM messages_fts
                    JOIN messages m ON m.id = messages_fts.message_id
                    WHERE messages_fts MATCH ?1 AND messages_fts.session_id = ?2
                    ORDER BY score
                    LIMIT ?3
                    "#,
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![&match_expr, &session_id, limit as i64], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, f64>(4)?,
                    ))
                })
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            rows.into_iter()
                .map(|(session_id, sequence, role, content, score)| {
                    Ok(SearchHit {
                        session_id,
                        sequence,
                        role: parse_role(&role)?,
                        content,
                        score,
                    })
                })
                .collect()
        })
        .await
    }

    async fn get_stats(&self) -> Result<SessionStats> {
        self.run_blocking(move |conn| {
            let count = |sql: &str| -> Result<u64> {
                conn.query_row(sql, [], |r| r.get::<_, i64>(0))
                    .map(|n| n as u64)
                    .map_err(db_err)
            };
            Ok(SessionStats {
                session_count: count("SELECT COUNT(*) FROM sessions WHERE deleted_at IS NULL")?,
                message_count: count("SELECT COUNT(*) FROM messages")?,
                tool_execution_count: count("SELECT COUNT(*) FROM tool_executions")?,
                snapshot_count: count("SELECT COUNT(*) FROM memory_snapshots")?,
            })
        })
        .await
    }

    fn register_cleanup_hook(&self, hook: CleanupHook) {
        self.hooks.lock().push(hook);
    }

    fn as_soft_delete(&self) -> Option<&dyn SoftDeleteStore> {
        Some(self)
    }
}

#[async_trait::async_trait]
impl SoftDeleteStore for SqliteSessionStore {
    async fn soft_delete_session(&self, id: &str) -> Result<()> {
        let session_id = id.to_owned();
        self.run_blocking(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE sessions SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
                    params![&session_id, Utc::now().to_rfc3339()],
                )
                .map_err(db_err)?;
            if changed == 0 {
                return Err(Error::NotFound(format!("session {session_id}")));
            }
            Ok(())
        })
        .await
    }
}
