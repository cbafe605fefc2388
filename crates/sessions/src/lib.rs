//! Persistent session storage.
//!
//! [`SessionStore`] is the capability contract; [`SqliteSessionStore`] is
//! the bundled backend: sessions, messages, tool executions, memory
//! snapshots, and an FTS5 full-text index over message content ranked
//! with `bm25()`.

pub mod sqlite;
pub mod store;

pub use sqlite::SqliteSessionStore;
pub use store::{CleanupHook, SearchHit, SessionStore, SoftDeleteStore};
