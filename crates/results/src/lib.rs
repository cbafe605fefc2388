//! Content-addressed storage for large tool results.
//!
//! Big payloads never re-enter the LLM context: tools store them here and
//! hand the model a compact reference. The model inspects results through
//! metadata previews and a read-only SQL / pagination query layer.
//!
//! Two backends implement [`ResultStore`]: an in-memory TTL store (with
//! gzip compression above a threshold) and a SQLite `artifacts` table.
//! Entries expire; a dangling reference surfaces `NotFound` and callers
//! re-issue the owning tool call.

pub mod detect;
pub mod global;
pub mod memory;
pub mod query;
pub mod sqlite;
pub mod store;

pub use detect::{detect_data_type, DataType};
pub use global::global_store;
pub use memory::MemoryResultStore;
pub use sqlite::SqliteResultStore;
pub use store::{LargeResultRef, Location, QueryOutput, QuerySpec, ResultMetadata, ResultStore};
