//! Shared domain types for the Strand agent runtime.
//!
//! Everything here is provider- and storage-agnostic: the message model,
//! the error taxonomy, the configuration surface, cancellation tokens, and
//! the tracer capability. Higher crates (providers, sessions, memory,
//! tools, runtime) all build on these types.

pub mod cancel;
pub mod config;
pub mod error;
pub mod message;
pub mod record;
pub mod tracer;

pub use cancel::{CancelMap, CancelToken};
pub use config::{RetryConfig, RuntimeConfig};
pub use error::{Error, Result};
pub use message::{
    Message, Role, SessionContext, ToolCall, ToolDefinition, ToolErrorInfo, ToolResult,
};
pub use record::{MemorySnapshot, SessionRecord, SessionStats, ToolExecutionRecord};
pub use tracer::{NoopTracer, Tracer};
