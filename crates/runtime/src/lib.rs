//! The agent runtime — ties providers, sessions, memory, and tools into
//! one bounded turn loop.
//!
//! Entry point: [`Agent::chat`] takes a session ID and a user message,
//! drives the LLM/tool loop inside the configured caps, and returns the
//! final assistant response with every tool execution attached.

pub mod agent;
pub mod builtins;
pub mod correction;
pub mod session;
pub mod turn;

pub use agent::{Agent, ChatOptions};
pub use correction::{analyze_error, ErrorAnalysis, GuardrailStore};
pub use session::{LiveSession, SessionManager};
pub use turn::{ChatMetadata, ChatOutcome, ToolExecutionOutcome};
