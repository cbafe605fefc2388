//! LLM provider capability and the layers wrapped around it: per-role
//! dispatch, exponential-backoff retry, and buffered streaming progress.
//!
//! Concrete HTTP adapters live outside the core; the runtime only depends
//! on [`LlmProvider`]. [`scripted::ScriptedProvider`] is the test double
//! used across the workspace.

pub mod progress;
pub mod retry;
pub mod roles;
pub mod scripted;
pub mod traits;

pub use progress::{ProgressCallback, ProgressEvent};
pub use roles::{LlmRole, RoleDispatcher};
pub use traits::{ChatRequest, LlmProvider, LlmResponse, Usage};
