//! Tool capability, registry, and executor.
//!
//! A tool is anything that exposes a name, a description, a JSON input
//! schema, and an async execute. The executor wraps every call in the
//! same contract: validate input → permission gate → circuit breaker →
//! timeout'd execution → observe.

pub mod breaker;
pub mod executor;
pub mod registry;
pub mod validate;

use once_cell::sync::Lazy;

use strand_domain::cancel::CancelToken;
use strand_domain::error::Result;
use strand_domain::message::ToolResult;

pub use breaker::CircuitBreaker;
pub use executor::ToolExecutor;
pub use registry::{PermissionChecker, ToolRegistry};

/// Per-call context handed to every tool execution.
#[derive(Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub cancel: CancelToken,
}

impl ToolContext {
    pub fn new(session_id: impl Into<String>, cancel: CancelToken) -> Self {
        Self {
            session_id: session_id.into(),
            cancel,
        }
    }
}

/// Capability every tool must expose.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the tool's parameters.
    fn input_schema(&self) -> serde_json::Value;
    /// Optional backend tag (e.g. "mcp", "http"). Empty when local.
    fn backend(&self) -> &str {
        ""
    }
    async fn execute(&self, args: &serde_json::Value, ctx: &ToolContext) -> Result<ToolResult>;
}

/// Tool names present in every fresh agent. This and the global result
/// store are the only process-wide state in the core.
pub static BUILTIN_TOOL_NAMES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "get_tool_result",
        "query_tool_result",
        "recall_conversation",
        "clear_recalled_context",
        "search_conversation",
    ]
});

/// Built-ins that embedders may register explicitly; their availability
/// is a configuration concern, not the core's.
pub static OPTIONAL_BUILTIN_NAMES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "file_write",
        "http_request",
        "shell_execute",
        "workspace",
        "tool_search",
        "session_memory",
    ]
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_name_sets_are_disjoint() {
        for name in BUILTIN_TOOL_NAMES.iter() {
            assert!(!OPTIONAL_BUILTIN_NAMES.contains(name));
        }
    }
}
