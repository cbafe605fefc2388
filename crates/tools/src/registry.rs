//! Tool registry — name → tool mapping plus the permission gate.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use strand_domain::error::Result;
use strand_domain::message::ToolDefinition;

use crate::Tool;

/// Optional gate consulted before every execution.
pub trait PermissionChecker: Send + Sync {
    fn check(&self, tool_name: &str, session_id: &str, args: &serde_json::Value) -> Result<()>;
}

/// Thread-safe registry. Lookups are common, mutations are rare.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Idempotent on name: re-registration replaces the
    /// previous entry.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_owned();
        let replaced = self.tools.write().insert(name.clone(), tool).is_some();
        tracing::debug!(tool = %name, replaced, "tool registered");
    }

    /// Remove a tool. Returns true when something was removed.
    pub fn unregister(&self, name: &str) -> bool {
        self.tools.write().remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }

    /// Sorted tool names, for the kernel layer.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Definitions exposed to the LLM, sorted by name for stable output.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let tools = self.tools.read();
        let mut defs: Vec<ToolDefinition> = tools
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_owned(),
                description: tool.description().to_owned(),
                parameters: tool.input_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolContext;
    use strand_domain::error::Result;
    use strand_domain::message::ToolResult;

    struct Echo {
        name: String,
        reply: String,
    }

    #[async_trait::async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            &self.name
        }
        fn description(&self) -> &str {
            "echoes"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _args: &serde_json::Value, _ctx: &ToolContext) -> Result<ToolResult> {
            Ok(ToolResult::ok(serde_json::json!(self.reply)))
        }
    }

    fn echo(name: &str, reply: &str) -> Arc<dyn Tool> {
        Arc::new(Echo {
            name: name.into(),
            reply: reply.into(),
        })
    }

    #[test]
    fn register_is_idempotent_on_name() {
        let registry = ToolRegistry::new();
        registry.register(echo("calc", "v1"));
        registry.register(echo("calc", "v2"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn reregistration_replaces() {
        let registry = ToolRegistry::new();
        registry.register(echo("calc", "v1"));
        registry.register(echo("calc", "v2"));
        let tool = registry.get("calc").unwrap();
        let ctx = ToolContext::new("s1", strand_domain::cancel::CancelToken::new());
        let result = tool.execute(&serde_json::json!({}), &ctx).await.unwrap();
        assert_eq!(result.data, serde_json::json!("v2"));
    }

    #[test]
    fn unregister_removes() {
        let registry = ToolRegistry::new();
        registry.register(echo("calc", "v1"));
        assert!(registry.unregister("calc"));
        assert!(!registry.unregister("calc"));
        assert!(registry.get("calc").is_none());
    }

    #[test]
    fn definitions_are_sorted() {
        let registry = ToolRegistry::new();
        registry.register(echo("zeta", ""));
        registry.register(echo("alpha", ""));
        let defs = registry.definitions();
        assert_eq!(defs[0].name, "alpha");
        assert_eq!(defs[1].name, "zeta");
    }
}
