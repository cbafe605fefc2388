use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Internal tool call format (provider-agnostic).
/// Every adapter converts provider-specific tool calls to/from this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// Tool definition exposed to the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// Structured error attached to a failed tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolErrorInfo {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Outcome of a single tool execution.
///
/// `data` holds either the inline payload or a large-result reference
/// object; callers distinguish by shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolErrorInfo>,
    #[serde(default)]
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ToolResult {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
            execution_time_ms: 0,
            metadata: None,
        }
    }

    pub fn failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: serde_json::Value::Null,
            error: Some(ToolErrorInfo {
                code: code.into(),
                message: message.into(),
                retryable: false,
                suggestion: None,
            }),
            execution_time_ms: 0,
            metadata: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        if let Some(err) = self.error.as_mut() {
            err.suggestion = Some(suggestion.into());
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Where a message sits relative to multi-agent orchestration.
///
/// `Direct` messages never leave their session. `Shared` messages are
/// visible to every child of the owning session. `Coordinator` messages
/// surface only through the orchestrating agent's union view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionContext {
    #[default]
    Direct,
    Coordinator,
    Shared,
}

impl SessionContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionContext::Direct => "direct",
            SessionContext::Coordinator => "coordinator",
            SessionContext::Shared => "shared",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "coordinator" => SessionContext::Coordinator,
            "shared" => SessionContext::Shared,
            _ => SessionContext::Direct,
        }
    }
}

/// A message in the conversation (provider-agnostic).
///
/// Invariants:
/// - an assistant message has non-empty `content` or non-empty
///   `tool_calls` (or both), never neither;
/// - `tool_calls` only appears on assistant messages;
/// - `tool_use_id` + `tool_result` only appear on tool messages, and the
///   tool message immediately follows the assistant that issued the call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,
    #[serde(default)]
    pub session_context: SessionContext,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub token_count: u32,
    #[serde(default)]
    pub cost_usd: f64,
}

// ── Convenience constructors ───────────────────────────────────────

impl Message {
    fn base(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_use_id: None,
            tool_result: None,
            session_context: SessionContext::Direct,
            timestamp: Utc::now(),
            token_count: 0,
            cost_usd: 0.0,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::base(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::base(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::base(Role::Assistant, text)
    }

    pub fn assistant_with_tools(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::base(Role::Assistant, text);
        msg.tool_calls = tool_calls;
        msg
    }

    pub fn tool_result(tool_use_id: impl Into<String>, result: ToolResult) -> Self {
        let content = match &result.data {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => result
                .error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_default(),
            other => other.to_string(),
        };
        let mut msg = Self::base(Role::Tool, content);
        msg.tool_use_id = Some(tool_use_id.into());
        msg.tool_result = Some(result);
        msg
    }

    pub fn with_context(mut self, ctx: SessionContext) -> Self {
        self.session_context = ctx;
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// True when this is an assistant message that satisfies the
    /// content-or-tool-calls invariant.
    pub fn is_well_formed_assistant(&self) -> bool {
        self.role == Role::Assistant && (!self.content.is_empty() || !self.tool_calls.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_with_tools_keeps_calls() {
        let msg = Message::assistant_with_tools(
            "",
            vec![ToolCall {
                id: "c1".into(),
                name: "calculator".into(),
                input: serde_json::json!({"expr": "2+2"}),
            }],
        );
        assert!(msg.has_tool_calls());
        assert!(msg.is_well_formed_assistant());
    }

    #[test]
    fn empty_assistant_is_malformed() {
        let msg = Message::assistant("");
        assert!(!msg.is_well_formed_assistant());
    }

    #[test]
    fn tool_result_content_from_string_data() {
        let msg = Message::tool_result("c1", ToolResult::ok(serde_json::json!("42")));
        assert_eq!(msg.content, "42");
        assert_eq!(msg.tool_use_id.as_deref(), Some("c1"));
    }

    #[test]
    fn tool_result_content_from_error() {
        let msg = Message::tool_result("c1", ToolResult::failed("timeout", "tool timed out"));
        assert_eq!(msg.content, "tool timed out");
        assert!(!msg.tool_result.as_ref().unwrap().success);
    }

    #[test]
    fn session_context_round_trip() {
        for ctx in [
            SessionContext::Direct,
            SessionContext::Coordinator,
            SessionContext::Shared,
        ] {
            assert_eq!(SessionContext::parse(ctx.as_str()), ctx);
        }
        assert_eq!(SessionContext::parse("bogus"), SessionContext::Direct);
    }

    #[test]
    fn serde_skips_empty_tool_calls() {
        let msg = Message::user("hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("tool_calls").is_none());
        assert!(json.get("tool_use_id").is_none());
    }
}
