//! The five built-in tools present in every fresh agent.
//!
//! `get_tool_result` / `query_tool_result` implement progressive
//! disclosure over the large-result store; the other three operate on
//! the session's segmented memory.

use std::sync::Arc;

use serde_json::{json, Value};

use strand_domain::error::{Error, Result};
use strand_domain::message::ToolResult;
use strand_results::{QuerySpec, ResultStore};
use strand_tools::{Tool, ToolContext, ToolRegistry};

use crate::session::SessionManager;

/// Register the always-present built-ins into a registry.
pub fn register_builtins(
    registry: &ToolRegistry,
    sessions: Arc<SessionManager>,
    results: Arc<dyn ResultStore>,
) {
    registry.register(Arc::new(GetToolResult {
        results: results.clone(),
    }));
    registry.register(Arc::new(QueryToolResult { results }));
    registry.register(Arc::new(RecallConversation {
        sessions: sessions.clone(),
    }));
    registry.register(Arc::new(ClearRecalledContext {
        sessions: sessions.clone(),
    }));
    registry.register(Arc::new(SearchConversation { sessions }));
    debug_assert!(strand_tools::BUILTIN_TOOL_NAMES
        .iter()
        .all(|name| registry.contains(name)));
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidInput(format!("missing string argument {key:?}")))
}

/// Fold a domain error into a failed tool result so the model sees it
/// in the transcript instead of the turn aborting.
fn fold_err(e: Error) -> ToolResult {
    match &e {
        Error::NotFound(_) => ToolResult::failed("not_found", e.to_string())
            .with_suggestion("the reference may have expired; re-issue the producing tool call"),
        Error::InvalidInput(_) => ToolResult::failed("invalid_input", e.to_string()),
        Error::BudgetExceeded { .. } => ToolResult::failed("budget_exceeded", e.to_string())
            .with_suggestion("clear recalled context or recall fewer messages"),
        _ => ToolResult::failed("execution_error", e.to_string()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// get_tool_result
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct GetToolResult {
    results: Arc<dyn ResultStore>,
}

#[async_trait::async_trait]
impl Tool for GetToolResult {
    fn name(&self) -> &str {
        "get_tool_result"
    }

    fn description(&self) -> &str {
        "Inspect a stored large tool result: returns metadata, schema info, and a \
         bounded preview. Never returns the full payload."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "reference_id": { "type": "string", "description": "Reference ID from a previous tool result" }
            },
            "required": ["reference_id"]
        })
    }

    async fn execute(&self, args: &Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let reference_id = match str_arg(args, "reference_id") {
            Ok(id) => id,
            Err(e) => return Ok(fold_err(e)),
        };
        match self.results.metadata(reference_id).await {
            Ok(metadata) => Ok(ToolResult::ok(serde_json::to_value(metadata)?)),
            Err(e) => Ok(fold_err(e)),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// query_tool_result
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct QueryToolResult {
    results: Arc<dyn ResultStore>,
}

#[async_trait::async_trait]
impl Tool for QueryToolResult {
    fn name(&self) -> &str {
        "query_tool_result"
    }

    fn description(&self) -> &str {
        "Query a stored large tool result: read-only SQL over the synthetic table \
         'results' for json_array/csv data, or offset/limit pagination."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "reference_id": { "type": "string", "description": "Reference ID from a previous tool result" },
                "sql": { "type": "string", "description": "Read-only SELECT over the 'results' table" },
                "offset": { "type": "integer", "description": "Pagination offset (elements/rows/chars)" },
                "limit": { "type": "integer", "description": "Pagination limit" }
            },
            "required": ["reference_id"]
        })
    }

    async fn execute(&self, args: &Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let reference_id = match str_arg(args, "reference_id") {
            Ok(id) => id,
            Err(e) => return Ok(fold_err(e)),
        };
        let spec = if let Some(sql) = args.get("sql").and_then(Value::as_str) {
            QuerySpec::Sql(sql.to_owned())
        } else {
            QuerySpec::Page {
                offset: args.get("offset").and_then(Value::as_u64).unwrap_or(0) as usize,
                limit: args.get("limit").and_then(Value::as_u64).unwrap_or(100) as usize,
            }
        };
        match self.results.query(reference_id, spec).await {
            Ok(output) => Ok(ToolResult::ok(serde_json::to_value(output)?)),
            Err(e) => Ok(fold_err(e)),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// recall_conversation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct RecallConversation {
    sessions: Arc<SessionManager>,
}

#[async_trait::async_trait]
impl Tool for RecallConversation {
    fn name(&self) -> &str {
        "recall_conversation"
    }

    fn description(&self) -> &str {
        "Search older conversation history in swap and promote the best matches \
         back into the active context window."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "What to look for" },
                "limit": { "type": "integer", "description": "Max messages to promote (default 5)" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult> {
        let query = match str_arg(args, "query") {
            Ok(q) => q,
            Err(e) => return Ok(fold_err(e)),
        };
        let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(5) as usize;
        // Search first (may call the reranker LLM), then lock the
        // session only for the promotion.
        let hits = match self.sessions.search_session(&ctx.session_id, query, limit).await {
            Ok(hits) => hits,
            Err(e) => return Ok(fold_err(e)),
        };
        let Some(live) = self.sessions.get_live(&ctx.session_id) else {
            return Ok(fold_err(Error::NotFound(format!(
                "session {}",
                ctx.session_id
            ))));
        };
        let promoted = {
            let mut live = live.lock().await;
            live.memory.promote_search_hits(&hits)
        };
        match promoted {
            Ok(promoted) => Ok(ToolResult::ok(json!({ "promoted_messages": promoted }))),
            Err(e) => Ok(fold_err(e)),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// clear_recalled_context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ClearRecalledContext {
    sessions: Arc<SessionManager>,
}

#[async_trait::async_trait]
impl Tool for ClearRecalledContext {
    fn name(&self) -> &str {
        "clear_recalled_context"
    }

    fn description(&self) -> &str {
        "Drop previously recalled messages from the active context, freeing budget."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: &Value, ctx: &ToolContext) -> Result<ToolResult> {
        let Some(live) = self.sessions.get_live(&ctx.session_id) else {
            return Ok(fold_err(Error::NotFound(format!(
                "session {}",
                ctx.session_id
            ))));
        };
        let cleared = live.lock().await.memory.clear_promoted();
        Ok(ToolResult::ok(json!({ "cleared_messages": cleared })))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// search_conversation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct SearchConversation {
    sessions: Arc<SessionManager>,
}

#[async_trait::async_trait]
impl Tool for SearchConversation {
    fn name(&self) -> &str {
        "search_conversation"
    }

    fn description(&self) -> &str {
        "Full-text search over this session's history. Returns matching snippets \
         without promoting anything into context."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search terms (OR semantics)" },
                "limit": { "type": "integer", "description": "Max results (default 10)" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult> {
        let query = match str_arg(args, "query") {
            Ok(q) => q,
            Err(e) => return Ok(fold_err(e)),
        };
        let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(10) as usize;
        let hits = self.sessions.search_session(&ctx.session_id, query, limit).await;
        match hits {
            Ok(hits) => {
                let rendered: Vec<Value> = hits
                    .iter()
                    .map(|hit| {
                        json!({
                            "content": hit.content,
                            "score": hit.score,
                        })
                    })
                    .collect();
                Ok(ToolResult::ok(json!({ "matches": rendered })))
            }
            Err(e) => Ok(fold_err(e)),
        }
    }
}
