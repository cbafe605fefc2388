//! Self-correction analyzer — classifies tool errors and decides whether
//! a bounded re-plan is worth feeding back to the model.
//!
//! Recoverable classes (SQL syntax errors primarily) get a suggestion
//! appended to the transcript; the normal turn loop then re-plans within
//! the same MaxTurns / MaxToolExecutions caps. Nothing here can bypass
//! the hard limits.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;

use strand_domain::error::Error;
use strand_domain::message::ToolResult;

#[derive(Debug, Clone, Serialize)]
pub struct ErrorAnalysis {
    pub error_type: String,
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Classify a failed tool execution from its structured result and/or
/// transport error. Non-SQL errors pass through unchanged.
pub fn analyze_error(result: Option<&ToolResult>, err: Option<&Error>) -> ErrorAnalysis {
    let code = result
        .and_then(|r| r.error.as_ref())
        .map(|e| e.code.as_str())
        .unwrap_or("");
    let message = result
        .and_then(|r| r.error.as_ref())
        .map(|e| e.message.to_lowercase())
        .or_else(|| err.map(|e| e.to_string().to_lowercase()))
        .unwrap_or_default();

    if code == "permission_denied" || message.contains("permission denied") {
        return ErrorAnalysis {
            error_type: "permission_denied".into(),
            recoverable: false,
            suggestion: None,
        };
    }
    if code == "timeout" || message.contains("timed out") || message.contains("timeout") {
        return ErrorAnalysis {
            error_type: "timeout".into(),
            recoverable: false,
            suggestion: Some("narrow the request or retry the tool once".into()),
        };
    }
    if message.contains("no such table") || message.contains("table not found") {
        return ErrorAnalysis {
            error_type: "table_not_found".into(),
            recoverable: true,
            suggestion: Some(
                "the table name does not exist; check the schema_info in the result \
                 metadata and query one of the listed tables"
                    .into(),
            ),
        };
    }
    if message.contains("syntax error") || message.contains("sql error") {
        return ErrorAnalysis {
            error_type: "syntax_error".into(),
            recoverable: true,
            suggestion: Some(
                "the SQL could not be parsed; re-check quoting and column names against \
                 schema_info, then retry with a corrected SELECT"
                    .into(),
            ),
        };
    }

    ErrorAnalysis {
        error_type: "execution_error".into(),
        recoverable: false,
        suggestion: None,
    }
}

/// Per-session record of recent tool errors. Cleared on the first
/// successful execution of the same tool in the same session.
#[derive(Default)]
pub struct GuardrailStore {
    errors: Mutex<HashMap<(String, String), Vec<String>>>,
}

impl GuardrailStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_error(&self, session_id: &str, tool_name: &str, message: impl Into<String>) {
        self.errors
            .lock()
            .entry((session_id.to_owned(), tool_name.to_owned()))
            .or_default()
            .push(message.into());
    }

    pub fn clear_on_success(&self, session_id: &str, tool_name: &str) {
        self.errors
            .lock()
            .remove(&(session_id.to_owned(), tool_name.to_owned()));
    }

    pub fn recent_errors(&self, session_id: &str, tool_name: &str) -> Vec<String> {
        self.errors
            .lock()
            .get(&(session_id.to_owned(), tool_name.to_owned()))
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(code: &str, message: &str) -> ToolResult {
        ToolResult::failed(code, message)
    }

    #[test]
    fn classifies_sql_syntax() {
        let result = failed("execution_error", "SQL error: syntax error near \"FORM\"");
        let analysis = analyze_error(Some(&result), None);
        assert_eq!(analysis.error_type, "syntax_error");
        assert!(analysis.recoverable);
        assert!(analysis.suggestion.is_some());
    }

    #[test]
    fn classifies_missing_table() {
        let result = failed("execution_error", "no such table: userz");
        let analysis = analyze_error(Some(&result), None);
        assert_eq!(analysis.error_type, "table_not_found");
        assert!(analysis.recoverable);
    }

    #[test]
    fn permission_and_timeout_are_not_recoverable() {
        let denied = analyze_error(Some(&failed("permission_denied", "nope")), None);
        assert_eq!(denied.error_type, "permission_denied");
        assert!(!denied.recoverable);

        let timeout = analyze_error(Some(&failed("timeout", "tool slow exceeded 60s")), None);
        assert_eq!(timeout.error_type, "timeout");
        assert!(!timeout.recoverable);
    }

    #[test]
    fn unknown_errors_pass_through() {
        let analysis = analyze_error(Some(&failed("execution_error", "disk on fire")), None);
        assert_eq!(analysis.error_type, "execution_error");
        assert!(!analysis.recoverable);
        assert!(analysis.suggestion.is_none());
    }

    #[test]
    fn guardrails_clear_on_success() {
        let store = GuardrailStore::new();
        store.record_error("s1", "query", "syntax error");
        store.record_error("s1", "query", "syntax error again");
        assert_eq!(store.recent_errors("s1", "query").len(), 2);

        // Other sessions/tools are untouched.
        store.clear_on_success("s1", "other");
        assert_eq!(store.recent_errors("s1", "query").len(), 2);

        store.clear_on_success("s1", "query");
        assert!(store.recent_errors("s1", "query").is_empty());
    }
}
