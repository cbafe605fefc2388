use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A session row as persisted by the session store.
///
/// Cost and token totals are cumulative and monotonically non-decreasing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default)]
    pub total_input_tokens: u64,
    #[serde(default)]
    pub total_output_tokens: u64,
}

impl SessionRecord {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            agent_id: None,
            parent_session_id: None,
            created_at: now,
            updated_at: now,
            total_cost_usd: 0.0,
            total_input_tokens: 0,
            total_output_tokens: 0,
        }
    }
}

/// A persisted memory snapshot. Append-only; the memory system writes
/// `l2_summary` rows when evicting L2 to swap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub id: String,
    pub session_id: String,
    pub snapshot_type: String,
    pub content: String,
    pub token_count: u32,
    pub created_at: DateTime<Utc>,
}

/// Snapshot type written when L2 overflows into swap.
pub const SNAPSHOT_L2_SUMMARY: &str = "l2_summary";

/// Audit row for one tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutionRecord {
    pub id: String,
    pub session_id: String,
    pub tool_name: String,
    pub input: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// Aggregate store statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_count: u64,
    pub message_count: u64,
    pub tool_execution_count: u64,
    pub snapshot_count: u64,
}
