//! The session store capability contract.

use std::sync::Arc;

use strand_domain::error::Result;
use strand_domain::message::{Message, Role};
use strand_domain::record::{MemorySnapshot, SessionRecord, SessionStats, ToolExecutionRecord};

/// Called with the session ID after a delete has committed. Hooks run
/// outside the store's lock.
pub type CleanupHook = Arc<dyn Fn(&str) + Send + Sync>;

/// One full-text search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub session_id: String,
    /// Load-order sequence of the message within the store.
    pub sequence: i64,
    pub role: Role,
    pub content: String,
    /// BM25 rank; lower is better.
    pub score: f64,
}

/// Persistent storage for sessions, messages, tool executions, and
/// memory snapshots.
///
/// `load_session` distinguishes a missing session (`NotFound`) from a
/// session with no messages (empty vec). A compound turn saved through
/// `save_turn` is atomic: a reader never sees an assistant with tool
/// calls whose matching tool messages are missing.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn save_session(&self, session: &SessionRecord) -> Result<()>;

    async fn load_session(&self, id: &str) -> Result<(SessionRecord, Vec<Message>)>;

    async fn save_message(&self, session_id: &str, message: &Message) -> Result<()>;

    /// Atomically persist an assistant-with-tool-calls message and its
    /// tool-result messages. All or nothing.
    async fn save_turn(
        &self,
        session_id: &str,
        assistant: &Message,
        tool_results: &[Message],
    ) -> Result<()>;

    async fn load_messages(&self, session_id: &str) -> Result<Vec<Message>>;

    /// Union of the agent's own sessions plus coordinator/shared messages
    /// from their parent sessions.
    async fn load_messages_for_agent(&self, agent_id: &str) -> Result<Vec<Message>>;

    /// Messages of the session's parent, restricted to coordinator/shared
    /// contexts. Empty when the session has no parent.
    async fn load_messages_from_parent_session(&self, session_id: &str) -> Result<Vec<Message>>;

    async fn save_tool_execution(&self, record: &ToolExecutionRecord) -> Result<()>;

    async fn save_memory_snapshot(&self, snapshot: &MemorySnapshot) -> Result<()>;

    async fn load_memory_snapshots(&self, session_id: &str) -> Result<Vec<MemorySnapshot>>;

    async fn list_sessions(&self) -> Result<Vec<SessionRecord>>;

    /// Hard-delete the session and its dependent rows, then fire cleanup
    /// hooks exactly once, outside the store lock.
    async fn delete_session(&self, id: &str) -> Result<()>;

    /// Add usage to the session's monotone totals.
    async fn record_usage(
        &self,
        session_id: &str,
        input_tokens: u64,
        output_tokens: u64,
        cost_usd: f64,
    ) -> Result<()>;

    /// Full-text search over message content. The query is split on
    /// whitespace and matched as a disjunction, ranked by BM25.
    async fn search_full_text(
        &self,
        session_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>>;

    async fn get_stats(&self) -> Result<SessionStats>;

    fn register_cleanup_hook(&self, hook: CleanupHook);

    /// Capability probe. Stores without soft delete return `None`;
    /// callers fall back to `delete_session`.
    fn as_soft_delete(&self) -> Option<&dyn SoftDeleteStore> {
        None
    }
}

/// Optional soft-delete capability.
#[async_trait::async_trait]
pub trait SoftDeleteStore: Send + Sync {
    /// Mark the session deleted without removing rows.
    async fn soft_delete_session(&self, id: &str) -> Result<()>;
}
