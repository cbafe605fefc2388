//! Session lifecycle and per-session concurrency control.
//!
//! `get_or_create` is the only way to obtain a session handle. Turns are
//! serialized per session through a `Semaphore(1)`; separate sessions
//! never block each other. The live-session mutex guards memory
//! mutations and is never held across an LLM or tool call.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex as SyncMutex, RwLock};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

use strand_domain::config::RuntimeConfig;
use strand_domain::error::{Error, Result};
use strand_domain::record::SessionRecord;
use strand_domain::tracer::Tracer;
use strand_memory::{ContextCompressor, SegmentedMemory};
use strand_providers::{ChatRequest, LlmProvider, LlmRole, RoleDispatcher};
use strand_sessions::SessionStore;

/// Runtime state for one open session.
pub struct LiveSession {
    pub record: SessionRecord,
    pub memory: SegmentedMemory,
}

/// Adapts an [`LlmProvider`] to the narrow compressor capability the
/// memory layer knows about. This is the seam that breaks the
/// agent ↔ memory cycle.
pub struct LlmCompressor(pub Arc<dyn LlmProvider>);

#[async_trait::async_trait]
impl ContextCompressor for LlmCompressor {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let req = ChatRequest {
            messages: vec![strand_domain::message::Message::user(prompt)],
            tools: vec![],
        };
        Ok(self.0.chat(&req).await?.content)
    }
}

/// Per-session turn locks: each session ID maps to a `Semaphore(1)`.
struct SessionLockMap {
    locks: SyncMutex<HashMap<String, Arc<Semaphore>>>,
}

impl SessionLockMap {
    fn new() -> Self {
        Self {
            locks: SyncMutex::new(HashMap::new()),
        }
    }

    async fn acquire(&self, session_id: &str) -> Result<OwnedSemaphorePermit> {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(session_id.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        sem.acquire_owned()
            .await
            .map_err(|_| Error::Internal("session lock closed".into()))
    }

    fn remove(&self, session_id: &str) {
        self.locks.lock().remove(session_id);
    }
}

pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Mutex<LiveSession>>>>,
    locks: SessionLockMap,
    store: Arc<dyn SessionStore>,
    dispatcher: Arc<RoleDispatcher>,
    config: RuntimeConfig,
    tracer: Arc<dyn Tracer>,
    system_prompt: RwLock<String>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        dispatcher: Arc<RoleDispatcher>,
        config: RuntimeConfig,
        tracer: Arc<dyn Tracer>,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            locks: SessionLockMap::new(),
            store,
            dispatcher,
            config,
            tracer,
            system_prompt: RwLock::new(String::new()),
        }
    }

    pub fn set_system_prompt(&self, prompt: impl Into<String>) {
        *self.system_prompt.write() = prompt.into();
    }

    /// Serialize one turn for a session. The permit auto-releases on
    /// drop; separate sessions acquire independent semaphores.
    pub async fn acquire_turn(&self, session_id: &str) -> Result<OwnedSemaphorePermit> {
        self.locks.acquire(session_id).await
    }

    /// Resolve or create the live session for an ID. Sessions are
    /// created on first reference; persisted history is replayed into
    /// memory on restore.
    pub async fn get_or_create(&self, session_id: &str) -> Result<Arc<Mutex<LiveSession>>> {
        if let Some(live) = self.sessions.read().get(session_id) {
            return Ok(live.clone());
        }

        let (record, history) = match self.store.load_session(session_id).await {
            Ok(loaded) => loaded,
            Err(Error::NotFound(_)) => {
                let record = SessionRecord::new(session_id);
                self.store.save_session(&record).await?;
                tracing::info!(session_id, "session created");
                (record, Vec::new())
            }
            Err(e) => return Err(e),
        };

        let mut memory = SegmentedMemory::new(
            session_id,
            self.system_prompt.read().clone(),
            &self.config,
            self.store.clone(),
            self.tracer.clone(),
        )?;
        memory.set_compressor(self.current_compressor());
        for message in history {
            memory.add_message(message).await?;
        }

        let live = Arc::new(Mutex::new(LiveSession { record, memory }));

        // Double-checked under the write lock: a concurrent creator wins.
        let mut sessions = self.sessions.write();
        if let Some(existing) = sessions.get(session_id) {
            return Ok(existing.clone());
        }
        sessions.insert(session_id.to_owned(), live.clone());
        Ok(live)
    }

    pub fn get_live(&self, session_id: &str) -> Option<Arc<Mutex<LiveSession>>> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Remove runtime state and persisted rows. Cleanup hooks fire from
    /// the store, after its delete commits.
    pub async fn delete(&self, session_id: &str) -> Result<()> {
        self.sessions.write().remove(session_id);
        self.locks.remove(session_id);
        self.store.delete_session(session_id).await
    }

    pub fn open_session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// The compressor the dispatcher currently implies: the dedicated
    /// compressor override when present, else the agent provider.
    fn current_compressor(&self) -> Option<Arc<dyn ContextCompressor>> {
        let provider = self
            .dispatcher
            .override_for_role(LlmRole::Compressor)
            .or_else(|| self.dispatcher.llm_for_role(LlmRole::Agent))?;
        Some(Arc::new(LlmCompressor(provider)))
    }

    /// Two-phase search for a session, run without holding the live
    /// session lock (the rerank phase may call an LLM).
    pub async fn search_session(
        &self,
        session_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<strand_sessions::SearchHit>> {
        let compressor = self.current_compressor();
        strand_memory::search::two_phase_search(
            self.store.as_ref(),
            session_id,
            query,
            limit,
            compressor.as_deref(),
            self.tracer.as_ref(),
        )
        .await
    }

    /// Re-point every live session's compressor after a role change.
    pub async fn refresh_compressors(&self) {
        let compressor = self.current_compressor();
        let live: Vec<Arc<Mutex<LiveSession>>> = self.sessions.read().values().cloned().collect();
        for session in live {
            session.lock().await.memory.set_compressor(compressor.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_domain::tracer::NoopTracer;
    use strand_providers::scripted::ScriptedProvider;
    use strand_sessions::SqliteSessionStore;

    fn manager() -> SessionManager {
        let store = Arc::new(SqliteSessionStore::open_in_memory().unwrap());
        let dispatcher = Arc::new(RoleDispatcher::new());
        SessionManager::new(
            store,
            dispatcher,
            RuntimeConfig::default(),
            Arc::new(NoopTracer),
        )
    }

    #[tokio::test]
    async fn creates_on_first_reference() {
        let manager = manager();
        assert_eq!(manager.open_session_count(), 0);
        let live = manager.get_or_create("s1").await.unwrap();
        assert_eq!(live.lock().await.record.id, "s1");
        assert_eq!(manager.open_session_count(), 1);

        // Second call returns the same handle.
        let again = manager.get_or_create("s1").await.unwrap();
        assert!(Arc::ptr_eq(&live, &again));
    }

    #[tokio::test]
    async fn delete_removes_everywhere() {
        let manager = manager();
        manager.get_or_create("s1").await.unwrap();
        manager.delete("s1").await.unwrap();
        assert_eq!(manager.open_session_count(), 0);
        assert!(manager.get_live("s1").is_none());
        // Deleting a missing session surfaces NotFound.
        assert!(manager.delete("s1").await.is_err());
    }

    #[tokio::test]
    async fn turn_locks_serialize_per_session() {
        let manager = Arc::new(manager());
        let permit = manager.acquire_turn("s1").await.unwrap();

        // A different session acquires immediately.
        let other = manager.acquire_turn("s2").await.unwrap();
        drop(other);

        // The same session waits until the permit drops.
        let manager2 = manager.clone();
        let waiter = tokio::spawn(async move {
            let _p = manager2.acquire_turn("s1").await.unwrap();
            42
        });
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());
        drop(permit);
        assert_eq!(waiter.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn restore_replays_history() {
        let store = Arc::new(SqliteSessionStore::open_in_memory().unwrap());
        let dispatcher = Arc::new(RoleDispatcher::new());
        store
            .save_session(&SessionRecord::new("s1"))
            .await
            .unwrap();
        store
            .save_message("s1", &strand_domain::message::Message::user("earlier"))
            .await
            .unwrap();

        let manager = SessionManager::new(
            store,
            dispatcher,
            RuntimeConfig::default(),
            Arc::new(NoopTracer),
        );
        let live = manager.get_or_create("s1").await.unwrap();
        assert_eq!(live.lock().await.memory.l1_len(), 1);
    }

    #[tokio::test]
    async fn compressor_follows_dispatcher() {
        let store = Arc::new(SqliteSessionStore::open_in_memory().unwrap());
        let dispatcher = Arc::new(RoleDispatcher::new());
        let manager = SessionManager::new(
            store,
            dispatcher.clone(),
            RuntimeConfig::default(),
            Arc::new(NoopTracer),
        );

        let live = manager.get_or_create("s1").await.unwrap();
        assert!(!live.lock().await.memory.has_compressor());

        dispatcher.set_role(
            LlmRole::Agent,
            Some(Arc::new(ScriptedProvider::new("main"))),
        );
        manager.refresh_compressors().await;
        assert!(live.lock().await.memory.has_compressor());
    }
}
