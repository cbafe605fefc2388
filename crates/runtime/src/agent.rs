//! Agent assembly — wires the dispatcher, stores, registry, memory, and
//! turn loop together behind one `chat` entry point.

use std::sync::Arc;
use std::time::Duration;

use strand_domain::cancel::{CancelMap, CancelToken};
use strand_domain::config::RuntimeConfig;
use strand_domain::error::{Error, Result};
use strand_domain::tracer::{NoopTracer, Tracer};
use strand_providers::progress::ProgressCallback;
use strand_providers::{LlmProvider, LlmRole, RoleDispatcher};
use strand_results::ResultStore;
use strand_sessions::SessionStore;
use strand_tools::{Tool, ToolExecutor, ToolRegistry};

use crate::builtins::register_builtins;
use crate::correction::GuardrailStore;
use crate::session::SessionManager;
use crate::turn::{run_turn_loop, ChatOutcome, TurnDeps};

/// Per-call options. All fields default to off.
#[derive(Default)]
pub struct ChatOptions {
    /// Caller-owned cancellation token. When absent the agent mints one
    /// and registers it so `Agent::cancel` can find it.
    pub cancel: Option<CancelToken>,
    /// Per-chat deadline covering the whole loop.
    pub timeout: Option<Duration>,
}

pub struct Agent {
    config: RuntimeConfig,
    dispatcher: Arc<RoleDispatcher>,
    sessions: Arc<SessionManager>,
    store: Arc<dyn SessionStore>,
    results: Arc<dyn ResultStore>,
    registry: Arc<ToolRegistry>,
    executor: Arc<ToolExecutor>,
    cancel_map: Arc<CancelMap>,
    guardrails: Arc<GuardrailStore>,
    tracer: Arc<dyn Tracer>,
    progress: Option<ProgressCallback>,
}

impl Agent {
    /// Build an agent around the main (AGENT-role) provider. The five
    /// built-in tools are registered immediately.
    pub fn new(
        config: RuntimeConfig,
        provider: Arc<dyn LlmProvider>,
        store: Arc<dyn SessionStore>,
        results: Arc<dyn ResultStore>,
    ) -> Result<Self> {
        Self::with_tracer(config, provider, store, results, Arc::new(NoopTracer))
    }

    pub fn with_tracer(
        config: RuntimeConfig,
        provider: Arc<dyn LlmProvider>,
        store: Arc<dyn SessionStore>,
        results: Arc<dyn ResultStore>,
        tracer: Arc<dyn Tracer>,
    ) -> Result<Self> {
        // A disabled tracer behaves exactly like an absent one.
        let tracer: Arc<dyn Tracer> = if config.enable_tracing {
            tracer
        } else {
            Arc::new(NoopTracer)
        };

        let dispatcher = Arc::new(RoleDispatcher::new());
        dispatcher.set_role(LlmRole::Agent, Some(provider));

        let sessions = Arc::new(SessionManager::new(
            store.clone(),
            dispatcher.clone(),
            config.clone(),
            tracer.clone(),
        ));

        let registry = Arc::new(ToolRegistry::new());
        register_builtins(&registry, sessions.clone(), results.clone());
        let executor = Arc::new(
            ToolExecutor::new(registry.clone())
                .with_timeout(Duration::from_millis(config.tool_timeout_ms)),
        );

        Ok(Self {
            config,
            dispatcher,
            sessions,
            store,
            results,
            registry,
            executor,
            cancel_map: Arc::new(CancelMap::new()),
            guardrails: Arc::new(GuardrailStore::new()),
            tracer,
            progress: None,
        })
    }

    /// Install a progress callback. Streaming providers will be probed
    /// and token events buffered through it.
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn set_system_prompt(&self, prompt: impl Into<String>) {
        self.sessions.set_system_prompt(prompt);
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn register_tool(&self, tool: Arc<dyn Tool>) {
        self.registry.register(tool);
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn results(&self) -> &Arc<dyn ResultStore> {
        &self.results
    }

    /// Install or clear a role override. Also keeps the segmented
    /// memory's compressor reference in line: the dedicated COMPRESSOR
    /// wins; the AGENT provider backs it up when none is dedicated.
    pub async fn set_role_llm(&self, role: LlmRole, provider: Option<Arc<dyn LlmProvider>>) {
        self.dispatcher.set_role(role, provider);
        if matches!(role, LlmRole::Agent | LlmRole::Compressor) {
            self.sessions.refresh_compressors().await;
        }
    }

    pub fn llm_for_role(&self, role: LlmRole) -> Option<Arc<dyn LlmProvider>> {
        self.dispatcher.llm_for_role(role)
    }

    /// Cancel the in-flight chat for a session, if any.
    pub fn cancel(&self, session_id: &str) -> bool {
        self.cancel_map.cancel(session_id)
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.sessions.delete(session_id).await
    }

    pub async fn chat(&self, session_id: &str, user_message: &str) -> Result<ChatOutcome> {
        self.chat_with_options(session_id, user_message, ChatOptions::default())
            .await
    }

    pub async fn chat_with_options(
        &self,
        session_id: &str,
        user_message: &str,
        options: ChatOptions,
    ) -> Result<ChatOutcome> {
        let provider = self
            .dispatcher
            .llm_for_role(LlmRole::Agent)
            .ok_or_else(|| Error::Internal("no agent LLM configured".into()))?;

        let cancel = match options.cancel {
            Some(token) => token,
            None => self.cancel_map.register(session_id),
        };

        // Turns are serialized per session; other sessions proceed.
        let _turn_permit = self.sessions.acquire_turn(session_id).await?;

        let deps = TurnDeps {
            config: &self.config,
            provider,
            sessions: &self.sessions,
            store: self.store.as_ref(),
            results: self.results.as_ref(),
            executor: &self.executor,
            guardrails: &self.guardrails,
            tracer: self.tracer.as_ref(),
            progress: self.progress.clone(),
        };

        let run = run_turn_loop(deps, session_id, user_message, &cancel);
        let outcome = match options.timeout {
            Some(deadline) => match tokio::time::timeout(deadline, run).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout("chat deadline exceeded".into())),
            },
            None => run.await,
        };

        self.cancel_map.remove(session_id);
        outcome
    }
}
