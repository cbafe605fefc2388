//! Per-role provider overrides with fallback to the main agent LLM.
//!
//! Deployments can point expensive roles (agent, judge) and cheap roles
//! (compressor, classifier) at different models. Every lookup falls back
//! to the `Agent` provider when no override is set.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::traits::LlmProvider;

/// Model roles — each maps to a provider override slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LlmRole {
    /// The main conversational model.
    #[default]
    Agent,
    /// Scores and evaluates candidate outputs.
    Judge,
    /// Coordinates multi-agent plans.
    Orchestrator,
    /// Cheap classification calls.
    Classifier,
    /// Compresses context into summaries.
    Compressor,
}

impl LlmRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmRole::Agent => "agent",
            LlmRole::Judge => "judge",
            LlmRole::Orchestrator => "orchestrator",
            LlmRole::Classifier => "classifier",
            LlmRole::Compressor => "compressor",
        }
    }

    /// Unknown role names fall through to `Agent`.
    pub fn parse(s: &str) -> Self {
        match s {
            "judge" => LlmRole::Judge,
            "orchestrator" => LlmRole::Orchestrator,
            "classifier" => LlmRole::Classifier,
            "compressor" => LlmRole::Compressor,
            _ => LlmRole::Agent,
        }
    }
}

/// Thread-safe role → provider map.
#[derive(Default)]
pub struct RoleDispatcher {
    providers: RwLock<HashMap<LlmRole, Arc<dyn LlmProvider>>>,
}

impl RoleDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or clear the provider for a role. `None` restores the
    /// fallback to the agent provider.
    pub fn set_role(&self, role: LlmRole, provider: Option<Arc<dyn LlmProvider>>) {
        let mut map = self.providers.write();
        match provider {
            Some(p) => {
                tracing::debug!(role = role.as_str(), provider = p.provider_id(), "role set");
                map.insert(role, p);
            }
            None => {
                tracing::debug!(role = role.as_str(), "role override cleared");
                map.remove(&role);
            }
        }
    }

    /// Resolve the provider for a role, falling back to `Agent`.
    pub fn llm_for_role(&self, role: LlmRole) -> Option<Arc<dyn LlmProvider>> {
        let map = self.providers.read();
        map.get(&role).or_else(|| map.get(&LlmRole::Agent)).cloned()
    }

    /// The dedicated override for a role, without fallback.
    pub fn override_for_role(&self, role: LlmRole) -> Option<Arc<dyn LlmProvider>> {
        self.providers.read().get(&role).cloned()
    }

    /// True when a dedicated (non-fallback) provider is set for the role.
    pub fn has_override(&self, role: LlmRole) -> bool {
        self.providers.read().contains_key(&role)
    }
}
