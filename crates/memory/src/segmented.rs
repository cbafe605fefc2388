//! The segmented memory itself: ROM / Kernel / L1 / L2 / Swap plus
//! promoted context, with adaptive compression on every append.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use strand_domain::config::RuntimeConfig;
use strand_domain::error::{Error, Result};
use strand_domain::message::{Message, Role};
use strand_domain::record::{MemorySnapshot, SNAPSHOT_L2_SUMMARY};
use strand_domain::tracer::Tracer;
use strand_sessions::{SearchHit, SessionStore};

use crate::compressor::{compression_prompt, heuristic_summary, ContextCompressor};
use crate::kernel::KernelSpace;
use crate::profile::{CompressionProfile, DerivedLimits};
use crate::search;
use crate::tokens::{count_tokens, estimate_message_tokens, estimate_messages_tokens, TokenBudget};

/// Deadline for the L2 → swap snapshot write.
const L2_EVICT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SegmentedMemory {
    session_id: String,
    rom: String,
    rom_tokens: u32,
    kernel: KernelSpace,
    l1: Vec<Message>,
    l2: String,
    promoted: Vec<Message>,
    budget: TokenBudget,
    profile: CompressionProfile,
    limits: DerivedLimits,
    effective_min_l1: usize,
    effective_max_l1_tokens: u32,
    effective_max_l2_tokens: u32,
    compressor: Option<Arc<dyn ContextCompressor>>,
    store: Arc<dyn SessionStore>,
    tracer: Arc<dyn Tracer>,
}

impl SegmentedMemory {
    pub fn new(
        session_id: impl Into<String>,
        rom: impl Into<String>,
        config: &RuntimeConfig,
        store: Arc<dyn SessionStore>,
        tracer: Arc<dyn Tracer>,
    ) -> Result<Self> {
        let profile =
            CompressionProfile::preset(&config.workload_profile).with_overrides(&config.memory);
        profile.validate()?;

        let rom = rom.into();
        let rom_tokens = count_tokens(&rom);
        let kernel = KernelSpace::new();
        let limits = DerivedLimits::derive(
            &profile,
            config.max_context_tokens,
            config.reserved_output_tokens,
            rom_tokens,
            kernel.estimate_tokens(),
        );

        // Explicit overrides win; otherwise the window-derived values
        // bound the preset.
        let effective_min_l1 = config
            .memory
            .min_l1_messages
            .unwrap_or(limits.min_l1_messages);
        let effective_max_l1_tokens = config
            .memory
            .max_l1_tokens
            .unwrap_or_else(|| profile.max_l1_tokens.min(limits.max_l1_tokens));
        let effective_max_l2_tokens = config.max_l2_tokens.min(limits.max_l2_tokens.max(500));

        Ok(Self {
            session_id: session_id.into(),
            rom,
            rom_tokens,
            kernel,
            l1: Vec::new(),
            l2: String::new(),
            promoted: Vec::new(),
            budget: TokenBudget::new(config.max_context_tokens, config.reserved_output_tokens),
            profile,
            limits,
            effective_min_l1,
            effective_max_l1_tokens,
            effective_max_l2_tokens,
            compressor: None,
            store,
            tracer,
        })
    }

    /// Inject (or clear) the compressor capability. Called after
    /// construction so memory never references the agent.
    pub fn set_compressor(&mut self, compressor: Option<Arc<dyn ContextCompressor>>) {
        self.compressor = compressor;
    }

    pub fn has_compressor(&self) -> bool {
        self.compressor.is_some()
    }

    pub fn kernel(&self) -> &KernelSpace {
        &self.kernel
    }

    pub fn kernel_mut(&mut self) -> &mut KernelSpace {
        &mut self.kernel
    }

    pub fn l1_len(&self) -> usize {
        self.l1.len()
    }

    pub fn l1_messages(&self) -> &[Message] {
        &self.l1
    }

    pub fn l2_summary(&self) -> &str {
        &self.l2
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn limits(&self) -> DerivedLimits {
        self.limits
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Budget accounting
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn recompute_usage(&mut self) {
        let used = self.rom_tokens
            + self.kernel.estimate_tokens()
            + count_tokens(&self.l2)
            + estimate_messages_tokens(&self.promoted)
            + estimate_messages_tokens(&self.l1);
        self.budget.set_used(used);
    }

    pub fn token_budget_usage(&self) -> f64 {
        self.budget.usage_percentage()
    }

    pub fn budget(&self) -> TokenBudget {
        self.budget
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Append + adaptive compression
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub async fn add_message(&mut self, mut message: Message) -> Result<()> {
        if message.token_count == 0 {
            message.token_count = estimate_message_tokens(&message);
        }
        self.l1.push(message);
        self.recompute_usage();

        let usage_pct = self.budget.usage_percentage();
        let l1_tokens = estimate_messages_tokens(&self.l1);
        let over_count = self.l1.len() > self.profile.max_l1_messages;
        let over_tokens = l1_tokens > self.effective_max_l1_tokens;
        let over_budget = usage_pct > self.profile.warning_threshold_pct;

        let should_compress =
            (over_count || over_tokens || over_budget) && self.l1.len() > self.effective_min_l1;
        if !should_compress {
            return Ok(());
        }

        let batch_size = if usage_pct > self.profile.critical_threshold_pct {
            self.profile.critical_batch_size
        } else if usage_pct > self.profile.warning_threshold_pct {
            self.profile.warning_batch_size
        } else {
            self.profile.normal_batch_size
        };
        let batch_size = batch_size.min(self.l1.len() - self.effective_min_l1);
        if batch_size == 0 {
            return Ok(());
        }

        let cut = adjust_cut(&self.l1, batch_size);
        if cut == 0 {
            // Every candidate boundary would split a tool pair.
            tracing::debug!(session_id = %self.session_id, "compression deferred: no safe boundary");
            return Ok(());
        }

        let batch: Vec<Message> = self.l1.drain(..cut).collect();
        tracing::debug!(
            session_id = %self.session_id,
            batch = batch.len(),
            usage_pct,
            "compressing L1 into L2"
        );

        let summary = self.summarize(&batch).await;
        if !self.l2.is_empty() {
            self.l2.push_str("\n\n");
        }
        self.l2.push_str(&summary);

        if count_tokens(&self.l2) > self.effective_max_l2_tokens {
            self.evict_l2_to_swap().await;
        }

        self.recompute_usage();
        if self.budget.usage_percentage() > self.profile.warning_threshold_pct {
            // Backpressure is surfaced, not looped on: the turn proceeds.
            self.tracer.record_metric(
                "memory.budget_overrun",
                self.budget.usage_percentage(),
                &[("session", &self.session_id)],
            );
        }
        Ok(())
    }

    async fn summarize(&self, batch: &[Message]) -> String {
        if let Some(compressor) = &self.compressor {
            match compressor.complete(&compression_prompt(batch)).await {
                Ok(summary) if !summary.trim().is_empty() => return summary,
                Ok(_) => {
                    tracing::warn!(session_id = %self.session_id, "compressor returned empty summary");
                }
                Err(e) => {
                    tracing::warn!(session_id = %self.session_id, error = %e, "compressor failed");
                }
            }
        }
        heuristic_summary(batch)
    }

    async fn evict_l2_to_swap(&mut self) {
        let snapshot = MemorySnapshot {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: self.session_id.clone(),
            snapshot_type: SNAPSHOT_L2_SUMMARY.to_owned(),
            content: self.l2.clone(),
            token_count: count_tokens(&self.l2),
            created_at: Utc::now(),
        };
        let write = self.store.save_memory_snapshot(&snapshot);
        match tokio::time::timeout(L2_EVICT_TIMEOUT, write).await {
            Ok(Ok(())) => {
                tracing::info!(
                    session_id = %self.session_id,
                    tokens = snapshot.token_count,
                    "L2 evicted to swap"
                );
                self.l2.clear();
            }
            Ok(Err(e)) => {
                tracing::warn!(session_id = %self.session_id, error = %e, "L2 eviction write failed");
                self.tracer
                    .record_metric("memory.l2_evict_failed", 1.0, &[("session", &self.session_id)]);
            }
            Err(_) => {
                tracing::warn!(session_id = %self.session_id, "L2 eviction write timed out");
                self.tracer
                    .record_metric("memory.l2_evict_failed", 1.0, &[("session", &self.session_id)]);
            }
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Context assembly
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Assemble the message list sent to the LLM, coldest layer first.
    pub fn assemble_context(&self) -> Vec<Message> {
        let mut context = Vec::new();
        if !self.rom.is_empty() {
            context.push(Message::system(self.rom.clone()));
        }
        if !self.l2.is_empty() {
            context.push(Message::system(format!(
                "Summary of earlier conversation:\n{}",
                self.l2
            )));
        }
        if let Some(pattern) = self.kernel.pattern() {
            context.push(Message::system(pattern.to_owned()));
        }
        if let Some(findings) = self.kernel.findings_summary() {
            context.push(Message::system(findings));
        }
        if !self.promoted.is_empty() {
            context.push(Message::system(format!(
                "Retrieved conversation history ({} messages)",
                self.promoted.len()
            )));
            context.extend(self.promoted.iter().cloned());
        }
        context.extend(self.l1.iter().cloned());
        context
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Promotion from swap
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Pull messages back into the active window, charged against the
    /// budget. Refuses with `BudgetExceeded` when they would not fit.
    pub fn promote_messages_to_context(&mut self, messages: Vec<Message>) -> Result<()> {
        let needed = estimate_messages_tokens(&messages);
        let available = self.budget.available();
        if needed > available {
            return Err(Error::BudgetExceeded { needed, available });
        }
        self.promoted.extend(messages);
        self.recompute_usage();
        Ok(())
    }

    /// Promote search hits back into the active window. Synchronous so
    /// callers can hold the session lock only for the promotion itself,
    /// never across the search.
    pub fn promote_search_hits(&mut self, hits: &[SearchHit]) -> Result<usize> {
        let messages: Vec<Message> = hits
            .iter()
            .map(|hit| {
                let mut msg = match hit.role {
                    Role::User => Message::user(hit.content.clone()),
                    Role::Assistant => Message::assistant(hit.content.clone()),
                    Role::System => Message::system(hit.content.clone()),
                    Role::Tool => Message::system(format!("Earlier tool output: {}", hit.content)),
                };
                msg.token_count = estimate_message_tokens(&msg);
                msg
            })
            .collect();
        let count = messages.len();
        self.promote_messages_to_context(messages)?;
        Ok(count)
    }

    pub fn clear_promoted(&mut self) -> usize {
        let cleared = self.promoted.len();
        self.promoted.clear();
        self.recompute_usage();
        cleared
    }

    pub fn promoted_len(&self) -> usize {
        self.promoted.len()
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Semantic search
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Two-phase search: BM25 retrieval then optional LLM reranking.
    pub async fn search_messages(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        search::two_phase_search(
            self.store.as_ref(),
            &self.session_id,
            query,
            limit,
            self.compressor.as_deref(),
            self.tracer.as_ref(),
        )
        .await
    }
}

/// Move the cut point back until no tool-result message left in L1
/// references an assistant that would be compressed away.
fn adjust_cut(l1: &[Message], mut cut: usize) -> usize {
    while cut > 0 {
        let splits_pair = l1[cut..].iter().any(|kept| {
            kept.role == Role::Tool
                && kept.tool_use_id.as_ref().is_some_and(|id| {
                    l1[..cut].iter().any(|compressed| {
                        compressed.role == Role::Assistant
                            && compressed.tool_calls.iter().any(|call| &call.id == id)
                    })
                })
        });
        if !splits_pair {
            return cut;
        }
        cut -= 1;
    }
    0
}
