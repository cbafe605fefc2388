//! The bounded agentic turn loop.
//!
//! One `chat` call walks START → CALL_LLM → INGEST_RESPONSE →
//! DISPATCH_TOOLS → POST_TOOL → … → TERMINATE, with cancellation
//! checked at every transition. Tool failures are folded into the
//! transcript and the loop continues; only cancellation, timeouts, and
//! exhausted-retry upstream errors abort the chat.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tracing::Instrument;

use strand_domain::cancel::CancelToken;
use strand_domain::config::RuntimeConfig;
use strand_domain::error::{Error, Result};
use strand_domain::message::{Message, ToolCall, ToolResult};
use strand_domain::record::ToolExecutionRecord;
use strand_domain::tracer::Tracer;
use strand_memory::CachedToolResult;
use strand_providers::progress::{chat_stream_with_progress, ProgressCallback};
use strand_providers::retry::call_with_retry;
use strand_providers::{ChatRequest, LlmProvider, LlmResponse, Usage};
use strand_results::ResultStore;
use strand_sessions::SessionStore;
use strand_tools::{ToolContext, ToolExecutor};

use crate::correction::{analyze_error, GuardrailStore};
use crate::session::SessionManager;

/// Tool outputs at or above this serialized size go to the result store
/// and only a reference enters the transcript.
const LARGE_RESULT_THRESHOLD: usize = 8 * 1024;

/// Appended as a synthetic assistant message when MaxTurns is hit.
const MAX_TURNS_NOTICE: &str =
    "max turns exceeded: the conversation reached the configured turn limit before \
     the model produced a final answer.";

#[derive(Debug, Clone, Serialize)]
pub struct ToolExecutionOutcome {
    pub call: ToolCall,
    pub result: ToolResult,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ChatMetadata {
    pub turns: u32,
    pub tool_executions: u32,
}

/// The final response of one chat call.
#[derive(Debug, Clone, Serialize)]
pub struct ChatOutcome {
    pub content: String,
    pub tool_executions: Vec<ToolExecutionOutcome>,
    pub usage: Usage,
    pub metadata: ChatMetadata,
}

/// Everything the loop borrows from the agent.
pub(crate) struct TurnDeps<'a> {
    pub config: &'a RuntimeConfig,
    pub provider: Arc<dyn LlmProvider>,
    pub sessions: &'a SessionManager,
    pub store: &'a dyn SessionStore,
    pub results: &'a dyn ResultStore,
    pub executor: &'a ToolExecutor,
    pub guardrails: &'a GuardrailStore,
    pub tracer: &'a dyn Tracer,
    pub progress: Option<ProgressCallback>,
}

pub(crate) async fn run_turn_loop(
    deps: TurnDeps<'_>,
    session_id: &str,
    user_message: &str,
    cancel: &CancelToken,
) -> Result<ChatOutcome> {
    let span = tracing::info_span!("chat", session_id);
    run_turn_inner(deps, session_id, user_message, cancel)
        .instrument(span)
        .await
}

async fn run_turn_inner(
    deps: TurnDeps<'_>,
    session_id: &str,
    user_message: &str,
    cancel: &CancelToken,
) -> Result<ChatOutcome> {
    let live = deps.sessions.get_or_create(session_id).await?;

    // START: persist the user message. Empty input is accepted; the
    // loop still runs and the model owes a non-empty reply.
    let user = Message::user(user_message);
    deps.store.save_message(session_id, &user).await?;
    {
        let mut live = live.lock().await;
        live.memory.add_message(user).await?;
    }

    let mut llm_calls: u32 = 0;
    let mut tool_execution_count: u32 = 0;
    let mut executions: Vec<ToolExecutionOutcome> = Vec::new();
    let mut total_usage = Usage::default();
    let tool_ctx = ToolContext::new(session_id, cancel.clone());

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // ── CALL_LLM ─────────────────────────────────────────────
        let context = {
            let live = live.lock().await;
            live.memory.assemble_context()
        };
        let request = ChatRequest {
            messages: context,
            tools: deps.executor.registry().definitions(),
        };
        let response = call_llm(&deps, &request, cancel).await?;
        llm_calls += 1;
        total_usage.add(&response.usage);
        tracing::debug!(
            llm_calls,
            tool_calls = response.tool_calls.len(),
            "LLM responded"
        );

        // ── INGEST_RESPONSE ──────────────────────────────────────
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if response.tool_calls.is_empty() {
            let assistant = Message::assistant(response.content.clone());
            deps.store.save_message(session_id, &assistant).await?;
            {
                let mut live = live.lock().await;
                live.memory.add_message(assistant).await?;
            }
            return finish(
                &deps,
                session_id,
                response.content,
                executions,
                total_usage,
                llm_calls,
                tool_execution_count,
            )
            .await;
        }

        // ── DISPATCH_TOOLS ───────────────────────────────────────
        // Cap dispatches at the remaining execution budget; calls past
        // the cap are neither executed nor persisted.
        let remaining = deps
            .config
            .max_tool_executions
            .saturating_sub(tool_execution_count) as usize;
        let requested = response.tool_calls.len();
        let dispatched: Vec<ToolCall> = response.tool_calls.into_iter().take(remaining).collect();
        if dispatched.len() < requested {
            tracing::warn!(
                requested,
                dispatched = dispatched.len(),
                cap = deps.config.max_tool_executions,
                "tool-execution cap truncated this batch"
            );
        }
        if dispatched.is_empty() {
            // The cap was already exhausted before this batch.
            return finish(
                &deps,
                session_id,
                response.content,
                executions,
                total_usage,
                llm_calls,
                tool_execution_count,
            )
            .await;
        }

        let results = deps.executor.execute_batch(&dispatched, &tool_ctx).await?;

        let mut tool_messages: Vec<Message> = Vec::with_capacity(results.len());
        for (call, mut result) in dispatched.iter().zip(results) {
            offload_large_result(&deps, &mut result).await;
            annotate_failure(&deps, session_id, call, &mut result);
            tool_messages.push(Message::tool_result(call.id.clone(), result.clone()));
            executions.push(ToolExecutionOutcome {
                call: call.clone(),
                result,
            });
        }

        let assistant = Message::assistant_with_tools(response.content.clone(), dispatched.clone());
        deps.store
            .save_turn(session_id, &assistant, &tool_messages)
            .await?;
        {
            let mut live = live.lock().await;
            live.memory.add_message(assistant).await?;
            for message in &tool_messages {
                live.memory.add_message(message.clone()).await?;
            }
            // The kernel keeps the most recent result only.
            if let (Some(call), Some(last)) = (dispatched.last(), tool_messages.last()) {
                if let Some(result) = &last.tool_result {
                    live.memory.kernel_mut().cache_tool_result(CachedToolResult {
                        tool_name: call.name.clone(),
                        args: call.input.clone(),
                        result: result.data.clone(),
                        timestamp: last.timestamp,
                    });
                }
            }
        }
        persist_execution_records(&deps, session_id, &dispatched, &executions).await;

        tool_execution_count += dispatched.len() as u32;
        if tool_execution_count >= deps.config.max_tool_executions {
            return finish(
                &deps,
                session_id,
                response.content,
                executions,
                total_usage,
                llm_calls,
                tool_execution_count,
            )
            .await;
        }

        // ── POST_TOOL ────────────────────────────────────────────
        if llm_calls >= deps.config.max_turns {
            let notice = Message::assistant(MAX_TURNS_NOTICE);
            deps.store.save_message(session_id, &notice).await?;
            {
                let mut live = live.lock().await;
                live.memory.add_message(notice).await?;
            }
            // The synthetic notice counts as the final turn.
            return finish(
                &deps,
                session_id,
                MAX_TURNS_NOTICE.to_owned(),
                executions,
                total_usage,
                llm_calls + 1,
                tool_execution_count,
            )
            .await;
        }
    }
}

/// Issue the LLM call: streaming (capability-probed, bypassing retry)
/// when a progress callback is installed, else retried non-streaming.
/// Both paths respect the per-call timeout and cancellation.
async fn call_llm(
    deps: &TurnDeps<'_>,
    request: &ChatRequest,
    cancel: &CancelToken,
) -> Result<LlmResponse> {
    let timeout = Duration::from_millis(deps.config.llm_call_timeout_ms);

    if deps.provider.supports_streaming() {
        if let Some(progress) = &deps.progress {
            let call = chat_stream_with_progress(deps.provider.as_ref(), request, progress.clone());
            return match tokio::time::timeout(timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout("LLM stream".into())),
            };
        }
    }

    call_with_retry(&deps.config.retry, cancel, || async {
        match tokio::time::timeout(timeout, deps.provider.chat(request)).await {
            Ok(result) => result,
            // Attempt-level timeouts are retryable upstream failures;
            // only the chat-level deadline is terminal.
            Err(_) => Err(Error::Upstream("LLM call timed out".into())),
        }
    })
    .await
}

/// Store oversized tool payloads and leave only a reference + pointer
/// note in the transcript.
async fn offload_large_result(deps: &TurnDeps<'_>, result: &mut ToolResult) {
    if !result.success {
        return;
    }
    let serialized = result.data.to_string();
    if serialized.len() < LARGE_RESULT_THRESHOLD {
        return;
    }
    let reference_id = uuid::Uuid::new_v4().to_string();
    match deps
        .results
        .store(
            &reference_id,
            serialized.as_bytes(),
            "application/json",
            None,
        )
        .await
    {
        Ok(reference) => {
            tracing::info!(
                reference_id,
                size_bytes = reference.size_bytes,
                "tool result offloaded"
            );
            result.metadata = Some(json!({ "offloaded_bytes": reference.size_bytes }));
            result.data = json!({
                "reference_id": reference.id,
                "location": reference.location,
                "size_bytes": reference.size_bytes,
                "note": "large result stored; call get_tool_result for a preview or \
                         query_tool_result to inspect it",
            });
        }
        Err(e) => {
            tracing::warn!(error = %e, "large-result offload failed; keeping inline");
        }
    }
}

/// Run the analyzer over a failed result, fold its suggestion into the
/// transcript, and maintain the guardrail store.
fn annotate_failure(
    deps: &TurnDeps<'_>,
    session_id: &str,
    call: &ToolCall,
    result: &mut ToolResult,
) {
    if result.success {
        deps.guardrails.clear_on_success(session_id, &call.name);
        return;
    }
    let analysis = analyze_error(Some(result), None);
    if let Some(info) = result.error.as_mut() {
        deps.guardrails
            .record_error(session_id, &call.name, info.message.clone());
        if analysis.recoverable && info.suggestion.is_none() {
            info.suggestion = analysis.suggestion;
        }
    }
    deps.tracer.record_metric(
        "tool.failures",
        1.0,
        &[("tool", &call.name), ("type", &analysis.error_type)],
    );
}

async fn persist_execution_records(
    deps: &TurnDeps<'_>,
    session_id: &str,
    dispatched: &[ToolCall],
    executions: &[ToolExecutionOutcome],
) {
    let recent = &executions[executions.len() - dispatched.len()..];
    for outcome in recent {
        let record = ToolExecutionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_owned(),
            tool_name: outcome.call.name.clone(),
            input: outcome.call.input.clone(),
            result: Some(outcome.result.data.clone()),
            error: outcome
                .result
                .error
                .as_ref()
                .map(|e| format!("{}: {}", e.code, e.message)),
            duration_ms: outcome.result.execution_time_ms,
            created_at: chrono::Utc::now(),
        };
        if let Err(e) = deps.store.save_tool_execution(&record).await {
            tracing::warn!(error = %e, "failed to persist tool execution record");
        }
    }
}

async fn finish(
    deps: &TurnDeps<'_>,
    session_id: &str,
    content: String,
    executions: Vec<ToolExecutionOutcome>,
    usage: Usage,
    turns: u32,
    tool_executions: u32,
) -> Result<ChatOutcome> {
    if let Err(e) = deps
        .store
        .record_usage(
            session_id,
            u64::from(usage.input_tokens),
            u64::from(usage.output_tokens),
            usage.cost_usd,
        )
        .await
    {
        tracing::warn!(error = %e, "failed to record session usage");
    }
    deps.tracer
        .record_metric("chat.turns", f64::from(turns), &[("session", session_id)]);
    Ok(ChatOutcome {
        content,
        tool_executions: executions,
        usage,
        metadata: ChatMetadata {
            turns,
            tool_executions,
        },
    })
}
