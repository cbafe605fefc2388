//! The execution pipeline: validate → permission → breaker → run with
//! timeout → observe. Batches run with bounded parallelism and results
//! come back in input order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;

use strand_domain::cancel::CancelToken;
use strand_domain::error::{Error, Result};
use strand_domain::message::{ToolCall, ToolResult};

use crate::breaker::CircuitBreaker;
use crate::registry::{PermissionChecker, ToolRegistry};
use crate::validate::validate_input;
use crate::ToolContext;

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_PARALLELISM: usize = 8;

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    permissions: Option<Arc<dyn PermissionChecker>>,
    breaker: Option<Arc<CircuitBreaker>>,
    timeout: Duration,
    parallelism: Arc<Semaphore>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            permissions: None,
            breaker: None,
            timeout: DEFAULT_TOOL_TIMEOUT,
            parallelism: Arc::new(Semaphore::new(DEFAULT_PARALLELISM)),
        }
    }

    pub fn with_permissions(mut self, checker: Arc<dyn PermissionChecker>) -> Self {
        self.permissions = Some(checker);
        self
    }

    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Execute one tool call. Tool failures come back as unsuccessful
    /// [`ToolResult`]s (the transcript still wants them); only
    /// cancellation is an `Err`.
    pub async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> Result<ToolResult> {
        if ctx.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let started = Instant::now();
        let mut result = self.execute_gated(call, ctx).await?;
        result.execution_time_ms = started.elapsed().as_millis() as u64;

        if let Some(breaker) = &self.breaker {
            if result.success {
                breaker.record_success(&call.name);
            } else {
                breaker.record_failure(&call.name);
            }
        }
        tracing::debug!(
            tool = %call.name,
            call_id = %call.id,
            success = result.success,
            duration_ms = result.execution_time_ms,
            "tool executed"
        );
        Ok(result)
    }

    async fn execute_gated(&self, call: &ToolCall, ctx: &ToolContext) -> Result<ToolResult> {
        let Some(tool) = self.registry.get(&call.name) else {
            return Ok(
                ToolResult::failed("unknown_tool", format!("no tool named {:?}", call.name))
                    .with_suggestion("list the registered tools and retry with a valid name"),
            );
        };

        if let Err(e) = validate_input(&tool.input_schema(), &call.input) {
            return Ok(ToolResult::failed("invalid_input", e.to_string())
                .with_suggestion("correct the arguments to match the tool's input schema"));
        }

        if let Some(checker) = &self.permissions {
            if let Err(e) = checker.check(&call.name, &ctx.session_id, &call.input) {
                return Ok(ToolResult::failed("permission_denied", e.to_string()));
            }
        }

        if let Some(breaker) = &self.breaker {
            if let Err(e) = breaker.check_and_arm(&call.name) {
                return Ok(ToolResult::failed("circuit_open", e.to_string())
                    .with_suggestion("wait for the cooldown or use a different tool"));
            }
        }

        let execution = tool.execute(&call.input, ctx);
        tokio::select! {
            outcome = tokio::time::timeout(self.timeout, execution) => match outcome {
                Ok(Ok(result)) => Ok(result),
                Ok(Err(Error::Cancelled)) => Err(Error::Cancelled),
                Ok(Err(e)) => {
                    let mut failed = ToolResult::failed("execution_error", e.to_string());
                    if let Some(info) = failed.error.as_mut() {
                        info.retryable = e.is_retryable();
                    }
                    Ok(failed)
                }
                Err(_elapsed) => {
                    let mut failed = ToolResult::failed(
                        "timeout",
                        format!("tool {} exceeded {:?}", call.name, self.timeout),
                    );
                    if let Some(info) = failed.error.as_mut() {
                        info.retryable = true;
                    }
                    Ok(failed)
                }
            },
            _ = wait_cancelled(&ctx.cancel) => Err(Error::Cancelled),
        }
    }

    /// Execute a batch concurrently. Results are returned in input order
    /// regardless of completion order; parallelism is bounded.
    pub async fn execute_batch(
        &self,
        calls: &[ToolCall],
        ctx: &ToolContext,
    ) -> Result<Vec<ToolResult>> {
        let futures: Vec<_> = calls
            .iter()
            .map(|call| {
                let permits = self.parallelism.clone();
                async move {
                    let _permit = permits
                        .acquire()
                        .await
                        .map_err(|_| Error::Internal("executor semaphore closed".into()))?;
                    self.execute(call, ctx).await
                }
            })
            .collect();
        let results = futures_util::future::join_all(futures).await;
        results.into_iter().collect()
    }
}

/// Resolve when the token fires. The token is a plain flag, so poll it
/// at a coarse interval.
async fn wait_cancelled(cancel: &CancelToken) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
