//! Exponential-backoff retry for non-streaming LLM calls.
//!
//! Streaming bypasses this layer entirely — once a stream yields its
//! first token we are committed and cannot roll back.

use std::future::Future;
use std::time::Duration;

use strand_domain::cancel::CancelToken;
use strand_domain::config::RetryConfig;
use strand_domain::error::{Error, Result};

/// Call `call_fn` with automatic retry on retryable errors.
///
/// The delay grows as `delay ← min(delay × multiplier, max_delay)` from
/// `initial_delay_ms`. Cancellation aborts immediately, including during
/// the backoff sleep. A disabled policy or `max_retries = 0` yields a
/// single attempt.
pub async fn call_with_retry<T, F, Fut>(
    config: &RetryConfig,
    cancel: &CancelToken,
    mut call_fn: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = if config.enabled {
        config.max_retries.max(1)
    } else {
        1
    };
    let mut delay_ms = config.initial_delay_ms;

    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match call_fn().await {
            Ok(response) => return Ok(response),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                // Rate-limit hints override the computed backoff.
                let wait_ms = match &e {
                    Error::RateLimited {
                        retry_after_secs: Some(secs),
                        ..
                    } => secs * 1_000,
                    _ => delay_ms,
                };
                tracing::warn!(
                    attempt,
                    max_attempts,
                    wait_ms,
                    error = %e,
                    "LLM call failed, backing off"
                );
                if wait_with_cancellation(wait_ms, cancel).await {
                    return Err(Error::Cancelled);
                }
                delay_ms = ((delay_ms as f64) * config.multiplier) as u64;
                delay_ms = delay_ms.min(config.max_delay_ms);
            }
            Err(e) => {
                return Err(match e {
                    Error::Cancelled | Error::Timeout(_) => e,
                    e if e.is_retryable() => Error::Upstream(format!(
                        "LLM call failed after {max_attempts} attempts: {e}"
                    )),
                    e => e,
                });
            }
        }
    }

    // The final attempt always returns above.
    Err(Error::Internal("retry loop exited without a result".into()))
}

/// Sleep for `wait_ms`, waking early on cancellation.
///
/// Returns `true` if cancelled, `false` if the wait completed normally.
async fn wait_with_cancellation(wait_ms: u64, cancel: &CancelToken) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(wait_ms);
    // The token is a plain flag, so poll it at a coarse interval while
    // sleeping toward the deadline.
    loop {
        if cancel.is_cancelled() {
            return true;
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return false;
        }
        let step = Duration::from_millis(10).min(deadline - now);
        tokio::time::sleep(step).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            enabled: true,
            max_retries,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn succeeds_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result = call_with_retry(&fast_config(3), &CancelToken::new(), move || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Error>(42)
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_retryable_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result = call_with_retry(&fast_config(3), &CancelToken::new(), move || {
            let calls = calls2.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(Error::Upstream("503".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_surfaces_upstream() {
        let result: Result<u32> =
            call_with_retry(&fast_config(2), &CancelToken::new(), || async {
                Err(Error::Upstream("always down".into()))
            })
            .await;
        match result {
            Err(Error::Upstream(msg)) => assert!(msg.contains("2 attempts")),
            other => panic!("expected Upstream, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_retryable_fails_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<u32> =
            call_with_retry(&fast_config(5), &CancelToken::new(), move || {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::InvalidInput("bad schema".into()))
                }
            })
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disabled_policy_single_attempt() {
        let config = RetryConfig {
            enabled: false,
            ..fast_config(5)
        };
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<u32> = call_with_retry(&config, &CancelToken::new(), move || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Upstream("down".into()))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_during_backoff_stops_retrying() {
        let config = RetryConfig {
            enabled: true,
            max_retries: 5,
            initial_delay_ms: 5_000,
            max_delay_ms: 10_000,
            multiplier: 2.0,
        };
        let cancel = CancelToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let cancel2 = cancel.clone();

        let result: Result<u32> = call_with_retry(&config, &cancel, move || {
            let calls = calls2.clone();
            let cancel = cancel2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                // Cancel while the retry layer is sleeping.
                cancel.cancel();
                Err(Error::Upstream("503".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1, "no further attempt after cancel");
    }

    #[tokio::test]
    async fn already_cancelled_never_calls() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let result: Result<u32> =
            call_with_retry(&fast_config(3), &cancel, || async { Ok(1) }).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
