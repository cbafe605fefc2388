//! Per-tool circuit breakers.
//!
//! A run of consecutive failures opens the circuit; while open, calls
//! fail fast with `CircuitOpen`. After the cooldown one probe call is
//! allowed through; its outcome closes or re-opens the circuit.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use strand_domain::error::{Error, Result};

const DEFAULT_THRESHOLD: u32 = 5;
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Default)]
struct BreakerState {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    state: Mutex<HashMap<String, BreakerState>>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, DEFAULT_COOLDOWN)
    }
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Gate a call. `Ok` arms the breaker (half-open probes included);
    /// `Err(CircuitOpen)` means fail fast without executing.
    pub fn check_and_arm(&self, tool_name: &str) -> Result<()> {
        let mut state = self.state.lock();
        let entry = state.entry(tool_name.to_owned()).or_default();
        if let Some(opened_at) = entry.opened_at {
            if opened_at.elapsed() < self.cooldown {
                return Err(Error::CircuitOpen(format!(
                    "tool {tool_name} disabled after {} consecutive failures",
                    entry.consecutive_failures
                )));
            }
            // Cooldown over: allow one probe through.
            tracing::debug!(tool = tool_name, "circuit half-open, probing");
        }
        Ok(())
    }

    pub fn record_success(&self, tool_name: &str) {
        let mut state = self.state.lock();
        if let Some(entry) = state.get_mut(tool_name) {
            entry.consecutive_failures = 0;
            entry.opened_at = None;
        }
    }

    pub fn record_failure(&self, tool_name: &str) {
        let mut state = self.state.lock();
        let entry = state.entry(tool_name.to_owned()).or_default();
        entry.consecutive_failures += 1;
        if entry.consecutive_failures >= self.threshold {
            if entry.opened_at.is_none() {
                tracing::warn!(
                    tool = tool_name,
                    failures = entry.consecutive_failures,
                    "circuit opened"
                );
            }
            entry.opened_at = Some(Instant::now());
        }
    }

    pub fn is_open(&self, tool_name: &str) -> bool {
        let state = self.state.lock();
        state
            .get(tool_name)
            .and_then(|e| e.opened_at)
            .is_some_and(|at| at.elapsed() < self.cooldown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        for _ in 0..2 {
            breaker.record_failure("flaky");
        }
        assert!(breaker.check_and_arm("flaky").is_ok());
        breaker.record_failure("flaky");
        assert!(breaker.is_open("flaky"));
        assert!(matches!(
            breaker.check_and_arm("flaky"),
            Err(Error::CircuitOpen(_))
        ));
    }

    #[test]
    fn success_closes() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        breaker.record_failure("t");
        breaker.record_failure("t");
        assert!(breaker.is_open("t"));
        breaker.record_success("t");
        assert!(!breaker.is_open("t"));
        assert!(breaker.check_and_arm("t").is_ok());
    }

    #[test]
    fn half_open_after_cooldown() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0));
        breaker.record_failure("t");
        // Cooldown of zero: immediately half-open, probe allowed.
        assert!(breaker.check_and_arm("t").is_ok());
    }

    #[test]
    fn breakers_are_per_tool() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        breaker.record_failure("bad");
        assert!(breaker.check_and_arm("good").is_ok());
        assert!(breaker.check_and_arm("bad").is_err());
    }
}
