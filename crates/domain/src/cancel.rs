//! Cooperative cancellation.
//!
//! One signal per chat call, no global interrupt: the runtime registers
//! a token under the session ID when a chat starts, checks it before and
//! after every suspension point (LLM call, tool call, retry sleep, store
//! operation), and drops the registration when the chat returns.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Shared cancellation flag for one chat call. Clones observe the same
/// signal; once fired it stays fired.
#[derive(Clone, Default)]
pub struct CancelToken {
    fired: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.fired.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

/// The in-flight chat token for each session.
///
/// At most one chat runs per session (the runtime's turn lock enforces
/// that), so a session ID maps to at most one live token. Re-registering
/// replaces a stale entry.
#[derive(Default)]
pub struct CancelMap {
    active: Mutex<HashMap<String, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint and track the token for a starting chat.
    pub fn register(&self, session_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.active
            .lock()
            .insert(session_id.to_owned(), token.clone());
        token
    }

    /// Signal the session's in-flight chat. Returns false when nothing
    /// is registered under the ID.
    pub fn cancel(&self, session_id: &str) -> bool {
        match self.active.lock().get(session_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop the registration once the chat has returned.
    pub fn remove(&self, session_id: &str) {
        self.active.lock().remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_is_shared_across_clones() {
        let token = CancelToken::new();
        let observer = token.clone();
        assert!(!observer.is_cancelled());

        token.cancel();
        token.cancel(); // idempotent
        assert!(observer.is_cancelled());
    }

    #[test]
    fn map_signals_only_the_registered_session() {
        let map = CancelMap::new();
        let alpha = map.register("alpha");
        let beta = map.register("beta");

        assert!(map.cancel("alpha"));
        assert!(alpha.is_cancelled());
        assert!(!beta.is_cancelled());
    }

    #[test]
    fn unregistered_session_is_a_noop() {
        let map = CancelMap::new();
        assert!(!map.cancel("nobody-home"));
    }

    #[test]
    fn remove_clears_the_entry() {
        let map = CancelMap::new();
        let token = map.register("s1");
        map.remove("s1");
        map.remove("s1"); // second remove is harmless

        // The chat already returned; a late cancel finds nothing and
        // the token held by the finished chat stays untouched.
        assert!(!map.cancel("s1"));
        assert!(!token.is_cancelled());
    }

    #[test]
    fn reregistration_replaces_the_stale_token() {
        let map = CancelMap::new();
        let stale = map.register("s1");
        let fresh = map.register("s1");

        map.cancel("s1");
        assert!(fresh.is_cancelled());
        assert!(!stale.is_cancelled());
    }
}
