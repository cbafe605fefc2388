//! Process-wide result store.
//!
//! The only global state in the core, together with the built-in tool
//! name registry. Initialized on first use, torn down at process exit.

use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::memory::MemoryResultStore;

static GLOBAL: Lazy<Arc<MemoryResultStore>> = Lazy::new(|| Arc::new(MemoryResultStore::new()));

/// The shared in-memory result store. Embedders that want SQL-backed
/// persistence construct a [`crate::SqliteResultStore`] and pass it to
/// the runtime explicitly.
pub fn global_store() -> Arc<MemoryResultStore> {
    GLOBAL.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_is_a_singleton() {
        let a = global_store();
        let b = global_store();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
