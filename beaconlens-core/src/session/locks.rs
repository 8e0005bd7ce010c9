//! Per-session-key mutual exclusion.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// Keyed mutex map: one lock per session key, no lock shared across keys.
///
/// Entries exist only while some caller holds or waits on them.
#[derive(Debug, Default)]
pub struct SessionLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `key`.
    pub fn with_lock<T>(&self, key: &str, f: impl FnOnce() -> T) -> T {
        let lock = self.locks.entry(key.to_string()).or_default().clone();

        let out = {
            let _guard = lock.lock();
            f()
        };

        drop(lock);
        // Only the map's own reference left: nobody is waiting.
        self.locks.remove_if(key, |_, l| Arc::strong_count(l) == 1);
        out
    }

    /// Number of keys currently locked or contended.
    pub fn in_use(&self) -> usize {
        self.locks.len()
    }
}
