//! # Connection Admission Gate
//!
//! Limits the number of simultaneous WebSocket sessions per source address.
//! The tracker is constructed once at startup and injected through
//! `AppState`; it is the only state shared across relay sessions.
//!
//! Acquisition is scoped: `try_acquire` hands out a guard whose `Drop`
//! releases the slot, so the decrement happens exactly once on every exit
//! path a session can take, including a panicking session task. The lock
//! protects nothing but the counter map; no I/O happens while it is held.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Process-wide count of active sessions per source address.
#[derive(Debug)]
pub struct ConnectionTracker {
    ceiling: usize,
    active: Mutex<HashMap<String, usize>>,
}

impl ConnectionTracker {
    pub fn new(ceiling: usize) -> Self {
        Self {
            ceiling,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Atomically check the ceiling and claim a slot for `addr`.
    ///
    /// Returns `None` when the address is already at the ceiling; the
    /// connection must then be rejected, not queued.
    pub fn try_acquire(self: &Arc<Self>, addr: &str) -> Option<ConnectionGuard> {
        let mut active = self.active.lock().unwrap();
        let count = active.entry(addr.to_string()).or_insert(0);
        if *count >= self.ceiling {
            warn!("Rejecting connection from {}: {} active sessions at ceiling", addr, count);
            return None;
        }
        *count += 1;

        Some(ConnectionGuard {
            tracker: Arc::clone(self),
            addr: addr.to_string(),
        })
    }

    /// Current active-session count for an address (zero when untracked).
    pub fn active_count(&self, addr: &str) -> usize {
        self.active.lock().unwrap().get(addr).copied().unwrap_or(0)
    }

    fn release(&self, addr: &str) {
        let mut active = self.active.lock().unwrap();
        match active.get_mut(addr) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                // Last session for this address; prune the entry.
                active.remove(addr);
            }
            None => {
                // release without acquire would be a bookkeeping bug
                warn!("Connection release for untracked address {}", addr);
            }
        }
    }
}

/// RAII handle for one admitted session slot.
///
/// Held by the relay session for its whole lifetime; dropping it (actor
/// stopped, task panicked, anything) releases the slot.
#[derive(Debug)]
pub struct ConnectionGuard {
    tracker: Arc<ConnectionTracker>,
    addr: String,
}

impl ConnectionGuard {
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker.release(&self.addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceiling_enforced() {
        let tracker = Arc::new(ConnectionTracker::new(3));

        let g1 = tracker.try_acquire("192.0.2.1").unwrap();
        let g2 = tracker.try_acquire("192.0.2.1").unwrap();
        let g3 = tracker.try_acquire("192.0.2.1").unwrap();
        assert_eq!(tracker.active_count("192.0.2.1"), 3);

        // Fourth connection from the same address is rejected.
        assert!(tracker.try_acquire("192.0.2.1").is_none());

        // A different address is unaffected.
        let other = tracker.try_acquire("192.0.2.2").unwrap();
        drop(other);

        // Releasing one slot admits a new session.
        drop(g2);
        let g4 = tracker.try_acquire("192.0.2.1").unwrap();
        assert_eq!(tracker.active_count("192.0.2.1"), 3);

        drop(g1);
        drop(g3);
        drop(g4);
        assert_eq!(tracker.active_count("192.0.2.1"), 0);
    }

    #[test]
    fn test_zero_count_entries_pruned() {
        let tracker = Arc::new(ConnectionTracker::new(2));
        let guard = tracker.try_acquire("198.51.100.7").unwrap();
        assert_eq!(guard.addr(), "198.51.100.7");
        drop(guard);

        // The map entry is gone, not sitting at zero.
        assert!(tracker.active.lock().unwrap().is_empty());
    }

    #[test]
    fn test_guard_survives_panic_unwinding() {
        let tracker = Arc::new(ConnectionTracker::new(1));
        let tracker_clone = Arc::clone(&tracker);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = tracker_clone.try_acquire("203.0.113.9").unwrap();
            panic!("session task died");
        }));
        assert!(result.is_err());

        // The slot was released during unwinding.
        assert!(tracker.try_acquire("203.0.113.9").is_some());
    }
}
