//! Record-key locking for concurrent ingest batches.
//!
//! Two batches whose key sets are disjoint run fully in parallel; batches
//! that share any key are serialized so their store writes never interleave.
//! Whole-batch granularity keeps the protocol simple: a batch holds all of
//! its keys for the duration of its store writes.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

/// Set-based lock over record keys.
#[derive(Debug, Default)]
pub struct KeyLock {
    held: Mutex<HashSet<String>>,
    notify: Notify,
}

impl KeyLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> MutexGuard<'_, HashSet<String>> {
        // The critical sections never panic, but recover from poisoning
        // anyway rather than propagating it
        self.held.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Acquire all of `keys`, waiting until none of them is held by another
    /// batch. The returned guard releases them on drop.
    pub async fn acquire(self: &Arc<Self>, keys: Vec<String>) -> KeyGuard {
        loop {
            // Register for notification before checking, so a release
            // between the check and the await is not missed
            let notified = self.notify.notified();

            {
                let mut held = self.held();
                if keys.iter().all(|key| !held.contains(key)) {
                    for key in &keys {
                        held.insert(key.clone());
                    }
                    return KeyGuard {
                        lock: Arc::clone(self),
                        keys,
                    };
                }
            }

            notified.await;
        }
    }

    /// Number of keys currently held across all batches.
    pub fn held_count(&self) -> usize {
        self.held().len()
    }
}

/// Holds a batch's keys; releases them when dropped.
#[derive(Debug)]
pub struct KeyGuard {
    lock: Arc<KeyLock>,
    keys: Vec<String>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        let mut held = self.lock.held();
        for key in &self.keys {
            held.remove(key);
        }
        drop(held);
        self.lock.notify.notify_waiters();
    }
}
