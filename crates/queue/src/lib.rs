//! frpo queue: the trigger substrate driving reconcile passes.
//!
//! Keys are coalesced while waiting, a key is never handed to two workers at
//! once, and requeues can be delayed or backed off per key.

#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

pub mod worker;

pub use worker::{spawn_trigger_pump, spawn_workers, ErrorClass, Handler, Requeue};

pub const BACKOFF_BASE: Duration = Duration::from_millis(5);
pub const BACKOFF_MAX: Duration = Duration::from_secs(1000);
/// How long a key evicted from a full ready queue waits before it is offered again.
pub const EVICTION_RETRY: Duration = Duration::from_secs(1);

struct State<K> {
    ready: VecDeque<K>,
    queued: FxHashSet<K>,
    processing: FxHashSet<K>,
    /// Re-added while processing; released by `done`.
    dirty: FxHashSet<K>,
    delayed: FxHashMap<K, Instant>,
    failures: FxHashMap<K, u32>,
    cap: usize,
    dropped: u64,
    shutdown: bool,
}

impl<K: Eq + Hash + Clone> State<K> {
    fn enqueue(&mut self, key: K) -> bool {
        if self.processing.contains(&key) {
            self.dirty.insert(key);
            return false;
        }
        if self.queued.contains(&key) { return false; }
        if self.ready.len() >= self.cap {
            if let Some(old) = self.ready.pop_front() {
                self.queued.remove(&old);
                self.dropped += 1;
                // evicted, not forgotten: the key comes back once there is room
                self.park(old, Instant::now() + EVICTION_RETRY);
            }
        }
        self.queued.insert(key.clone());
        self.ready.push_back(key);
        true
    }

    fn park(&mut self, key: K, at: Instant) {
        let slot = self.delayed.entry(key).or_insert(at);
        if at < *slot { *slot = at; }
    }

    fn promote_due(&mut self, now: Instant) {
        let mut due: Vec<(K, Instant)> = self.delayed.iter().filter(|(_, at)| **at <= now).map(|(k, at)| (k.clone(), *at)).collect();
        if due.is_empty() { return; }
        due.sort_by_key(|(_, at)| *at);
        for (k, _) in due {
            self.delayed.remove(&k);
            self.enqueue(k);
        }
    }

    fn pop_ready(&mut self) -> Option<K> {
        let key = self.ready.pop_front()?;
        self.queued.remove(&key);
        self.processing.insert(key.clone());
        Some(key)
    }

    fn next_deadline(&self) -> Option<Instant> { self.delayed.values().min().copied() }
}

/// Work queue keyed by object identity.
pub struct WorkQueue<K> {
    state: Mutex<State<K>>,
    notify: Notify,
}

impl<K: Eq + Hash + Clone> WorkQueue<K> {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            state: Mutex::new(State {
                ready: VecDeque::new(),
                queued: FxHashSet::default(),
                processing: FxHashSet::default(),
                dirty: FxHashSet::default(),
                delayed: FxHashMap::default(),
                failures: FxHashMap::default(),
                cap: cap.max(1),
                dropped: 0,
                shutdown: false,
            }),
            notify: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State<K>> {
        // Critical sections never panic midway; a poisoned lock still holds consistent state.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of keys ready to be handed out.
    pub fn len(&self) -> usize { self.state().ready.len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
    /// Evictions from a full ready queue; each evicted key is retried after `EVICTION_RETRY`.
    pub fn dropped(&self) -> u64 { self.state().dropped }

    /// Queue `key` now. Duplicates coalesce; keys in flight are parked until `done`.
    pub fn add(&self, key: K) {
        let mut st = self.state();
        if st.shutdown { return; }
        st.delayed.remove(&key);
        if st.enqueue(key) {
            drop(st);
            self.notify.notify_waiters();
        }
    }

    /// Queue `key` after `delay`; the earliest pending deadline wins.
    pub fn add_after(&self, key: K, delay: Duration) {
        if delay.is_zero() { return self.add(key); }
        let at = Instant::now() + delay;
        let mut st = self.state();
        if st.shutdown { return; }
        st.park(key, at);
        drop(st);
        self.notify.notify_waiters();
    }

    /// Requeue after the next exponential backoff step and return that delay.
    pub fn backoff(&self, key: K) -> Duration {
        let delay = {
            let mut st = self.state();
            let n = st.failures.entry(key.clone()).or_insert(0);
            *n = n.saturating_add(1);
            backoff_delay(*n)
        };
        self.add_after(key, delay);
        delay
    }

    /// Reset the backoff of `key`.
    pub fn forget(&self, key: &K) { self.state().failures.remove(key); }

    pub fn failures(&self, key: &K) -> u32 { self.state().failures.get(key).copied().unwrap_or(0) }

    /// Mark `key` as no longer in flight.
    pub fn done(&self, key: &K) {
        let mut st = self.state();
        st.processing.remove(key);
        let requeued = st.dirty.remove(key) && !st.shutdown && st.enqueue(key.clone());
        drop(st);
        if requeued { self.notify.notify_waiters(); }
    }

    /// Wait for the next ready key. Returns `None` once shut down.
    pub async fn next(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let deadline = {
                let mut st = self.state();
                if st.shutdown { return None; }
                st.promote_due(Instant::now());
                if let Some(k) = st.pop_ready() { return Some(k); }
                st.next_deadline()
            };
            match deadline {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    pub fn shutdown(&self) {
        self.state().shutdown = true;
        debug!("work queue shut down");
        self.notify.notify_waiters();
    }
}

/// `BACKOFF_BASE * 2^(failures-1)`, capped at `BACKOFF_MAX`.
pub fn backoff_delay(failures: u32) -> Duration {
    let exp = failures.saturating_sub(1).min(31);
    BACKOFF_BASE.checked_mul(1u32 << exp).map_or(BACKOFF_MAX, |d| d.min(BACKOFF_MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_millis(5));
        assert_eq!(backoff_delay(2), Duration::from_millis(10));
        assert_eq!(backoff_delay(5), Duration::from_millis(80));
        assert_eq!(backoff_delay(40), BACKOFF_MAX);
    }

    #[test]
    fn add_coalesces_duplicates() {
        let q = WorkQueue::with_capacity(8);
        q.add("a");
        q.add("b");
        q.add("a");
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn full_queue_evicts_oldest() {
        let q = WorkQueue::with_capacity(2);
        q.add(1);
        q.add(2);
        q.add(3);
        assert_eq!(q.len(), 2);
        assert_eq!(q.dropped(), 1);
    }
}
