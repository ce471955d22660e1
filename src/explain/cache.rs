//! Run-scoped single-flight store.
//!
//! A key is computed by exactly one caller (the leader). Callers that arrive while the
//! leader is working block on the key's slot and share the leader's value. If the leader
//! unwinds before settling, the slot is abandoned and the waiters race to lead a fresh one.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

enum SlotState<V> {
    Pending,
    Ready(Arc<V>),
    /// Settled with a fallback value; visible for the rest of the run, evicted at the next
    Failed(Arc<V>),
    Abandoned,
}

struct Slot<V> {
    state: Mutex<SlotState<V>>,
    settled: Condvar,
}

impl<V> Slot<V> {
    fn pending() -> Self {
        Self {
            state: Mutex::new(SlotState::Pending),
            settled: Condvar::new(),
        }
    }
}

/// How a lookup obtained its value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupSource {
    /// This caller ran the computation
    Computed,
    /// Already settled when the caller arrived
    Cached,
    /// Blocked on another caller's in-flight computation
    Joined,
    /// The cache was not consulted
    Bypassed,
}

#[derive(Debug, Clone)]
pub struct Lookup<V> {
    pub value: Arc<V>,
    pub source: LookupSource,
    /// The value is a fallback rather than a fresh result
    pub failed: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub waits: u64,
    pub entries: usize,
}

pub struct SingleFlight<K, V>
where
    K: Eq + Hash,
{
    slots: DashMap<K, Arc<Slot<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    waits: AtomicU64,
}

/// Publishes `Abandoned` if the leader never settles its slot
struct LeaderGuard<'a, K: Eq + Hash, V> {
    slots: &'a DashMap<K, Arc<Slot<V>>>,
    key: &'a K,
    slot: &'a Arc<Slot<V>>,
    settled: bool,
}

impl<K: Eq + Hash, V> Drop for LeaderGuard<'_, K, V> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        warn!("single-flight leader unwound before settling, abandoning slot");
        self.slots
            .remove_if(self.key, |_, slot| Arc::ptr_eq(slot, self.slot));
        *self.slot.state.lock() = SlotState::Abandoned;
        self.slot.settled.notify_all();
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            waits: AtomicU64::new(0),
        }
    }

    /// Value for `key`, running `compute` only if no other caller has or is producing it.
    ///
    /// `compute` returns `Ok` for a fresh value and `Err` for a fallback; both are
    /// shared with every caller of the key, but only fallbacks are evicted by
    /// [`SingleFlight::evict_failed`].
    pub fn get_or_compute<F>(&self, key: K, compute: F) -> Lookup<V>
    where
        F: FnOnce() -> Result<V, V>,
    {
        let slot = loop {
            let (slot, leader) = match self.slots.entry(key.clone()) {
                Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
                Entry::Vacant(entry) => {
                    let slot = Arc::new(Slot::pending());
                    entry.insert(Arc::clone(&slot));
                    (slot, true)
                }
            };
            if leader {
                break slot;
            }

            let mut state = slot.state.lock();
            let mut waited = false;
            while matches!(*state, SlotState::Pending) {
                if !waited {
                    waited = true;
                    self.waits.fetch_add(1, Ordering::Relaxed);
                    debug!("joining in-flight computation");
                }
                slot.settled.wait(&mut state);
            }
            let source = if waited {
                LookupSource::Joined
            } else {
                self.hits.fetch_add(1, Ordering::Relaxed);
                LookupSource::Cached
            };
            match &*state {
                SlotState::Ready(value) => {
                    return Lookup {
                        value: Arc::clone(value),
                        source,
                        failed: false,
                    }
                }
                SlotState::Failed(value) => {
                    return Lookup {
                        value: Arc::clone(value),
                        source,
                        failed: true,
                    }
                }
                SlotState::Abandoned | SlotState::Pending => continue,
            }
        };

        self.misses.fetch_add(1, Ordering::Relaxed);
        let mut guard = LeaderGuard {
            slots: &self.slots,
            key: &key,
            slot: &slot,
            settled: false,
        };

        let (value, failed) = match compute() {
            Ok(value) => (Arc::new(value), false),
            Err(fallback) => (Arc::new(fallback), true),
        };

        *slot.state.lock() = if failed {
            SlotState::Failed(Arc::clone(&value))
        } else {
            SlotState::Ready(Arc::clone(&value))
        };
        guard.settled = true;
        slot.settled.notify_all();

        Lookup {
            value,
            source: LookupSource::Computed,
            failed,
        }
    }

    /// Settled value for `key`, without computing or waiting
    pub fn peek(&self, key: &K) -> Option<Arc<V>> {
        let slot = self.slots.get(key).map(|s| Arc::clone(s.value()))?;
        let state = slot.state.lock();
        match &*state {
            SlotState::Ready(value) | SlotState::Failed(value) => Some(Arc::clone(value)),
            _ => None,
        }
    }

    /// Drop every fallback entry so the next run retries those keys. Returns how many went.
    pub fn evict_failed(&self) -> usize {
        let before = self.slots.len();
        self.slots
            .retain(|_, slot| !matches!(*slot.state.lock(), SlotState::Failed(_)));
        before.saturating_sub(self.slots.len())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            waits: self.waits.load(Ordering::Relaxed),
            entries: self.slots.len(),
        }
    }
}
