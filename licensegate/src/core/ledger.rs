//! In-process concurrency slot bookkeeping
//!
//! The ledger counts held slots per `(identity, check-key)`. A successful
//! acquisition hands out a [`SlotGuard`]; the guard gives its slot back
//! exactly once, either through [`SlotGuard::release`] or when dropped.

use super::HashMap;
use super::snapshot::CheckKey;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Ledger key: which instance holds slots against which check-key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotKey {
    identity: Arc<str>,
    check_key: CheckKey,
}

impl SlotKey {
    pub fn new(identity: impl Into<Arc<str>>, check_key: CheckKey) -> Self {
        SlotKey {
            identity: identity.into(),
            check_key,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn check_key(&self) -> &CheckKey {
        &self.check_key
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.identity, self.check_key)
    }
}

/// Returned by [`ConcurrencyLedger::try_acquire`] when every slot is taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotsExhausted {
    pub in_use: u64,
    pub max: u64,
}

impl fmt::Display for SlotsExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "concurrency exceeded: {} >= {}", self.in_use, self.max)
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    counts: HashMap<SlotKey, u64>,
    // Bumped by `clear` so guards from before the clear cannot release
    // slots acquired after it.
    generation: u64,
}

/// Shared in-use counters for concurrency slots
///
/// One ledger belongs to one client; clones share the same counters. Counts
/// never go below zero and an entry is removed as soon as it reaches zero.
///
/// # Example
///
/// ```
/// use licensegate::{CheckKey, ConcurrencyLedger, SlotKey};
///
/// let ledger = ConcurrencyLedger::new();
/// let key = SlotKey::new("instance-a", CheckKey::product());
///
/// let first = ledger.try_acquire(key.clone(), 1).unwrap();
/// assert!(ledger.try_acquire(key.clone(), 1).is_err());
///
/// first.release();
/// first.release(); // no effect
/// assert_eq!(ledger.in_use(&key), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl ConcurrencyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one slot for `key` if fewer than `max` are held
    ///
    /// A denial leaves the ledger untouched.
    pub fn try_acquire(&self, key: SlotKey, max: u64) -> Result<SlotGuard, SlotsExhausted> {
        let mut state = self.state.lock();

        let in_use = state.counts.get(&key).copied().unwrap_or(0);
        if in_use >= max {
            return Err(SlotsExhausted { in_use, max });
        }

        state.counts.insert(key.clone(), in_use + 1);
        let generation = state.generation;
        drop(state);

        Ok(SlotGuard {
            state: Arc::clone(&self.state),
            key,
            generation,
            released: AtomicBool::new(false),
        })
    }

    /// Slots currently held for `key`
    pub fn in_use(&self, key: &SlotKey) -> u64 {
        self.state.lock().counts.get(key).copied().unwrap_or(0)
    }

    /// Number of keys with at least one held slot
    pub fn len(&self) -> usize {
        self.state.lock().counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().counts.is_empty()
    }

    /// Abandon every held slot
    ///
    /// Guards handed out before the clear become inert.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.counts.clear();
        state.generation = state.generation.wrapping_add(1);
    }
}

/// One held concurrency slot
///
/// The slot is returned on the first call to [`release`](SlotGuard::release)
/// or when the guard is dropped, whichever comes first. Dropping covers
/// early returns, `?` and panics in the guarded operation.
#[must_use = "dropping the guard releases the slot immediately"]
#[derive(Debug)]
pub struct SlotGuard {
    state: Arc<Mutex<LedgerState>>,
    key: SlotKey,
    generation: u64,
    released: AtomicBool,
}

impl SlotGuard {
    /// Give the slot back; calls after the first are no-ops
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut state = self.state.lock();
        if state.generation != self.generation {
            return;
        }

        match state.counts.get(&self.key).copied() {
            Some(count) if count > 1 => {
                state.counts.insert(self.key.clone(), count - 1);
            }
            Some(_) => {
                state.counts.remove(&self.key);
            }
            None => {}
        }
    }

    pub fn key(&self) -> &SlotKey {
        &self.key
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.release();
    }
}
