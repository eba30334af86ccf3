//! TTL cache of authorization snapshots
//!
//! The cache only stores and expires snapshots. It never talks to the
//! authority; refreshing on a miss is the caller's job.

use super::HashMap;
use super::snapshot::{AuthorizationSnapshot, CheckKey};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};

// Configuration constants
const DEFAULT_TTL_SECS: u64 = 10;

/// A cached snapshot together with its expiry
#[derive(Debug, Clone)]
pub struct CacheEntry {
    snapshot: Arc<AuthorizationSnapshot>,
    // `None` when `now + ttl` does not fit in an `Instant`
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(snapshot: Arc<AuthorizationSnapshot>, ttl: Duration, now: Instant) -> Self {
        CacheEntry {
            snapshot,
            expires_at: now.checked_add(ttl),
        }
    }

    pub fn snapshot(&self) -> &Arc<AuthorizationSnapshot> {
        &self.snapshot
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    /// True while `now < expires_at`
    pub fn is_fresh(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(expires_at) => now < expires_at,
            None => true,
        }
    }
}

/// Most recent authorization snapshot per check-key
///
/// Reads take a shared lock, so any number of admission calls can hit the
/// cache at once. Writes replace entries wholesale.
///
/// # Example
///
/// ```
/// use licensegate::{AuthorizationCache, AuthorizationSnapshot, CheckKey};
/// use std::time::{Duration, Instant};
///
/// let cache = AuthorizationCache::new(Duration::from_secs(10));
/// let key = CheckKey::product();
/// let now = Instant::now();
///
/// cache.put(key.clone(), AuthorizationSnapshot::admitted(), cache.default_ttl(), now);
/// assert!(cache.get(&key, now).is_some());
/// assert!(cache.get(&key, now + Duration::from_secs(10)).is_none());
/// ```
#[derive(Debug)]
pub struct AuthorizationCache {
    entries: RwLock<HashMap<CheckKey, CacheEntry>>,
    default_ttl: Duration,
}

impl Default for AuthorizationCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TTL_SECS))
    }
}

impl AuthorizationCache {
    /// Create an empty cache that uses `default_ttl` when the authority suggests none
    pub fn new(default_ttl: Duration) -> Self {
        AuthorizationCache {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Lifetime to store a fresh snapshot with
    ///
    /// A non-zero server suggestion wins over the configured default.
    pub fn effective_ttl(&self, suggested: Option<Duration>) -> Duration {
        suggested
            .filter(|ttl| !ttl.is_zero())
            .unwrap_or(self.default_ttl)
    }

    /// Return the cached snapshot for `key` if it is still fresh at `now`
    pub fn get(&self, key: &CheckKey, now: Instant) -> Option<Arc<AuthorizationSnapshot>> {
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|entry| entry.is_fresh(now))
            .map(|entry| Arc::clone(&entry.snapshot))
    }

    /// Store `snapshot` for `key`, replacing any existing entry
    pub fn put(
        &self,
        key: CheckKey,
        snapshot: impl Into<Arc<AuthorizationSnapshot>>,
        ttl: Duration,
        now: Instant,
    ) {
        let entry = CacheEntry::new(snapshot.into(), ttl, now);
        self.entries.write().insert(key, entry);
    }

    /// Remove the entry for `key`; returns whether one existed
    pub fn invalidate(&self, key: &CheckKey) -> bool {
        self.entries.write().remove(key).is_some()
    }

    pub fn invalidate_all(&self) {
        self.entries.write().clear();
    }

    /// Drop every entry that is expired at `now`, returning how many were removed
    pub fn purge_expired(&self, now: Instant) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(now));
        before - entries.len()
    }

    /// Number of stored entries, fresh or not
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
