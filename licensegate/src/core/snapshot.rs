//! Authorization snapshots and the keys they are stored under
//!
//! A snapshot is the authority's answer for one check-key at one point in
//! time. Snapshots are immutable: a refresh replaces the whole value.

use std::fmt;
use std::sync::Arc;

/// Reserved check-key meaning "whole-product limits" rather than one feature
pub const PRODUCT_KEY: &str = "__product__";

/// Identifier used to look up an authorization snapshot
///
/// Either a named feature or the reserved [`PRODUCT_KEY`]. Cloning is cheap.
///
/// # Example
///
/// ```
/// use licensegate::CheckKey;
///
/// let product = CheckKey::product();
/// assert!(product.is_product());
///
/// let feature = CheckKey::feature("advanced_analytics");
/// assert_eq!(feature.as_str(), "advanced_analytics");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CheckKey(Arc<str>);

impl CheckKey {
    /// Key for a single named feature
    pub fn feature(id: impl Into<String>) -> Self {
        CheckKey(Arc::from(id.into()))
    }

    /// Key for the whole-product limits
    pub fn product() -> Self {
        CheckKey(Arc::from(PRODUCT_KEY))
    }

    pub fn is_product(&self) -> bool {
        &*self.0 == PRODUCT_KEY
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CheckKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CheckKey {
    fn from(id: &str) -> Self {
        CheckKey(Arc::from(id))
    }
}

impl From<String> for CheckKey {
    fn from(id: String) -> Self {
        CheckKey(Arc::from(id))
    }
}

/// Quota block reported by the authority
///
/// `remaining` is informational. The authority stays the source of truth and
/// the value is only advisory between refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuotaInfo {
    pub limit: i64,
    pub used: i64,
    pub remaining: i64,
    /// Unix time (seconds) at which the quota resets
    pub reset_at: i64,
}

impl QuotaInfo {
    /// Build a quota block, deriving `remaining` as `max(0, limit - used)`
    pub fn new(limit: i64, used: i64, reset_at: i64) -> Self {
        QuotaInfo {
            limit,
            used,
            remaining: limit.saturating_sub(used).max(0),
            reset_at,
        }
    }

    /// Remaining quota clamped at zero, as an unsigned amount
    pub fn remaining_units(&self) -> u64 {
        self.remaining.max(0) as u64
    }
}

/// Result of the most recent check against the authority for one check-key
///
/// Limit fields that are absent, zero or negative mean "not configured".
/// Use the `*_limit` accessors instead of reading the raw fields when making
/// decisions.
///
/// # Example
///
/// ```
/// use licensegate::{AuthorizationSnapshot, QuotaInfo};
///
/// let snapshot = AuthorizationSnapshot::admitted()
///     .with_quota(QuotaInfo::new(1000, 0, 0))
///     .with_max_concurrency(2);
///
/// assert!(snapshot.admitted);
/// assert_eq!(snapshot.concurrency_limit(), Some(2));
/// assert_eq!(snapshot.capacity_limit(), None);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AuthorizationSnapshot {
    pub admitted: bool,
    pub reason: Option<String>,
    pub quota: Option<QuotaInfo>,
    pub max_capacity: Option<u64>,
    pub max_rate_per_second: Option<f64>,
    pub max_concurrency: Option<u64>,
}

impl AuthorizationSnapshot {
    /// An admitting snapshot with no limits configured
    pub fn admitted() -> Self {
        AuthorizationSnapshot {
            admitted: true,
            ..Default::default()
        }
    }

    /// A denying snapshot carrying the authority's reason
    pub fn denied(reason: impl Into<String>) -> Self {
        AuthorizationSnapshot {
            admitted: false,
            reason: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn with_quota(mut self, quota: QuotaInfo) -> Self {
        self.quota = Some(quota);
        self
    }

    pub fn with_max_capacity(mut self, max: u64) -> Self {
        self.max_capacity = Some(max);
        self
    }

    pub fn with_max_rate(mut self, per_second: f64) -> Self {
        self.max_rate_per_second = Some(per_second);
        self
    }

    pub fn with_max_concurrency(mut self, max: u64) -> Self {
        self.max_concurrency = Some(max);
        self
    }

    /// Configured capacity limit, `None` when unset or zero
    pub fn capacity_limit(&self) -> Option<u64> {
        self.max_capacity.filter(|max| *max > 0)
    }

    /// Configured rate limit in events per second, `None` when unset, zero or not a number
    pub fn rate_limit(&self) -> Option<f64> {
        self.max_rate_per_second.filter(|max| *max > 0.0)
    }

    /// Configured concurrency limit, `None` when unset or zero
    pub fn concurrency_limit(&self) -> Option<u64> {
        self.max_concurrency.filter(|max| *max > 0)
    }

    /// Remaining quota as reported by the authority, zero without a quota block
    pub fn remaining_quota(&self) -> u64 {
        self.quota.map(|q| q.remaining_units()).unwrap_or(0)
    }
}
