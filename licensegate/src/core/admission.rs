//! Local decision rules applied to an authorization snapshot
//!
//! Every admission primitive fetches a snapshot first and then applies one of
//! the rules below. The rules never touch the network and never fail: a
//! denial is an ordinary outcome carrying a [`DenialReason`].
//!
//! Rate checks admit when no limit is configured. Capacity and concurrency
//! checks deny instead, since calling them at all means the caller expects a
//! limit to exist.

use super::ledger::{ConcurrencyLedger, SlotGuard, SlotKey};
use super::snapshot::AuthorizationSnapshot;
use std::fmt;

/// Machine-readable reason attached to every denial
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenialReason {
    /// The authority did not admit the check-key; carries its reason string
    Authority(String),
    RateExceeded,
    CapacityExceeded,
    /// Capacity was checked but the authority configured no capacity limit
    NoCapacityLimit,
    ConcurrencyExceeded,
    /// A slot was requested but the authority configured no concurrency limit
    NoConcurrencyLimit,
}

impl DenialReason {
    pub fn code(&self) -> &str {
        match self {
            DenialReason::Authority(reason) if reason.is_empty() => "not_admitted",
            DenialReason::Authority(reason) => reason.as_str(),
            DenialReason::RateExceeded => "rate_exceeded",
            DenialReason::CapacityExceeded => "capacity_exceeded",
            DenialReason::NoCapacityLimit => "no_capacity_limit",
            DenialReason::ConcurrencyExceeded => "concurrency_exceeded",
            DenialReason::NoConcurrencyLimit => "no_concurrency_limit",
        }
    }

    fn from_snapshot(snapshot: &AuthorizationSnapshot) -> Self {
        DenialReason::Authority(snapshot.reason.clone().unwrap_or_default())
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Result of a consumption check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeOutcome {
    pub admitted: bool,
    /// Locally estimated remaining quota; the authority's value wins on the next refresh
    pub remaining: u64,
    pub reason: Option<DenialReason>,
}

/// Result of a rate check
#[derive(Debug, Clone, PartialEq)]
pub struct RateOutcome {
    pub admitted: bool,
    /// Configured limit, `0.0` when none is configured
    pub max_rate: f64,
    pub current_rate: f64,
    pub reason: Option<DenialReason>,
}

/// Result of a capacity check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityOutcome {
    pub admitted: bool,
    /// Configured limit, `0` when none is configured
    pub max_capacity: u64,
    pub current_used: u64,
    pub reason: Option<DenialReason>,
}

/// Result of a concurrency slot request
#[must_use = "dropping an acquired slot releases it immediately"]
#[derive(Debug)]
pub enum SlotOutcome {
    Acquired(SlotGuard),
    Denied {
        /// Configured limit, `0` when none is configured
        max_concurrency: u64,
        in_use: u64,
        reason: DenialReason,
    },
}

impl SlotOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, SlotOutcome::Acquired(_))
    }

    pub fn reason(&self) -> Option<&DenialReason> {
        match self {
            SlotOutcome::Acquired(_) => None,
            SlotOutcome::Denied { reason, .. } => Some(reason),
        }
    }

    /// The held slot, or `None` on denial
    pub fn into_guard(self) -> Option<SlotGuard> {
        match self {
            SlotOutcome::Acquired(guard) => Some(guard),
            SlotOutcome::Denied { .. } => None,
        }
    }
}

/// Decide a consumption of `amount` units
///
/// Only the snapshot's `admitted` flag gates. On admission the returned
/// remaining quota is `max(0, remaining - amount)`; on denial it is the
/// snapshot's remaining quota unchanged.
///
/// # Example
///
/// ```
/// use licensegate::{AuthorizationSnapshot, QuotaInfo, consumption_gate};
///
/// let snapshot = AuthorizationSnapshot::admitted().with_quota(QuotaInfo::new(10, 0, 0));
///
/// let outcome = consumption_gate(&snapshot, 3);
/// assert!(outcome.admitted);
/// assert_eq!(outcome.remaining, 7);
/// ```
pub fn consumption_gate(snapshot: &AuthorizationSnapshot, amount: u64) -> ConsumeOutcome {
    let remaining = snapshot.remaining_quota();

    if !snapshot.admitted {
        return ConsumeOutcome {
            admitted: false,
            remaining,
            reason: Some(DenialReason::from_snapshot(snapshot)),
        };
    }

    ConsumeOutcome {
        admitted: true,
        remaining: remaining.saturating_sub(amount),
        reason: None,
    }
}

/// Decide whether `current_rate` is within the configured rate limit
///
/// Admits unconditionally when no limit is configured, otherwise admits iff
/// `current_rate <= max`.
pub fn rate_gate(snapshot: &AuthorizationSnapshot, current_rate: f64) -> RateOutcome {
    let Some(max_rate) = snapshot.rate_limit() else {
        return RateOutcome {
            admitted: true,
            max_rate: 0.0,
            current_rate,
            reason: None,
        };
    };

    let admitted = current_rate <= max_rate;
    RateOutcome {
        admitted,
        max_rate,
        current_rate,
        reason: (!admitted).then_some(DenialReason::RateExceeded),
    }
}

/// Decide whether one more unit fits under the configured capacity
///
/// Denies when no limit is configured. Otherwise admits iff
/// `current_used < max`, so reaching the limit exactly denies the next
/// admission.
///
/// # Example
///
/// ```
/// use licensegate::{AuthorizationSnapshot, capacity_gate};
///
/// let unlimited = AuthorizationSnapshot::admitted();
/// assert!(!capacity_gate(&unlimited, 0).admitted);
///
/// let limited = AuthorizationSnapshot::admitted().with_max_capacity(10);
/// assert!(capacity_gate(&limited, 9).admitted);
/// assert!(!capacity_gate(&limited, 10).admitted);
/// ```
pub fn capacity_gate(snapshot: &AuthorizationSnapshot, current_used: u64) -> CapacityOutcome {
    let Some(max_capacity) = snapshot.capacity_limit() else {
        return CapacityOutcome {
            admitted: false,
            max_capacity: 0,
            current_used,
            reason: Some(DenialReason::NoCapacityLimit),
        };
    };

    let admitted = current_used < max_capacity;
    CapacityOutcome {
        admitted,
        max_capacity,
        current_used,
        reason: (!admitted).then_some(DenialReason::CapacityExceeded),
    }
}

/// Try to take a concurrency slot for `key` under the snapshot's limit
///
/// Denies without touching the ledger when no limit is configured or every
/// slot is held.
pub fn acquire_slot(
    snapshot: &AuthorizationSnapshot,
    ledger: &ConcurrencyLedger,
    key: SlotKey,
) -> SlotOutcome {
    let Some(max_concurrency) = snapshot.concurrency_limit() else {
        return SlotOutcome::Denied {
            max_concurrency: 0,
            in_use: ledger.in_use(&key),
            reason: DenialReason::NoConcurrencyLimit,
        };
    };

    match ledger.try_acquire(key, max_concurrency) {
        Ok(guard) => SlotOutcome::Acquired(guard),
        Err(exhausted) => SlotOutcome::Denied {
            max_concurrency,
            in_use: exhausted.in_use,
            reason: DenialReason::ConcurrencyExceeded,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::snapshot::{CheckKey, QuotaInfo};

    #[test]
    fn test_consume_denied_keeps_remaining() {
        let snapshot =
            AuthorizationSnapshot::denied("quota_exceeded").with_quota(QuotaInfo::new(10, 8, 0));

        let outcome = consumption_gate(&snapshot, 1);
        assert!(!outcome.admitted);
        assert_eq!(outcome.remaining, 2);
        assert_eq!(outcome.reason.unwrap().code(), "quota_exceeded");
    }

    #[test]
    fn test_consume_over_remaining_still_admitted_by_flag() {
        let snapshot = AuthorizationSnapshot::admitted().with_quota(QuotaInfo::new(10, 0, 0));

        let outcome = consumption_gate(&snapshot, 15);
        assert!(outcome.admitted);
        assert_eq!(outcome.remaining, 0);
    }

    #[test]
    fn test_denial_without_reason_gets_code() {
        let snapshot = AuthorizationSnapshot::default();

        let outcome = consumption_gate(&snapshot, 1);
        assert_eq!(outcome.remaining, 0);
        assert_eq!(outcome.reason.unwrap().code(), "not_admitted");
    }

    #[test]
    fn test_rate_without_limit_admits() {
        let outcome = rate_gate(&AuthorizationSnapshot::admitted(), 1_000_000.0);
        assert!(outcome.admitted);
        assert_eq!(outcome.max_rate, 0.0);
    }

    #[test]
    fn test_rate_limit_is_inclusive() {
        let snapshot = AuthorizationSnapshot::admitted().with_max_rate(5.0);

        assert!(rate_gate(&snapshot, 5.0).admitted);

        let over = rate_gate(&snapshot, 5.5);
        assert!(!over.admitted);
        assert_eq!(over.max_rate, 5.0);
        assert_eq!(over.reason, Some(DenialReason::RateExceeded));
    }

    #[test]
    fn test_capacity_fails_closed_without_limit() {
        let snapshot = AuthorizationSnapshot::admitted().with_max_capacity(0);

        for used in [0, 1, u64::MAX] {
            let outcome = capacity_gate(&snapshot, used);
            assert!(!outcome.admitted);
            assert_eq!(outcome.reason, Some(DenialReason::NoCapacityLimit));
        }
    }

    #[test]
    fn test_capacity_reports_max_on_denial() {
        let snapshot = AuthorizationSnapshot::admitted().with_max_capacity(3);

        let outcome = capacity_gate(&snapshot, 3);
        assert!(!outcome.admitted);
        assert_eq!(outcome.max_capacity, 3);
        assert_eq!(outcome.reason, Some(DenialReason::CapacityExceeded));
    }

    #[test]
    fn test_slot_without_limit_denied_and_ledger_untouched() {
        let ledger = ConcurrencyLedger::new();
        let key = SlotKey::new("a", CheckKey::product());

        let outcome = acquire_slot(&AuthorizationSnapshot::admitted(), &ledger, key);
        assert_eq!(outcome.reason(), Some(&DenialReason::NoConcurrencyLimit));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_slot_denied_when_full() {
        let ledger = ConcurrencyLedger::new();
        let key = SlotKey::new("a", CheckKey::product());
        let snapshot = AuthorizationSnapshot::admitted().with_max_concurrency(1);

        let held = acquire_slot(&snapshot, &ledger, key.clone());
        assert!(held.is_acquired());

        match acquire_slot(&snapshot, &ledger, key.clone()) {
            SlotOutcome::Denied {
                max_concurrency,
                in_use,
                reason,
            } => {
                assert_eq!(max_concurrency, 1);
                assert_eq!(in_use, 1);
                assert_eq!(reason, DenialReason::ConcurrencyExceeded);
            }
            SlotOutcome::Acquired(_) => panic!("second slot should be denied"),
        }

        drop(held);
        assert_eq!(ledger.in_use(&key), 0);
    }
}
