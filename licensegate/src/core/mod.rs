//! Core components of the licensegate enforcement library
//!
//! This module contains the fundamental building blocks:
//! - [`snapshot`]: Authorization snapshots and check-keys
//! - [`cache`]: TTL cache of the latest snapshot per check-key
//! - [`rate_window`]: Sliding-window event counter used as an internal rate estimator
//! - [`ledger`]: In-process concurrency slot bookkeeping
//! - [`providers`]: Application-supplied measurement callbacks
//! - [`admission`]: Local decision rules applied to a snapshot

pub mod admission;
pub mod cache;
pub mod ledger;
pub mod providers;
pub mod rate_window;
pub mod snapshot;
#[cfg(test)]
mod tests;

pub use admission::{
    CapacityOutcome, ConsumeOutcome, DenialReason, RateOutcome, SlotOutcome, acquire_slot,
    capacity_gate, consumption_gate, rate_gate,
};
pub use cache::{AuthorizationCache, CacheEntry};
pub use ledger::{ConcurrencyLedger, SlotGuard, SlotKey, SlotsExhausted};
pub use providers::{
    CallContext, MeasurementProviders, ProviderRegistry, RateSource, RegisteredProviders,
};
pub use rate_window::RateWindow;
pub use snapshot::{AuthorizationSnapshot, CheckKey, PRODUCT_KEY, QuotaInfo};

use std::error::Error;
use std::fmt;

#[cfg(feature = "ahash")]
pub(crate) use ahash::AHashMap as HashMap;
#[cfg(not(feature = "ahash"))]
pub(crate) use std::collections::HashMap;

/// Configuration errors raised by the enforcement core
///
/// These are detected synchronously and are never defaulted away: an
/// operation that hits one of them fails without making an admission
/// decision.
///
/// # Example
///
/// ```
/// use licensegate::{LimitError, MeasurementProviders, ProviderRegistry};
///
/// let registry = ProviderRegistry::new();
///
/// // The capacity counter is mandatory
/// match registry.register(MeasurementProviders::new()) {
///     Err(LimitError::MissingCapacityCounter) => {}
///     other => panic!("unexpected: {other:?}"),
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitError {
    /// Providers were registered without the mandatory capacity counter
    MissingCapacityCounter,
    /// Providers can only be registered once per client
    ProvidersAlreadyRegistered,
    /// An operation needs a provider but none were registered
    ProvidersNotRegistered,
    /// The rate window must be longer than zero
    InvalidWindow,
}

impl fmt::Display for LimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitError::MissingCapacityCounter => {
                write!(f, "capacity counter provider is required")
            }
            LimitError::ProvidersAlreadyRegistered => {
                write!(f, "measurement providers are already registered")
            }
            LimitError::ProvidersNotRegistered => {
                write!(f, "measurement providers are not registered")
            }
            LimitError::InvalidWindow => write!(f, "rate window must be non-zero"),
        }
    }
}

impl Error for LimitError {}
