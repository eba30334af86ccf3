//! # licensegate
//!
//! The in-process half of license enforcement: turns infrequent, cached
//! authorization answers from a remote license authority into fast local
//! admission decisions.
//!
//! ## Overview
//!
//! An embedding application asks four questions on its hot paths:
//! - **Consume**: may I spend `n` units of quota?
//! - **Rate**: am I under the allowed events-per-second?
//! - **Capacity**: is there room for one more resource?
//! - **Concurrency**: may I start one more simultaneous operation?
//!
//! Each answer combines the latest [`AuthorizationSnapshot`] for a
//! [`CheckKey`] with a local measurement. This crate holds the pieces that
//! never touch the network; `licensegate-client` wires them to an authority.
//!
//! ## Quick Start
//!
//! ```
//! use licensegate::{
//!     AuthorizationCache, AuthorizationSnapshot, CheckKey, ConcurrencyLedger, QuotaInfo,
//!     SlotKey, acquire_slot, consumption_gate,
//! };
//! use std::time::Instant;
//!
//! let cache = AuthorizationCache::default();
//! let ledger = ConcurrencyLedger::new();
//! let now = Instant::now();
//!
//! // Store what the authority said about the whole product
//! let snapshot = AuthorizationSnapshot::admitted()
//!     .with_quota(QuotaInfo::new(1000, 0, 0))
//!     .with_max_concurrency(2);
//! cache.put(CheckKey::product(), snapshot, cache.default_ttl(), now);
//!
//! let snapshot = cache.get(&CheckKey::product(), now).unwrap();
//!
//! let outcome = consumption_gate(&snapshot, 1);
//! assert!(outcome.admitted);
//! assert_eq!(outcome.remaining, 999);
//!
//! let slot = acquire_slot(&snapshot, &ledger, SlotKey::new("instance-1", CheckKey::product()));
//! assert!(slot.is_acquired());
//! ```
//!
//! ## Missing limits
//!
//! A rate check with no configured rate limit admits. Capacity and
//! concurrency checks with no configured limit deny:
//!
//! ```
//! use licensegate::{AuthorizationSnapshot, DenialReason, capacity_gate, rate_gate};
//!
//! let snapshot = AuthorizationSnapshot::admitted();
//!
//! assert!(rate_gate(&snapshot, 500.0).admitted);
//!
//! let capacity = capacity_gate(&snapshot, 0);
//! assert!(!capacity.admitted);
//! assert_eq!(capacity.reason, Some(DenialReason::NoCapacityLimit));
//! ```
//!
//! ## Thread Safety
//!
//! [`AuthorizationCache`], [`RateWindow`], [`ConcurrencyLedger`] and
//! [`ProviderRegistry`] synchronize internally and are meant to be shared
//! behind an `Arc` by every task using one client.
//!
//! ## Features
//!
//! - `ahash` (default): Use AHash for faster hashing

pub mod core;

pub use core::{
    AuthorizationCache, AuthorizationSnapshot, CacheEntry, CallContext, CapacityOutcome,
    CheckKey, ConcurrencyLedger, ConsumeOutcome, DenialReason, LimitError, MeasurementProviders,
    PRODUCT_KEY, ProviderRegistry, QuotaInfo, RateOutcome, RateSource, RateWindow,
    RegisteredProviders, SlotGuard, SlotKey, SlotOutcome, SlotsExhausted, acquire_slot,
    capacity_gate, consumption_gate, rate_gate,
};
