//! Async license enforcement client
//!
//! Connects the in-process enforcement core from `licensegate` to a remote
//! license authority: signed HTTP requests, a TTL cache with coalesced
//! refreshes, usage reporting and a background heartbeat.
//!
//! ```no_run
//! use licensegate_client::{ClientConfig, LicenseClient};
//!
//! # async fn run() -> licensegate_client::Result<()> {
//! let config = ClientConfig::new("https://license.example.com", "analytics-suite", "2.4.0");
//! let client = LicenseClient::new(config)?;
//! client.register().await?;
//!
//! let outcome = client.consume(1).await?;
//! if !outcome.admitted {
//!     println!("denied: {:?}", outcome.reason);
//! }
//!
//! if let Some(slot) = client.acquire_slot().await?.into_guard() {
//!     // guarded work; the slot is released when `slot` drops
//!     drop(slot);
//! }
//!
//! client.close();
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod authority;
pub mod client;
pub mod config;
pub mod error;
pub mod policy;
pub mod protocol;

pub use auth::{KeyPairAuthenticator, RequestAuthenticator, SignedRequest};
pub use authority::{Authority, HttpAuthority};
pub use client::{ClientBuilder, LicenseClient};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use policy::FailurePolicy;
pub use protocol::CheckResult;

// Re-export the core types callers handle directly
pub use licensegate::{
    AuthorizationSnapshot, CallContext, CapacityOutcome, CheckKey, ConsumeOutcome, DenialReason,
    MeasurementProviders, QuotaInfo, RateOutcome, SlotGuard, SlotOutcome,
};
