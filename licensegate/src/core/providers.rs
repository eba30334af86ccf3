//! Application-supplied measurement callbacks
//!
//! The core cannot observe everything it enforces. The embedding application
//! plugs in up to three callbacks:
//!
//! - a consumption-amount calculator (optional, defaults to `1` per call)
//! - a rate provider (optional, defaults to the internal [`RateWindow`])
//! - a capacity counter (mandatory, there is no safe default)
//!
//! Providers are registered once per client. Registration without the
//! capacity counter fails immediately.

use super::LimitError;
use super::rate_window::RateWindow;
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Consumption amount used when no calculator is registered
pub const DEFAULT_CONSUMPTION_AMOUNT: u64 = 1;

pub type ConsumptionFn = dyn Fn(&CallContext<'_>) -> u64 + Send + Sync;
pub type RateFn = dyn Fn() -> f64 + Send + Sync;
pub type CapacityFn = dyn Fn() -> u64 + Send + Sync;

/// The original arguments of a guarded call, handed to the consumption calculator
///
/// # Example
///
/// ```
/// use licensegate::CallContext;
///
/// let batch: Vec<u32> = vec![1, 2, 3];
/// let args: [&dyn std::any::Any; 1] = [&batch];
/// let ctx = CallContext::new("import_batch", &args);
///
/// assert_eq!(ctx.arg::<Vec<u32>>(0).map(Vec::len), Some(3));
/// assert!(ctx.arg::<String>(0).is_none());
/// ```
#[derive(Clone, Copy)]
pub struct CallContext<'a> {
    operation: &'a str,
    args: &'a [&'a dyn Any],
}

impl<'a> CallContext<'a> {
    pub fn new(operation: &'a str, args: &'a [&'a dyn Any]) -> Self {
        CallContext { operation, args }
    }

    /// Context with no operation name and no arguments
    pub fn empty() -> CallContext<'static> {
        CallContext {
            operation: "",
            args: &[],
        }
    }

    pub fn operation(&self) -> &'a str {
        self.operation
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Argument `index` if it exists and has type `T`
    pub fn arg<T: Any>(&self, index: usize) -> Option<&'a T> {
        self.args.get(index).and_then(|arg| arg.downcast_ref::<T>())
    }
}

impl fmt::Debug for CallContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("operation", &self.operation)
            .field("args", &self.args.len())
            .finish()
    }
}

/// Unvalidated bundle of measurement callbacks
///
/// # Example
///
/// ```
/// use licensegate::{MeasurementProviders, ProviderRegistry};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicU64, Ordering};
///
/// let open_connections = Arc::new(AtomicU64::new(3));
/// let counter = Arc::clone(&open_connections);
///
/// let registry = ProviderRegistry::new();
/// registry
///     .register(
///         MeasurementProviders::new()
///             .with_capacity_counter(move || counter.load(Ordering::Relaxed)),
///     )
///     .unwrap();
///
/// assert_eq!(registry.capacity_usage().unwrap(), 3);
/// ```
#[derive(Default, Clone)]
pub struct MeasurementProviders {
    consumption_amount: Option<Arc<ConsumptionFn>>,
    rate: Option<Arc<RateFn>>,
    capacity_counter: Option<Arc<CapacityFn>>,
}

impl MeasurementProviders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute the consumption amount from the guarded call's arguments
    pub fn with_consumption_amount<F>(mut self, f: F) -> Self
    where
        F: Fn(&CallContext<'_>) -> u64 + Send + Sync + 'static,
    {
        self.consumption_amount = Some(Arc::new(f));
        self
    }

    /// Report the current rate in events per second from an external source
    pub fn with_rate<F>(mut self, f: F) -> Self
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        self.rate = Some(Arc::new(f));
        self
    }

    /// Report how many capacity units are currently in use
    pub fn with_capacity_counter<F>(mut self, f: F) -> Self
    where
        F: Fn() -> u64 + Send + Sync + 'static,
    {
        self.capacity_counter = Some(Arc::new(f));
        self
    }

    /// Check the mandatory slot and fill the optional ones with defaults
    ///
    /// # Errors
    ///
    /// - [`LimitError::MissingCapacityCounter`]: no capacity counter was supplied
    pub fn validate(self) -> Result<RegisteredProviders, LimitError> {
        let capacity_counter = self
            .capacity_counter
            .ok_or(LimitError::MissingCapacityCounter)?;

        let rate = match self.rate {
            Some(f) => RateSource::External(f),
            None => RateSource::Internal,
        };

        Ok(RegisteredProviders {
            consumption_amount: self.consumption_amount,
            rate,
            capacity_counter,
        })
    }
}

impl fmt::Debug for MeasurementProviders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeasurementProviders")
            .field("consumption_amount", &self.consumption_amount.is_some())
            .field("rate", &self.rate.is_some())
            .field("capacity_counter", &self.capacity_counter.is_some())
            .finish()
    }
}

/// Where the current rate comes from
#[derive(Clone)]
pub enum RateSource {
    External(Arc<RateFn>),
    /// The client's own sliding window
    Internal,
}

impl RateSource {
    pub fn is_internal(&self) -> bool {
        matches!(self, RateSource::Internal)
    }

    fn current_rate(&self, window: &RateWindow, now: Instant) -> f64 {
        match self {
            RateSource::External(f) => f(),
            RateSource::Internal => window.current_rate(now),
        }
    }
}

impl fmt::Debug for RateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateSource::External(_) => f.write_str("External"),
            RateSource::Internal => f.write_str("Internal"),
        }
    }
}

/// Validated providers with every optional slot resolved
#[derive(Clone)]
pub struct RegisteredProviders {
    consumption_amount: Option<Arc<ConsumptionFn>>,
    rate: RateSource,
    capacity_counter: Arc<CapacityFn>,
}

impl RegisteredProviders {
    pub fn consumption_amount(&self, ctx: &CallContext<'_>) -> u64 {
        match &self.consumption_amount {
            Some(f) => f(ctx),
            None => DEFAULT_CONSUMPTION_AMOUNT,
        }
    }

    pub fn rate_source(&self) -> &RateSource {
        &self.rate
    }

    pub fn current_rate(&self, window: &RateWindow, now: Instant) -> f64 {
        self.rate.current_rate(window, now)
    }

    pub fn capacity_usage(&self) -> u64 {
        (self.capacity_counter)()
    }
}

impl fmt::Debug for RegisteredProviders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredProviders")
            .field("consumption_amount", &self.consumption_amount.is_some())
            .field("rate", &self.rate)
            .finish_non_exhaustive()
    }
}

/// One-shot holder for a client's measurement providers
///
/// Reads are lock-shared; the providers themselves are called outside the
/// lock.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: RwLock<Option<Arc<RegisteredProviders>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and install `providers`
    ///
    /// # Errors
    ///
    /// - [`LimitError::MissingCapacityCounter`]: the capacity counter is absent
    /// - [`LimitError::ProvidersAlreadyRegistered`]: providers were installed before
    pub fn register(&self, providers: MeasurementProviders) -> Result<(), LimitError> {
        let registered = providers.validate()?;

        let mut slot = self.providers.write();
        if slot.is_some() {
            return Err(LimitError::ProvidersAlreadyRegistered);
        }
        *slot = Some(Arc::new(registered));
        Ok(())
    }

    pub fn get(&self) -> Option<Arc<RegisteredProviders>> {
        self.providers.read().clone()
    }

    pub fn is_registered(&self) -> bool {
        self.providers.read().is_some()
    }

    /// Consumption amount for a call; `1` unless a calculator is registered
    pub fn consumption_amount(&self, ctx: &CallContext<'_>) -> u64 {
        match self.get() {
            Some(providers) => providers.consumption_amount(ctx),
            None => DEFAULT_CONSUMPTION_AMOUNT,
        }
    }

    /// Current rate from the registered provider, or from `window` by default
    pub fn current_rate(&self, window: &RateWindow, now: Instant) -> f64 {
        match self.get() {
            Some(providers) => providers.current_rate(window, now),
            None => window.current_rate(now),
        }
    }

    /// Current capacity usage from the mandatory counter
    ///
    /// # Errors
    ///
    /// - [`LimitError::ProvidersNotRegistered`]: nothing was registered; zero is never assumed
    pub fn capacity_usage(&self) -> Result<u64, LimitError> {
        self.get()
            .map(|providers| providers.capacity_usage())
            .ok_or(LimitError::ProvidersNotRegistered)
    }

    /// Drop the registered providers so the registry can be reused
    pub fn clear(&self) {
        self.providers.write().take();
    }
}
