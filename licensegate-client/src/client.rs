use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use licensegate::{
    AuthorizationCache, AuthorizationSnapshot, CallContext, CapacityOutcome, CheckKey,
    ConcurrencyLedger, ConsumeOutcome, MeasurementProviders, ProviderRegistry, RateOutcome,
    RateWindow, SlotKey, SlotOutcome, acquire_slot, capacity_gate, consumption_gate, rate_gate,
};
use parking_lot::Mutex;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::auth::{KeyPairAuthenticator, RequestAuthenticator, unix_now};
use crate::authority::{Authority, HttpAuthority};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::policy::FailurePolicy;
use crate::protocol::{CheckResult, HeartbeatRequest, RegisterRequest, UsageReport};

type SharedRefresh = Shared<BoxFuture<'static, Result<Arc<AuthorizationSnapshot>>>>;

/// An authority query running on its own task, joined by every waiter
struct InFlight {
    id: u64,
    refresh: SharedRefresh,
    task: AbortHandle,
}

/// Builder for creating a LicenseClient
#[derive(Default)]
pub struct ClientBuilder {
    config: Option<ClientConfig>,
    authenticator: Option<Arc<dyn RequestAuthenticator>>,
    authority: Option<Arc<dyn Authority>>,
}

impl ClientBuilder {
    /// Create a new client builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the client configuration
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sign requests with this authenticator instead of a fresh key pair
    pub fn authenticator(mut self, authenticator: impl RequestAuthenticator + 'static) -> Self {
        self.authenticator = Some(Arc::new(authenticator));
        self
    }

    /// Talk to the authority through a custom transport
    pub fn authority(mut self, authority: impl Authority + 'static) -> Self {
        self.authority = Some(Arc::new(authority));
        self
    }

    /// Same as [`authority`](Self::authority) for an already shared transport
    pub fn shared_authority(mut self, authority: Arc<dyn Authority>) -> Self {
        self.authority = Some(authority);
        self
    }

    /// Build the client
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if no configuration was given or it
    /// fails validation.
    pub fn build(self) -> Result<LicenseClient> {
        let config = self
            .config
            .ok_or_else(|| ClientError::Config("client configuration is required".to_string()))?;
        config.validate()?;

        let authenticator: Arc<dyn RequestAuthenticator> = match self.authenticator {
            Some(authenticator) => authenticator,
            None => Arc::new(KeyPairAuthenticator::generate()),
        };

        let authority: Arc<dyn Authority> = match self.authority {
            Some(authority) => authority,
            None => Arc::new(HttpAuthority::new(&config, Arc::clone(&authenticator))?),
        };

        let rate_window = RateWindow::with_window(config.rate_window())?;

        let inner = Inner {
            identity: Arc::from(authenticator.identity()),
            public_key: authenticator.public_key(),
            cache: AuthorizationCache::new(config.cache_ttl()),
            config,
            authority,
            in_flight: Mutex::new(HashMap::new()),
            next_refresh_id: AtomicU64::new(0),
            rate_window,
            ledger: ConcurrencyLedger::new(),
            providers: ProviderRegistry::new(),
            heartbeat: Mutex::new(None),
            closed: AtomicBool::new(false),
        };

        info!(identity = %inner.identity, product = %inner.config.product_id, "License client created");
        Ok(LicenseClient {
            inner: Arc::new(inner),
        })
    }
}

struct Inner {
    config: ClientConfig,
    identity: Arc<str>,
    public_key: String,
    authority: Arc<dyn Authority>,
    cache: AuthorizationCache,
    in_flight: Mutex<HashMap<CheckKey, InFlight>>,
    next_refresh_id: AtomicU64,
    rate_window: RateWindow,
    ledger: ConcurrencyLedger,
    providers: ProviderRegistry,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Inner {
    fn abort_refreshes(in_flight: &mut HashMap<CheckKey, InFlight>) {
        for (_, pending) in in_flight.drain() {
            pending.task.abort();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.heartbeat.get_mut().take() {
            handle.abort();
        }
        Inner::abort_refreshes(self.in_flight.get_mut());
    }
}

/// License-enforcing client
///
/// Owns one cache, rate window, concurrency ledger and provider registry.
/// Clones share all of them. Separate clients share nothing.
///
/// The product-level primitives ([`consume`](Self::consume),
/// [`check_rate`](Self::check_rate), [`check_capacity`](Self::check_capacity),
/// [`acquire_slot`](Self::acquire_slot)) use the reserved product check-key;
/// each has a `*_for` form taking any check-key.
#[derive(Clone)]
pub struct LicenseClient {
    inner: Arc<Inner>,
}

impl LicenseClient {
    /// Create a client with a fresh key pair talking HTTP to the configured authority
    pub fn new(config: ClientConfig) -> Result<Self> {
        ClientBuilder::new().config(config).build()
    }

    /// Create a new client builder for advanced configuration
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Instance identity sent with usage reports
    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    /// Configuration the client was built with
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Failure policy derived from `fail_open`
    pub fn failure_policy(&self) -> FailurePolicy {
        self.inner.config.failure_policy()
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        Ok(())
    }

    /// Announce this instance to the authority and start the heartbeat
    pub async fn register(&self) -> Result<()> {
        self.ensure_open()?;

        let request = RegisterRequest {
            product_id: self.inner.config.product_id.clone(),
            version: self.inner.config.product_version.clone(),
            public_key: self.inner.public_key.clone(),
        };
        self.inner.authority.register(&request).await?;

        info!(identity = %self.inner.identity, "Registered with license authority");
        self.start_heartbeat();
        Ok(())
    }

    fn start_heartbeat(&self) {
        let mut heartbeat = self.inner.heartbeat.lock();
        if self.is_closed() || heartbeat.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let authority = Arc::clone(&self.inner.authority);
        let request = HeartbeatRequest {
            version: self.inner.config.product_version.clone(),
        };
        let interval = self.inner.config.heartbeat_interval();

        *heartbeat = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if let Err(e) = authority.heartbeat(&request).await {
                    debug!(error = %e, "Heartbeat failed");
                }
            }
        }));
    }

    /// Whether a heartbeat loop is running
    pub fn heartbeat_running(&self) -> bool {
        self.inner
            .heartbeat
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Install the application's measurement providers
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Limit`] if the capacity counter is missing or
    /// providers were already registered.
    pub fn register_providers(&self, providers: MeasurementProviders) -> Result<()> {
        self.ensure_open()?;
        self.inner.providers.register(providers)?;
        debug!("Measurement providers registered");
        Ok(())
    }

    /// Current snapshot for `key`, querying the authority on a cache miss
    ///
    /// Concurrent misses for the same key share one authority query and all
    /// observe its result, success or error. The query runs on its own task,
    /// so it completes and fills the cache even if every waiter is cancelled.
    pub async fn check(&self, key: &CheckKey) -> Result<Arc<AuthorizationSnapshot>> {
        self.ensure_open()?;

        if let Some(snapshot) = self.inner.cache.get(key, Instant::now()) {
            debug!(key = %key, "Cache hit");
            return Ok(snapshot);
        }

        let refresh = {
            let mut in_flight = self.inner.in_flight.lock();

            // A refresh may have landed between the first lookup and the lock
            if let Some(snapshot) = self.inner.cache.get(key, Instant::now()) {
                return Ok(snapshot);
            }

            match in_flight.get(key) {
                Some(pending) => {
                    debug!(key = %key, "Joining in-flight refresh");
                    pending.refresh.clone()
                }
                None => {
                    debug!(key = %key, "Cache miss, querying authority");
                    let id = self.inner.next_refresh_id.fetch_add(1, Ordering::Relaxed);
                    let handle = tokio::spawn(query_authority(
                        Arc::clone(&self.inner.authority),
                        Arc::downgrade(&self.inner),
                        key.clone(),
                        id,
                    ));
                    let task = handle.abort_handle();
                    let refresh = async move {
                        match handle.await {
                            Ok(result) => result,
                            Err(e) if e.is_cancelled() => Err(ClientError::Closed),
                            Err(e) => Err(ClientError::TaskFailed(e.to_string())),
                        }
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(
                        key.clone(),
                        InFlight {
                            id,
                            refresh: refresh.clone(),
                            task,
                        },
                    );
                    refresh
                }
            }
        };

        refresh.await
    }

    /// Report `amount` units of usage against `key`
    pub async fn report_usage(&self, key: &CheckKey, amount: u64) -> Result<()> {
        self.ensure_open()?;

        let report = UsageReport {
            instance_id: self.inner.identity.to_string(),
            feature_id: key.to_string(),
            count: amount,
            timestamp: unix_now()?,
        };
        self.inner.authority.report_usage(&report).await
    }

    /// Drop the cached snapshot for `key`; returns whether one existed
    pub fn invalidate(&self, key: &CheckKey) -> bool {
        self.inner.cache.invalidate(key)
    }

    /// Drop every cached snapshot
    pub fn clear_cache(&self) {
        self.inner.cache.invalidate_all();
    }

    fn record_attempt(&self) {
        self.inner.rate_window.record_event(Instant::now());
    }

    /// Consume `amount` units of product quota
    ///
    /// The snapshot's admitted flag decides. On admission the usage is
    /// reported before returning.
    ///
    /// # Errors
    ///
    /// - Transport errors from the snapshot fetch: no decision was made
    /// - [`ClientError::UsageNotRecorded`]: admitted, but the usage report failed
    pub async fn consume(&self, amount: u64) -> Result<ConsumeOutcome> {
        self.consume_for(&CheckKey::product(), amount).await
    }

    /// Consume `amount` units of the quota behind `key`
    pub async fn consume_for(&self, key: &CheckKey, amount: u64) -> Result<ConsumeOutcome> {
        self.ensure_open()?;
        self.record_attempt();

        let snapshot = self.check(key).await?;
        let outcome = consumption_gate(&snapshot, amount);
        if !outcome.admitted {
            debug!(key = %key, reason = ?outcome.reason, "Consumption denied");
            return Ok(outcome);
        }

        if let Err(e) = self.report_usage(key, amount).await {
            warn!(key = %key, amount, error = %e, "Usage admitted but not recorded");
            return Err(ClientError::UsageNotRecorded {
                remaining: outcome.remaining,
                source: Box::new(e),
            });
        }

        Ok(outcome)
    }

    /// Consume the amount computed by the registered consumption calculator
    ///
    /// Without a calculator every call consumes one unit.
    pub fn consume_with_context(
        &self,
        ctx: &CallContext<'_>,
    ) -> impl Future<Output = Result<ConsumeOutcome>> + Send {
        let amount = self.inner.providers.consumption_amount(ctx);
        let client = self.clone();
        async move { client.consume(amount).await }
    }

    /// Check the current rate against the product rate limit
    ///
    /// The rate comes from the registered rate provider, or from the
    /// client's own window otherwise. No configured limit admits.
    pub async fn check_rate(&self) -> Result<RateOutcome> {
        self.check_rate_for(&CheckKey::product()).await
    }

    /// Check the current rate against the rate limit of `key`
    pub async fn check_rate_for(&self, key: &CheckKey) -> Result<RateOutcome> {
        self.ensure_open()?;
        self.record_attempt();

        let current_rate = self
            .inner
            .providers
            .current_rate(&self.inner.rate_window, Instant::now());
        let snapshot = self.check(key).await?;

        let outcome = rate_gate(&snapshot, current_rate);
        if !outcome.admitted {
            debug!(key = %key, current_rate, max_rate = outcome.max_rate, "Rate exceeded");
        }
        Ok(outcome)
    }

    /// Check `current_used` against the product capacity limit
    ///
    /// No configured limit denies.
    pub async fn check_capacity(&self, current_used: u64) -> Result<CapacityOutcome> {
        self.check_capacity_for(&CheckKey::product(), current_used)
            .await
    }

    /// Check `current_used` against the capacity limit of `key`
    pub async fn check_capacity_for(
        &self,
        key: &CheckKey,
        current_used: u64,
    ) -> Result<CapacityOutcome> {
        self.ensure_open()?;
        self.record_attempt();

        let snapshot = self.check(key).await?;
        let outcome = capacity_gate(&snapshot, current_used);
        if !outcome.admitted {
            debug!(key = %key, current_used, reason = ?outcome.reason, "Capacity denied");
        }
        Ok(outcome)
    }

    /// Capacity check using the registered capacity counter
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Limit`] before anything else happens if no
    /// providers were registered.
    pub async fn check_capacity_with_counter(&self) -> Result<CapacityOutcome> {
        self.check_capacity_with_counter_for(&CheckKey::product())
            .await
    }

    /// Capacity check of `key` using the registered capacity counter
    pub async fn check_capacity_with_counter_for(&self, key: &CheckKey) -> Result<CapacityOutcome> {
        self.ensure_open()?;
        let current_used = self.inner.providers.capacity_usage()?;
        self.check_capacity_for(key, current_used).await
    }

    /// Take a product concurrency slot
    ///
    /// The returned guard releases the slot when dropped or on its first
    /// `release()`. No configured limit denies.
    pub async fn acquire_slot(&self) -> Result<SlotOutcome> {
        self.acquire_slot_for(&CheckKey::product()).await
    }

    /// Take a concurrency slot against the limit of `key`
    pub async fn acquire_slot_for(&self, key: &CheckKey) -> Result<SlotOutcome> {
        self.ensure_open()?;
        self.record_attempt();

        let snapshot = self.check(key).await?;
        let slot_key = SlotKey::new(Arc::clone(&self.inner.identity), key.clone());
        let outcome = acquire_slot(&snapshot, &self.inner.ledger, slot_key);
        if let Some(reason) = outcome.reason() {
            debug!(key = %key, reason = %reason, "Slot denied");
        }
        Ok(outcome)
    }

    /// Slots currently held through this client for `key`
    pub fn slots_in_use(&self, key: &CheckKey) -> u64 {
        let slot_key = SlotKey::new(Arc::clone(&self.inner.identity), key.clone());
        self.inner.ledger.in_use(&slot_key)
    }

    /// Rate observed by the client's own window
    pub fn internal_rate(&self) -> f64 {
        self.inner.rate_window.current_rate(Instant::now())
    }

    /// Stop background work and clear all in-memory state
    ///
    /// Held slot guards become inert and callers waiting on an authority
    /// query get [`ClientError::Closed`]. Calling `close` again does nothing.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(handle) = self.inner.heartbeat.lock().take() {
            handle.abort();
        }

        Inner::abort_refreshes(&mut self.inner.in_flight.lock());
        self.inner.cache.invalidate_all();
        self.inner.rate_window.reset();
        self.inner.ledger.clear();
        self.inner.providers.clear();

        info!(identity = %self.inner.identity, "License client closed");
    }
}

impl std::fmt::Debug for LicenseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LicenseClient")
            .field("identity", &self.inner.identity)
            .field("authority_url", &self.inner.config.authority_url)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// One authority query whose result is cached and shared by every waiter
///
/// Holds the client state weakly so a pending query never keeps a dropped
/// client alive.
async fn query_authority(
    authority: Arc<dyn Authority>,
    inner: Weak<Inner>,
    key: CheckKey,
    id: u64,
) -> Result<Arc<AuthorizationSnapshot>> {
    let result = authority.check(&key).await;
    drop(authority);

    let Some(inner) = inner.upgrade() else {
        return result.map(|CheckResult { snapshot, .. }| Arc::new(snapshot));
    };

    let outcome = result.map(|CheckResult { snapshot, cache_ttl }| {
        let snapshot = Arc::new(snapshot);
        if !inner.closed.load(Ordering::Acquire) {
            let ttl = inner.cache.effective_ttl(cache_ttl);
            inner
                .cache
                .put(key.clone(), Arc::clone(&snapshot), ttl, Instant::now());
            debug!(key = %key, ttl_ms = ttl.as_millis() as u64, "Snapshot cached");
        }
        snapshot
    });

    let mut in_flight = inner.in_flight.lock();
    if in_flight.get(&key).is_some_and(|pending| pending.id == id) {
        in_flight.remove(&key);
    }
    drop(in_flight);

    if let Err(e) = &outcome {
        debug!(key = %key, error = %e, "Authority query failed");
    }
    outcome
}
