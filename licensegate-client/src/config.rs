//! Client configuration
//!
//! Settings are layered with the `config` crate:
//! 1. Environment variables with the `LICENSEGATE_` prefix (highest priority)
//! 2. An optional configuration file (YAML, TOML or JSON, chosen by extension)
//! 3. Default values (lowest priority)
//!
//! # Example
//!
//! ```bash
//! export LICENSEGATE_AUTHORITY_URL=https://license.example.com
//! export LICENSEGATE_PRODUCT_ID=analytics-suite
//! export LICENSEGATE_PRODUCT_VERSION=2.4.0
//! export LICENSEGATE_CACHE_TTL_SECS=30
//! ```

use crate::error::{ClientError, Result};
use crate::policy::FailurePolicy;
use reqwest::Url;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const ENV_PREFIX: &str = "LICENSEGATE";

const DEFAULT_CACHE_TTL_SECS: u64 = 10;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 5;
const DEFAULT_RATE_WINDOW_MS: u64 = 1_000;

/// Settings record handed to the client at construction
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the license authority
    pub authority_url: String,
    pub product_id: String,
    pub product_version: String,
    /// Cache lifetime used when the authority suggests none
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Length of the internal rate estimator's window
    #[serde(default = "default_rate_window_ms")]
    pub rate_window_ms: u64,
    /// Whether callers using [`FailurePolicy`] admit when the authority is unreachable
    #[serde(default)]
    pub fail_open: bool,
}

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_heartbeat_interval_secs() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_SECS
}

fn default_rate_window_ms() -> u64 {
    DEFAULT_RATE_WINDOW_MS
}

impl ClientConfig {
    /// Configuration with every optional setting at its default
    pub fn new(
        authority_url: impl Into<String>,
        product_id: impl Into<String>,
        product_version: impl Into<String>,
    ) -> Self {
        ClientConfig {
            authority_url: authority_url.into(),
            product_id: product_id.into(),
            product_version: product_version.into(),
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            rate_window_ms: DEFAULT_RATE_WINDOW_MS,
            fail_open: false,
        }
    }

    /// Load from `LICENSEGATE_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::load(None, None)
    }

    /// Load from a configuration file, overridden by `LICENSEGATE_*` environment variables
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if the file is missing or malformed, a
    /// required setting is absent, or validation fails.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::load(Some(path.as_ref()), None)
    }

    // `env` replaces the process environment when given
    fn load(path: Option<&Path>, env: Option<config::Map<String, String>>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .source(env),
        );

        let config: ClientConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_millis(self.rate_window_ms)
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::from_fail_open(self.fail_open)
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if:
    /// - the authority URL is empty, unparseable or not http(s)
    /// - the product id or version is empty
    /// - any duration is zero
    pub fn validate(&self) -> Result<()> {
        if self.authority_url.trim().is_empty() {
            return Err(ClientError::Config("authority_url is required".to_string()));
        }

        let url = Url::parse(&self.authority_url)
            .map_err(|e| ClientError::Config(format!("invalid authority_url: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ClientError::Config(format!(
                "authority_url must use http or https, got {}",
                url.scheme()
            )));
        }

        if self.product_id.trim().is_empty() {
            return Err(ClientError::Config("product_id is required".to_string()));
        }
        if self.product_version.trim().is_empty() {
            return Err(ClientError::Config(
                "product_version is required".to_string(),
            ));
        }

        for (name, value) in [
            ("cache_ttl_secs", self.cache_ttl_secs),
            ("request_timeout_ms", self.request_timeout_ms),
            ("heartbeat_interval_secs", self.heartbeat_interval_secs),
            ("rate_window_ms", self.rate_window_ms),
        ] {
            if value == 0 {
                return Err(ClientError::Config(format!("{name} must be greater than zero")));
            }
        }

        Ok(())
    }
}
