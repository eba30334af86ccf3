//! Transport to the license authority
//!
//! [`Authority`] is the seam between the client and the network. The
//! provided [`HttpAuthority`] speaks signed JSON over HTTP; tests and
//! embedders can plug in their own implementation.

use crate::auth::RequestAuthenticator;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::protocol::{
    CHECK_PATH_PREFIX, CHECK_PATH_SUFFIX, CheckResponse, CheckResult, HEARTBEAT_PATH,
    HeartbeatRequest, REGISTER_PATH, RegisterRequest, USAGE_PATH, UsageReport,
};
use async_trait::async_trait;
use licensegate::CheckKey;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode, Url};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Operations the client needs from the license authority
///
/// Implementations do not retry. Every failure is returned to the caller.
#[async_trait]
pub trait Authority: Send + Sync {
    /// Query the authorization for one check-key
    async fn check(&self, key: &CheckKey) -> Result<CheckResult>;

    /// Record consumption against a check-key's quota
    async fn report_usage(&self, report: &UsageReport) -> Result<()>;

    /// Announce this instance
    async fn register(&self, request: &RegisterRequest) -> Result<()>;

    /// Signal that this instance is alive
    async fn heartbeat(&self, request: &HeartbeatRequest) -> Result<()>;
}

/// Signed HTTP/JSON transport
#[derive(Clone)]
pub struct HttpAuthority {
    client: reqwest::Client,
    base_url: String,
    authenticator: Arc<dyn RequestAuthenticator>,
}

impl HttpAuthority {
    /// Build a transport honoring the configured request timeout
    pub fn new(config: &ClientConfig, authenticator: Arc<dyn RequestAuthenticator>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(HttpAuthority {
            client,
            base_url: config.authority_url.trim_end_matches('/').to_string(),
            authenticator,
        })
    }

    /// Authority URL without a trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| ClientError::Config(format!("invalid request URL: {e}")))
    }

    /// Check endpoint with the key percent-encoded as one path segment
    pub fn check_url(&self, key: &CheckKey) -> Result<Url> {
        let mut url = self.endpoint(CHECK_PATH_PREFIX)?;
        url.path_segments_mut()
            .map_err(|_| ClientError::Config("authority_url cannot be a base URL".to_string()))?
            .push(key.as_str())
            .push(CHECK_PATH_SUFFIX);
        Ok(url)
    }

    async fn send(&self, method: Method, url: Url, body: Vec<u8>) -> Result<reqwest::Response> {
        // Sign the path exactly as the authority will see it
        let signed = self
            .authenticator
            .authenticate(method.as_str(), url.path(), &body)?;

        let mut request = self
            .client
            .request(method, url)
            .header(CONTENT_TYPE, "application/json");
        for (name, value) in signed.headers() {
            request = request.header(name, value);
        }
        if !body.is_empty() {
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), "Authority rejected request");
            return Err(ClientError::Authority {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, payload: &T) -> Result<()> {
        let body = serde_json::to_vec(payload)
            .map_err(|e| ClientError::InvalidResponse(format!("failed to encode request: {e}")))?;
        self.send(Method::POST, self.endpoint(path)?, body).await?;
        Ok(())
    }
}

#[async_trait]
impl Authority for HttpAuthority {
    #[instrument(skip_all, fields(key = %key))]
    async fn check(&self, key: &CheckKey) -> Result<CheckResult> {
        let response = self
            .send(Method::GET, self.check_url(key)?, Vec::new())
            .await?;
        let payload: CheckResponse = response.json().await?;
        Ok(CheckResult::from(payload))
    }

    #[instrument(skip_all, fields(key = %report.feature_id, count = report.count))]
    async fn report_usage(&self, report: &UsageReport) -> Result<()> {
        self.post(USAGE_PATH, report).await
    }

    #[instrument(skip_all, fields(product = %request.product_id))]
    async fn register(&self, request: &RegisterRequest) -> Result<()> {
        self.post(REGISTER_PATH, request).await
    }

    async fn heartbeat(&self, request: &HeartbeatRequest) -> Result<()> {
        self.post(HEARTBEAT_PATH, request).await
    }
}

impl std::fmt::Debug for HttpAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAuthority")
            .field("base_url", &self.base_url)
            .field("identity", &self.authenticator.identity())
            .finish()
    }
}
