//! JSON payloads exchanged with the license authority

use licensegate::{AuthorizationSnapshot, QuotaInfo};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const CHECK_PATH_PREFIX: &str = "/api/v1/sdk/features";
pub const USAGE_PATH: &str = "/api/v1/sdk/usage";
pub const REGISTER_PATH: &str = "/api/v1/sdk/register";
pub const HEARTBEAT_PATH: &str = "/api/v1/sdk/heartbeat";

/// Trailing segment of the check endpoint, after the check-key segment
pub const CHECK_PATH_SUFFIX: &str = "check";

/// Quota block as sent on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaPayload {
    pub limit: i64,
    pub used: i64,
    pub remaining: i64,
    pub reset_at: i64,
}

impl From<QuotaPayload> for QuotaInfo {
    fn from(q: QuotaPayload) -> Self {
        QuotaInfo {
            limit: q.limit,
            used: q.used,
            remaining: q.remaining,
            reset_at: q.reset_at,
        }
    }
}

/// Response of `GET /api/v1/sdk/features/{key}/check`
///
/// Zero and negative limits mean "not configured".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResponse {
    #[serde(default)]
    pub feature_id: String,
    pub enabled: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub quota_info: Option<QuotaPayload>,
    #[serde(default)]
    pub max_capacity: Option<i64>,
    #[serde(default)]
    pub max_tps: Option<f64>,
    #[serde(default)]
    pub max_concurrency: Option<i64>,
    /// Suggested cache lifetime in seconds
    #[serde(default)]
    pub cache_ttl: Option<i64>,
}

impl CheckResponse {
    /// Suggested cache lifetime, if the authority gave a positive one
    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl
            .filter(|secs| *secs > 0)
            .map(|secs| Duration::from_secs(secs as u64))
    }

    pub fn into_snapshot(self) -> AuthorizationSnapshot {
        let positive = |v: Option<i64>| v.filter(|v| *v > 0).map(|v| v as u64);

        AuthorizationSnapshot {
            admitted: self.enabled,
            reason: self.reason.filter(|r| !r.is_empty()),
            quota: self.quota_info.map(QuotaInfo::from),
            max_capacity: positive(self.max_capacity),
            max_rate_per_second: self.max_tps.filter(|tps| *tps > 0.0),
            max_concurrency: positive(self.max_concurrency),
        }
    }
}

/// What a successful check yields: the snapshot plus the suggested lifetime
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub snapshot: AuthorizationSnapshot,
    pub cache_ttl: Option<Duration>,
}

impl From<CheckResponse> for CheckResult {
    fn from(response: CheckResponse) -> Self {
        let cache_ttl = response.cache_ttl();
        CheckResult {
            snapshot: response.into_snapshot(),
            cache_ttl,
        }
    }
}

/// Body of `POST /api/v1/sdk/usage`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageReport {
    pub instance_id: String,
    pub feature_id: String,
    pub count: u64,
    /// Unix time in seconds
    pub timestamp: i64,
}

/// Body of `POST /api/v1/sdk/register`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub product_id: String,
    pub version: String,
    pub public_key: String,
}

/// Body of `POST /api/v1/sdk/heartbeat`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub version: String,
}
