//! Integration tests for the HTTP transport.
//!
//! Uses wiremock for the authority. Covers the end-to-end consume scenarios,
//! request signing, status and timeout mapping, and the heartbeat loop.

use std::time::Duration;

use licensegate_client::auth::{SignedRequest, verify_request};
use licensegate_client::{CheckKey, ClientConfig, ClientError, KeyPairAuthenticator, LicenseClient};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PRODUCT_CHECK: &str = "/api/v1/sdk/features/__product__/check";

fn test_config(server: &MockServer) -> ClientConfig {
    ClientConfig::new(server.uri(), "analytics-suite", "1.2.0")
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn create_test_client(server: &MockServer) -> LicenseClient {
    init_tracing();
    LicenseClient::new(test_config(server)).expect("failed to create client")
}

async fn mount_product_check(server: &MockServer, body: serde_json::Value, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path(PRODUCT_CHECK))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(expected_calls)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_consume_admitted_reports_usage_once() {
    let server = MockServer::start().await;
    mount_product_check(
        &server,
        json!({
            "feature_id": "__product__",
            "enabled": true,
            "quota_info": {"limit": 1000, "used": 0, "remaining": 1000, "reset_at": 0},
            "cache_ttl": 10
        }),
        1,
    )
    .await;

    let client = create_test_client(&server);

    Mock::given(method("POST"))
        .and(path("/api/v1/sdk/usage"))
        .and(body_partial_json(json!({
            "instance_id": client.identity(),
            "feature_id": "__product__",
            "count": 1
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = client.consume(1).await.expect("consume failed");

    assert!(outcome.admitted);
    assert_eq!(outcome.remaining, 999);
    assert!(outcome.reason.is_none());
}

#[tokio::test]
async fn test_consume_denied_sends_no_report() {
    let server = MockServer::start().await;
    mount_product_check(
        &server,
        json!({"feature_id": "__product__", "enabled": false, "reason": "quota_exceeded"}),
        1,
    )
    .await;

    Mock::given(method("POST"))
        .and(path("/api/v1/sdk/usage"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = create_test_client(&server);
    let outcome = client.consume(1).await.expect("consume failed");

    assert!(!outcome.admitted);
    assert_eq!(outcome.remaining, 0);
    assert_eq!(outcome.reason.expect("reason").code(), "quota_exceeded");
}

#[tokio::test]
async fn test_cached_snapshot_avoids_second_query() {
    let server = MockServer::start().await;
    mount_product_check(
        &server,
        json!({"enabled": true, "max_concurrency": 3}),
        1,
    )
    .await;

    let client = create_test_client(&server);

    for _ in 0..5 {
        let snapshot = client.check(&CheckKey::product()).await.unwrap();
        assert_eq!(snapshot.concurrency_limit(), Some(3));
    }
}

#[tokio::test]
async fn test_requests_are_signed() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/sdk/features/export/check"))
        .and(header_exists("X-LCC-PublicKey"))
        .and(header_exists("X-LCC-Timestamp"))
        .and(header_exists("X-LCC-Nonce"))
        .and(header_exists("X-LCC-Signature"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"enabled": true})))
        .expect(1)
        .mount(&server)
        .await;

    let signer = KeyPairAuthenticator::from_secret_bytes(&[3u8; 32]);
    let client = LicenseClient::builder()
        .config(test_config(&server))
        .authenticator(signer)
        .build()?;

    client.check(&CheckKey::feature("export")).await?;

    let requests = server
        .received_requests()
        .await
        .ok_or_else(|| anyhow::anyhow!("request recording disabled"))?;
    let request = &requests[0];
    let signed = SignedRequest::from_headers(|name| {
        request
            .headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(String::from)
    })?;

    verify_request(
        &signed,
        "GET",
        request.url.path(),
        &request.body,
        signed.timestamp,
    )?;
    Ok(())
}

#[tokio::test]
async fn test_feature_key_is_one_path_segment() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/sdk/features/reports%2F2024%3Fq%23x/check"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"enabled": true})))
        .expect(1)
        .mount(&server)
        .await;

    let client = create_test_client(&server);
    let snapshot = client.check(&CheckKey::feature("reports/2024?q#x")).await?;
    assert!(snapshot.admitted);

    let requests = server
        .received_requests()
        .await
        .ok_or_else(|| anyhow::anyhow!("request recording disabled"))?;
    let request = &requests[0];
    let signed = SignedRequest::from_headers(|name| {
        request
            .headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(String::from)
    })?;
    verify_request(&signed, "GET", request.url.path(), &request.body, signed.timestamp)?;
    Ok(())
}

#[tokio::test]
async fn test_non_success_status_maps_to_authority_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PRODUCT_CHECK))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let client = create_test_client(&server);
    let err = client.consume(1).await.unwrap_err();

    match err {
        ClientError::Authority { status, body } => {
            assert_eq!(status, 503);
            assert_eq!(body, "maintenance");
        }
        other => panic!("expected authority error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_slow_authority_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PRODUCT_CHECK))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"enabled": true}))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let mut config = test_config(&server);
    config.request_timeout_ms = 100;
    let client = LicenseClient::new(config).unwrap();

    let err = client.check_rate().await.unwrap_err();
    assert!(matches!(err, ClientError::Timeout), "got {err:?}");
}

#[tokio::test]
async fn test_malformed_payload_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PRODUCT_CHECK))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let client = create_test_client(&server);
    let err = client.check(&CheckKey::product()).await.unwrap_err();

    assert!(matches!(err, ClientError::InvalidResponse(_)), "got {err:?}");
}

#[tokio::test]
async fn test_failed_usage_report_after_admission() {
    let server = MockServer::start().await;
    mount_product_check(
        &server,
        json!({
            "enabled": true,
            "quota_info": {"limit": 1000, "used": 0, "remaining": 1000, "reset_at": 0}
        }),
        1,
    )
    .await;

    Mock::given(method("POST"))
        .and(path("/api/v1/sdk/usage"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let client = create_test_client(&server);
    let err = client.consume(1).await.unwrap_err();

    match err {
        ClientError::UsageNotRecorded { remaining, source } => {
            assert_eq!(remaining, 999);
            assert!(matches!(*source, ClientError::Authority { status: 500, .. }));
        }
        other => panic!("expected UsageNotRecorded, got {other:?}"),
    }
}

#[tokio::test]
async fn test_register_starts_heartbeat() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/sdk/register"))
        .and(body_partial_json(json!({
            "product_id": "analytics-suite",
            "version": "1.2.0"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v1/sdk/heartbeat"))
        .and(body_partial_json(json!({"version": "1.2.0"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1..)
        .mount(&server)
        .await;

    let mut config = test_config(&server);
    config.heartbeat_interval_secs = 1;
    let client = LicenseClient::new(config).unwrap();

    client.register().await.expect("register failed");
    assert!(client.heartbeat_running());

    tokio::time::sleep(Duration::from_millis(1_500)).await;

    client.close();
    assert!(!client.heartbeat_running());
}

#[tokio::test]
async fn test_rejected_registration_does_not_start_heartbeat() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/sdk/register"))
        .respond_with(ResponseTemplate::new(403).set_body_string("unknown product"))
        .mount(&server)
        .await;

    let client = create_test_client(&server);
    let err = client.register().await.unwrap_err();

    assert!(matches!(err, ClientError::Authority { status: 403, .. }));
    assert!(!client.heartbeat_running());
}
