//! JWKS cache and engine integration tests.
//!
//! Exercises the HTTP fetcher against a mocked JWKS endpoint, including
//! serving a cached key set while the endpoint is down.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use guard_service::authz::{MatchedPolicy, Requirement};
use guard_service::config::{Config, Provider};
use guard_service::engine::AuthEngine;
use guard_service::errors::GuardError;
use guard_test_utils::token_builders::TEST_ISSUER;
use guard_test_utils::{MockJwksServer, TestGuardServer, TestKeypair, TestTokenBuilder};
use std::collections::HashMap;
use std::time::Duration;

fn engine_for(jwks: &MockJwksServer, extra: &[(&str, &str)]) -> AuthEngine {
    let mut vars = HashMap::from([
        ("APIGEE_JWKS_URL".to_string(), jwks.jwks_url()),
        ("APIGEE_ISSUERS".to_string(), TEST_ISSUER.to_string()),
        ("APIGEE_ALGORITHMS".to_string(), "EdDSA".to_string()),
    ]);
    for (key, value) in extra {
        vars.insert((*key).to_string(), (*value).to_string());
    }
    AuthEngine::from_config(&Config::from_vars(&vars).unwrap())
}

#[tokio::test]
async fn test_validate_then_authorize_by_scope() -> Result<()> {
    let keypair = TestKeypair::new(1, "key-1");
    let jwks = MockJwksServer::start(&[&keypair]).await;
    let engine = engine_for(&jwks, &[]);

    let token = keypair.sign_token(&TestTokenBuilder::new().scopes(&["TSIAM-Read"]).build());
    let header = format!("Bearer {token}");

    let validated = engine.validate_request(Some(&header), None).await?;
    assert_eq!(validated.provider, Provider::Apigee);

    let decision = engine.authorize(&validated.claims, &[Requirement::scope("TSIAM-Read")]);
    assert!(decision.allowed);
    assert_eq!(
        decision.matched_policy,
        Some(MatchedPolicy::Scope("TSIAM-Read".to_string()))
    );

    let decision = engine.authorize(&validated.claims, &[Requirement::scope("TSIAM-Write")]);
    assert!(!decision.allowed);
    assert_eq!(decision.reason, "insufficient scope");
    Ok(())
}

#[tokio::test]
async fn test_cached_keys_are_reused_within_ttl() -> Result<()> {
    let keypair = TestKeypair::new(1, "key-1");
    let jwks = MockJwksServer::start(&[&keypair]).await;
    let engine = engine_for(&jwks, &[]);

    let header = format!(
        "Bearer {}",
        keypair.sign_token(&TestTokenBuilder::new().build())
    );
    for _ in 0..5 {
        engine.validate_request(Some(&header), None).await?;
    }

    assert_eq!(jwks.request_count().await, 1);
    Ok(())
}

#[tokio::test]
async fn test_stale_keys_served_until_ttl_lapses() -> Result<()> {
    let keypair = TestKeypair::new(1, "key-1");
    let jwks = MockJwksServer::start(&[&keypair]).await;
    let engine = engine_for(&jwks, &[("JWKS_CACHE_TTL_SECONDS", "1")]);

    let header = format!(
        "Bearer {}",
        keypair.sign_token(&TestTokenBuilder::new().build())
    );
    engine.validate_request(Some(&header), None).await?;

    // Provider goes down; the cached set still answers
    jwks.fail_with(503).await;
    engine.validate_request(Some(&header), None).await?;

    // A failed background refresh keeps the previous set
    assert_eq!(engine.cache().refresh_all().await, 0);
    engine.validate_request(Some(&header), None).await?;

    tokio::time::sleep(Duration::from_millis(1200)).await;

    let result = engine.validate_request(Some(&header), None).await;
    assert!(matches!(result, Err(GuardError::Stale(ref source)) if source == "apigee"));
    Ok(())
}

#[tokio::test]
async fn test_slow_jwks_endpoint_times_out() -> Result<()> {
    let keypair = TestKeypair::new(1, "key-1");
    let jwks = MockJwksServer::start(&[&keypair]).await;
    jwks.serve_keys_slowly(&[&keypair], Duration::from_secs(3))
        .await;
    let engine = engine_for(&jwks, &[("JWKS_FETCH_TIMEOUT_SECONDS", "1")]);

    let header = format!(
        "Bearer {}",
        keypair.sign_token(&TestTokenBuilder::new().build())
    );
    let result = engine.validate_request(Some(&header), None).await;
    assert!(matches!(result, Err(GuardError::Fetch { .. })));
    Ok(())
}

#[tokio::test]
async fn test_health_reports_cache_freshness() -> Result<()> {
    let keypair = TestKeypair::new(1, "key-1");
    let jwks = MockJwksServer::start(&[&keypair]).await;
    let server = TestGuardServer::spawn(&jwks).await?;

    let body: serde_json::Value = reqwest::get(format!("{}/v1/health", server.url()))
        .await?
        .json()
        .await?;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["service"], "cop-guard");
    assert_eq!(body["sources"][0]["source"], "apigee");
    assert_eq!(body["sources"][0]["cached"], false);

    server.engine().warm_up().await;

    let response = reqwest::get(format!("{}/v1/health", server.url())).await?;
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["sources"][0]["key_count"], 1);
    assert_eq!(body["sources"][0]["key_ids"], serde_json::json!(["key-1"]));
    Ok(())
}

#[tokio::test]
async fn test_health_degraded_when_provider_down() -> Result<()> {
    let jwks = MockJwksServer::start_failing(500).await;
    let server = TestGuardServer::spawn(&jwks).await?;
    server.engine().warm_up().await;

    let response = reqwest::get(format!("{}/v1/health", server.url())).await?;
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["status"], "degraded");
    assert!(body["sources"][0]["last_error"].is_string());
    Ok(())
}

#[tokio::test]
async fn test_metrics_endpoint_is_public() -> Result<()> {
    let keypair = TestKeypair::new(1, "key-1");
    let jwks = MockJwksServer::start(&[&keypair]).await;
    let server = TestGuardServer::spawn(&jwks).await?;

    let response = reqwest::get(format!("{}/metrics", server.url())).await?;
    assert_eq!(response.status(), 200);
    Ok(())
}
