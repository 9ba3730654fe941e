//! Metrics definitions for the guard service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `guard_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `provider`: configured providers plus `unknown`
//! - `outcome` / `error_type`: `GuardError::kind()` values
//! - `source`: configured trust-source names
//! - `endpoint`: known routes, everything else is `/other`

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle used by `/metrics`.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("guard_http_request".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.200, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("guard_jwks_fetch".to_string()),
            &[0.010, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000],
        )
        .map_err(|e| format!("Failed to set JWKS fetch buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion.
///
/// Metric: `guard_http_requests_total`, `guard_http_request_duration_seconds`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let endpoint = normalize_endpoint(endpoint);

    histogram!("guard_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => endpoint
    )
    .record(duration.as_secs_f64());

    counter!("guard_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/v1/health" => "/v1/health",
        "/metrics" => "/metrics",
        "/v1/auth/validate" => "/v1/auth/validate",
        "/v1/auth/apigee/validate" | "/v1/auth/pingfed/validate" => "/v1/auth/{provider}/validate",
        "/v1/user/permissions" => "/v1/user/permissions",
        "/v1/security/test-permission" => "/v1/security/test-permission",
        _ => "/other",
    }
}

// ============================================================================
// Authentication Metrics
// ============================================================================

/// Record a token validation outcome.
///
/// Metric: `guard_token_validations_total`
/// Labels: `provider`, `outcome` (`success` or an error kind)
pub fn record_token_validation(provider: &str, outcome: &str) {
    counter!("guard_token_validations_total",
        "provider" => provider.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a JWKS fetch.
///
/// Metric: `guard_jwks_fetches_total`, `guard_jwks_fetch_duration_seconds`
/// Labels: `source`, `result` (`success`, `error`)
pub fn record_jwks_fetch(source: &str, result: &str, duration: Duration) {
    histogram!("guard_jwks_fetch_duration_seconds",
        "source" => source.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("guard_jwks_fetches_total",
        "source" => source.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}

// ============================================================================
// Authorization and Rate Limit Metrics
// ============================================================================

/// Record an authorization decision.
///
/// Metric: `guard_authz_decisions_total`
/// Labels: `decision` (`allow`, `deny`)
pub fn record_authz_decision(allowed: bool) {
    let decision = if allowed { "allow" } else { "deny" };
    counter!("guard_authz_decisions_total", "decision" => decision).increment(1);
}

/// Record a rate-limit rejection.
///
/// Metric: `guard_rate_limit_rejections_total`
/// Labels: `stage` (`pre_auth`, `post_auth`)
pub fn record_rate_limit_rejection(stage: &'static str) {
    counter!("guard_rate_limit_rejections_total", "stage" => stage).increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(normalize_endpoint("/v1/health"), "/v1/health");
        assert_eq!(
            normalize_endpoint("/v1/auth/pingfed/validate"),
            "/v1/auth/{provider}/validate"
        );
        assert_eq!(normalize_endpoint("/v1/auth/other/validate"), "/other");
        assert_eq!(normalize_endpoint("/api/secret/123"), "/other");
    }

    #[test]
    fn test_metrics_are_recorded() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_token_validation("apigee", "success");
            record_token_validation("unknown", "unknown_provider");
            record_jwks_fetch("apigee", "success", Duration::from_millis(40));
            record_authz_decision(false);
            record_rate_limit_rejection("pre_auth");
            record_http_request("GET", "/v1/health", 200, Duration::from_millis(2));
        });

        let metrics = snapshotter.snapshot().into_vec();
        let names: Vec<String> = metrics
            .iter()
            .map(|(key, _, _, _)| key.key().name().to_string())
            .collect();

        for expected in [
            "guard_token_validations_total",
            "guard_jwks_fetches_total",
            "guard_jwks_fetch_duration_seconds",
            "guard_authz_decisions_total",
            "guard_rate_limit_rejections_total",
            "guard_http_requests_total",
        ] {
            assert!(
                names.iter().any(|n| n == expected),
                "missing metric {expected}, got {names:?}"
            );
        }

        let denials = metrics
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "guard_authz_decisions_total")
            .map(|(_, _, _, value)| value.clone());
        assert_eq!(denials, Some(&DebugValue::Counter(1)));
    }
}
