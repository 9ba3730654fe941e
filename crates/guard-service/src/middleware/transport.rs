//! Transport security middleware.
//!
//! TLS terminates at the load balancer, which forwards the original scheme
//! in `X-Forwarded-Proto` and the client certificate summary in
//! `X-Forwarded-Client-Cert` (`Hash=...;Subject="...";URI=...`). When mTLS
//! is required both must be present.

use crate::errors::GuardError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

pub const FORWARDED_PROTO_HEADER: &str = "x-forwarded-proto";
pub const FORWARDED_CLIENT_CERT_HEADER: &str = "x-forwarded-client-cert";

/// State for the transport middleware.
#[derive(Debug, Clone, Copy)]
pub struct TransportState {
    pub require_mtls: bool,
}

/// Client certificate details forwarded by the proxy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientCertificate {
    pub hash: Option<String>,
    pub subject: Option<String>,
    pub uri: Option<String>,
}

impl ClientCertificate {
    /// Parse an `X-Forwarded-Client-Cert` value.
    ///
    /// Only the first element is read. Separators inside quoted values are
    /// ignored. Returns `None` when neither a hash nor a subject is present.
    pub fn parse(value: &str) -> Option<Self> {
        let mut cert = ClientCertificate::default();

        for pair in first_element_pairs(value) {
            let Some((key, raw)) = pair.split_once('=') else {
                continue;
            };
            let value = raw.trim().trim_matches('"').to_string();
            if value.is_empty() {
                continue;
            }
            match key.trim().to_ascii_lowercase().as_str() {
                "hash" => cert.hash = Some(value),
                "subject" => cert.subject = Some(value),
                "uri" => cert.uri = Some(value),
                _ => {}
            }
        }

        (cert.hash.is_some() || cert.subject.is_some()).then_some(cert)
    }
}

/// `key=value` pairs of the first comma-separated element, quote-aware.
fn first_element_pairs(value: &str) -> Vec<&str> {
    let mut pairs = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;

    for (i, c) in value.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                pairs.push(value.get(start..i).unwrap_or_default());
                start = i + 1;
            }
            ',' if !in_quotes => {
                pairs.push(value.get(start..i).unwrap_or_default());
                return pairs;
            }
            _ => {}
        }
    }
    pairs.push(value.get(start..).unwrap_or_default());
    pairs
}

/// Reject requests that did not arrive over HTTPS with a client certificate.
///
/// A no-op when mTLS is not required.
pub async fn require_transport_security(
    State(state): State<TransportState>,
    mut req: Request,
    next: Next,
) -> Result<Response, GuardError> {
    if !state.require_mtls {
        return Ok(next.run(req).await);
    }

    let https = req
        .headers()
        .get(FORWARDED_PROTO_HEADER)
        .and_then(|h| h.to_str().ok())
        .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("https"));
    if !https {
        tracing::warn!(target: "guard.middleware.transport", "Request did not arrive over HTTPS");
        return Err(GuardError::TlsRequired);
    }

    let cert = req
        .headers()
        .get(FORWARDED_CLIENT_CERT_HEADER)
        .and_then(|h| h.to_str().ok())
        .and_then(ClientCertificate::parse)
        .ok_or_else(|| {
            tracing::warn!(target: "guard.middleware.transport", "No client certificate presented");
            GuardError::ClientCertificateRequired
        })?;

    tracing::debug!(
        target: "guard.middleware.transport",
        subject = cert.subject.as_deref().unwrap_or("-"),
        "Client certificate accepted"
    );
    req.extensions_mut().insert(cert);

    Ok(next.run(req).await)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, middleware, routing::get, Router};
    use tower::ServiceExt;

    fn app(require_mtls: bool) -> Router {
        Router::new().route("/", get(|| async { "ok" })).layer(
            middleware::from_fn_with_state(
                TransportState { require_mtls },
                require_transport_security,
            ),
        )
    }

    async fn status(app: Router, headers: &[(&str, &str)]) -> StatusCode {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        app.oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[test]
    fn test_parse_client_certificate() {
        let cert = ClientCertificate::parse(
            "Hash=abc123;Subject=\"CN=client,O=Bank\";URI=spiffe://cop/guard",
        )
        .unwrap();
        assert_eq!(cert.hash.as_deref(), Some("abc123"));
        assert_eq!(cert.uri.as_deref(), Some("spiffe://cop/guard"));
        assert_eq!(cert.subject.as_deref(), Some("CN=client,O=Bank"));

        let chained = ClientCertificate::parse("Hash=first;URI=a,Hash=second").unwrap();
        assert_eq!(chained.hash.as_deref(), Some("first"));

        assert!(ClientCertificate::parse("URI=spiffe://x").is_none());
        assert!(ClientCertificate::parse("").is_none());
    }

    #[tokio::test]
    async fn test_not_required_passes_through() {
        assert_eq!(status(app(false), &[]).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_plain_http_rejected() {
        assert_eq!(
            status(app(true), &[("x-forwarded-proto", "http")]).await,
            StatusCode::UPGRADE_REQUIRED
        );
        assert_eq!(status(app(true), &[]).await, StatusCode::UPGRADE_REQUIRED);
    }

    #[tokio::test]
    async fn test_https_without_certificate_rejected() {
        assert_eq!(
            status(app(true), &[("x-forwarded-proto", "https")]).await,
            StatusCode::UPGRADE_REQUIRED
        );
    }

    #[tokio::test]
    async fn test_https_with_certificate_accepted() {
        assert_eq!(
            status(
                app(true),
                &[
                    ("x-forwarded-proto", "HTTPS"),
                    ("x-forwarded-client-cert", "Hash=abc;Subject=\"CN=client\""),
                ]
            )
            .await,
            StatusCode::OK
        );
    }
}
