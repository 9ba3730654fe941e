//! Mock JWKS endpoint
//!
//! A wiremock server publishing test keys at `/.well-known/jwks.json`.
//! Served keys can be swapped or replaced by failures mid-test.

use crate::crypto_fixtures::{jwks_json, TestKeypair};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const JWKS_PATH: &str = "/.well-known/jwks.json";

pub struct MockJwksServer {
    server: MockServer,
}

impl MockJwksServer {
    /// Start a server publishing `keypairs`.
    pub async fn start(keypairs: &[&TestKeypair]) -> Self {
        let mock = Self {
            server: MockServer::start().await,
        };
        mock.serve_keys(keypairs).await;
        mock
    }

    /// Start a server whose JWKS endpoint fails with `status`.
    pub async fn start_failing(status: u16) -> Self {
        let mock = Self {
            server: MockServer::start().await,
        };
        mock.fail_with(status).await;
        mock
    }

    /// Full URL of the JWKS document.
    pub fn jwks_url(&self) -> String {
        format!("{}{}", self.server.uri(), JWKS_PATH)
    }

    /// Replace whatever is served with `keypairs`.
    pub async fn serve_keys(&self, keypairs: &[&TestKeypair]) {
        self.server.reset().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_json(keypairs)))
            .mount(&self.server)
            .await;
    }

    /// Make every request fail with `status`.
    pub async fn fail_with(&self, status: u16) {
        self.server.reset().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Serve `keypairs` only after `delay`.
    pub async fn serve_keys_slowly(&self, keypairs: &[&TestKeypair], delay: Duration) {
        self.server.reset().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(jwks_json(keypairs))
                    .set_delay(delay),
            )
            .mount(&self.server)
            .await;
    }

    /// Number of JWKS requests received so far.
    pub async fn request_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map_or(0, |requests| requests.len())
    }
}
