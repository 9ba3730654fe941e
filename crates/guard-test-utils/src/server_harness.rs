//! Test server harness for E2E testing
//!
//! Provides `TestGuardServer` for spawning real guard instances in tests.

use crate::jwks_mock::MockJwksServer;
use crate::token_builders::TEST_ISSUER;
use guard_service::config::Config;
use guard_service::engine::AuthEngine;
use guard_service::routes::{self, AppState};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Test harness for spawning the guard in E2E tests.
///
/// The Apigee trust source points at the given mock JWKS server, trusts
/// [`TEST_ISSUER`] and accepts EdDSA.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health_flow_e2e() -> Result<()> {
///     let jwks = MockJwksServer::start(&[&TestKeypair::new(1, "key-1")]).await;
///     let server = TestGuardServer::spawn(&jwks).await?;
///
///     let response = reqwest::get(format!("{}/v1/health", server.url())).await?;
///
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestGuardServer {
    addr: SocketAddr,
    config: Config,
    engine: Arc<AuthEngine>,
    _handle: JoinHandle<()>,
}

impl TestGuardServer {
    /// Spawn a server with the default test configuration.
    pub async fn spawn(jwks: &MockJwksServer) -> Result<Self, anyhow::Error> {
        Self::spawn_with(jwks, &[]).await
    }

    /// Spawn a server, overriding or adding configuration variables.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the HTTP server in the background
    /// - Fetch JWKS lazily on the first validation
    pub async fn spawn_with(
        jwks: &MockJwksServer,
        overrides: &[(&str, &str)],
    ) -> Result<Self, anyhow::Error> {
        let mut vars = HashMap::from([
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            ("APIGEE_JWKS_URL".to_string(), jwks.jwks_url()),
            ("APIGEE_ISSUERS".to_string(), TEST_ISSUER.to_string()),
            ("APIGEE_ALGORITHMS".to_string(), "EdDSA".to_string()),
        ]);
        for (key, value) in overrides {
            vars.insert((*key).to_string(), (*value).to_string());
        }

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let engine = Arc::new(AuthEngine::from_config(&config));
        let state = Arc::new(AppState {
            config: config.clone(),
            engine: Arc::clone(&engine),
        });

        // Unique handle per server; the global recorder is left alone
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
        let app = routes::build_routes(state, metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            // Connect info feeds the per-IP limiter
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            engine,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The engine behind the running server.
    pub fn engine(&self) -> &Arc<AuthEngine> {
        &self.engine
    }
}

impl Drop for TestGuardServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto_fixtures::TestKeypair;

    #[tokio::test]
    async fn test_server_spawns_and_binds_to_random_port() -> Result<(), anyhow::Error> {
        let keypair = TestKeypair::new(1, "key-1");
        let jwks = MockJwksServer::start(&[&keypair]).await;
        let server = TestGuardServer::spawn(&jwks).await?;

        assert_ne!(server.addr().port(), 0);
        assert!(server.url().starts_with("http://127.0.0.1:"));
        assert_eq!(server.config().trust_sources.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_overrides_apply() -> Result<(), anyhow::Error> {
        let keypair = TestKeypair::new(1, "key-1");
        let jwks = MockJwksServer::start(&[&keypair]).await;
        let server =
            TestGuardServer::spawn_with(&jwks, &[("RATE_LIMIT_MAX_REQUESTS", "3")]).await?;

        assert_eq!(server.config().rate_limit_max_requests, 3);
        assert_eq!(server.engine().limiter().max_requests(), 3);
        Ok(())
    }
}
