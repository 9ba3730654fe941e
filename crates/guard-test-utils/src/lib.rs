//! # Guard Test Utilities
//!
//! Shared test utilities for the guard service.
//!
//! This crate provides:
//! - Deterministic Ed25519 keypairs that sign tokens and publish JWKs
//! - Fixed RSA and P-256 keys for the RS/PS/ES algorithm families
//! - A fluent claims builder
//! - A wiremock-backed JWKS endpoint
//! - Server harness (`TestGuardServer` for E2E tests)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use guard_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let keypair = TestKeypair::new(1, "key-1");
//!     let jwks = MockJwksServer::start(&[&keypair]).await;
//!     let server = TestGuardServer::spawn(&jwks).await?;
//!
//!     let token = keypair.sign_token(&TestTokenBuilder::new().build());
//!     let response = reqwest::Client::new()
//!         .post(format!("{}/v1/auth/validate", server.url()))
//!         .bearer_auth(token)
//!         .send()
//!         .await?;
//!
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod crypto_fixtures;
pub mod jwks_mock;
pub mod server_harness;
pub mod static_keys;
pub mod token_builders;

// Re-export commonly used items
pub use crypto_fixtures::TestKeypair;
pub use jwks_mock::MockJwksServer;
pub use server_harness::TestGuardServer;
pub use static_keys::StaticKeypair;
pub use token_builders::TestTokenBuilder;
