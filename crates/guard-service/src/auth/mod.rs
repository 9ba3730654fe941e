//! Token authentication.
//!
//! # Components
//!
//! - `jwks` - per-source key cache with coalesced fetches
//! - `verifier` - algorithm and signature checks
//! - `claims` - time, issuer, audience and shape checks
//! - `provider` - trust-source selection
//! - `validator` - the pipeline tying them together

pub mod claims;
pub mod jwks;
pub mod provider;
pub mod validator;
pub mod verifier;

pub use claims::TokenClaims;
pub use jwks::{HttpJwksFetcher, JwksCache, JwksCacheSettings, JwksFetcher, KeySet, SourceStatus};
pub use provider::ProviderResolver;
pub use validator::{extract_bearer, TokenValidator, ValidatedToken};
