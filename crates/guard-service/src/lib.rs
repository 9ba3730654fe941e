//! COP Guard Service Library
//!
//! Token verification and access-decision gateway. Sits in front of
//! internal APIs and:
//!
//! - Validates bearer JWTs issued by the configured identity providers
//!   (Apigee, PingFederate) against their published JWKS
//! - Evaluates scope, functional and object-level requirements
//! - Rate limits callers by IP before authentication and by client after it
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> middleware/*.rs -> handlers/*.rs -> engine.rs -> auth/, authz/
//! ```
//!
//! # Modules
//!
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `auth` - JWKS cache, signature and claims validation
//! - `authz` - Permissions, requirements and the policy evaluator
//! - `engine` - `AuthEngine`, the single entry point for the HTTP layer
//! - `rate_limit` - Fixed-window limiter
//! - `middleware` - Correlation ids, transport security, auth
//! - `handlers` / `models` / `routes` - Axum surface
//! - `tasks` - Background JWKS refresh and limiter sweeping
//! - `observability` - Prometheus metrics

pub mod auth;
pub mod authz;
pub mod config;
pub mod engine;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod rate_limit;
pub mod routes;
pub mod tasks;
