//! Middleware for the guard service.
//!
//! # Components
//!
//! - `correlation` - `X-Correlation-ID` propagation and request span
//! - `transport` - HTTPS and client-certificate enforcement
//! - `rate_limit` - pre-authentication limit by client IP
//! - `auth` - bearer authentication and requirement enforcement
//! - `http_metrics` - request counters and latency

pub mod auth;
pub mod correlation;
pub mod http_metrics;
pub mod rate_limit;
pub mod transport;

pub use auth::{enforce_requirements, require_auth, AuthState, ClaimsExt, RequirementState};
pub use correlation::{correlation_id, CorrelationId};
pub use http_metrics::http_metrics_middleware;
pub use rate_limit::{limit_by_ip, uncounted_ip_key, CountedIpKey};
pub use transport::{require_transport_security, ClientCertificate, TransportState};
