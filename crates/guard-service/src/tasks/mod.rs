//! Background tasks for the guard service.
//!
//! # Tasks
//!
//! - `jwks_refresh` - refetches every trust source's key set on an interval
//! - `rate_limit_sweeper` - evicts expired rate-limit windows

pub mod jwks_refresh;
pub mod rate_limit_sweeper;

pub use jwks_refresh::start_jwks_refresh;
pub use rate_limit_sweeper::start_rate_limit_sweeper;
