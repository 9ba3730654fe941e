//! HTTP request handlers for the guard service.

pub mod health;
pub mod metrics;
pub mod permissions;
pub mod validate;

pub use health::health_check;
pub use metrics::metrics_handler;
pub use permissions::{get_user_permissions, test_permission};
pub use validate::{validate_auto, validate_pinned};
