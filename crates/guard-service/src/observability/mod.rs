//! Observability for the guard service.
//!
//! Provides metrics definitions and the Prometheus recorder.

pub mod metrics;
