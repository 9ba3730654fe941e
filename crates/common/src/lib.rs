//! Common utilities and types shared across COP Guard components.

#![warn(clippy::pedantic)]

/// Module for compact JWT parsing (size limits, header/payload decoding, algorithm allowlist)
pub mod jwt;
