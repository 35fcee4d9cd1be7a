//! Middleware for observability.
//!
//! This module provides request logging with latency tracking for the
//! HTTP surface in front of the streaming endpoint.

pub mod logging;

pub use logging::request_logging;
