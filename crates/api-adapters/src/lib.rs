//! # api-adapters
//!
//! Inbound adapters. The JSON API lives behind the `web-axum` feature so
//! that a deployment running only the proximity watch does not pull in the
//! HTTP stack.

pub mod metrics;

#[cfg(feature = "web-axum")]
pub mod web;

pub use metrics::ApiMetrics;
