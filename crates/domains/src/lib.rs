//! icewatch/crates/domains/src/lib.rs
//!
//! The central domain logic and interface definitions for icewatch.
//!
//! Everything in this crate is free of I/O: models, the error taxonomy,
//! the port traits adapters implement, and the pure engines (geo math,
//! temperature classification, validity decay, input validation).

pub mod errors;
pub mod geo;
pub mod models;
pub mod ports;
pub mod temperature;
pub mod validation;
pub mod validity;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-exporting for easier access in other crates
pub use errors::*;
pub use models::*;
pub use ports::*;
pub use temperature::{TemperatureLevel, TemperatureState};
