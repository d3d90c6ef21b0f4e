//! # shipstream-observability
//!
//! Structured logging for ShipStream. Every crate logs through `tracing`;
//! the session mirrors its `ShipEvent`s under the `shipstream::session`
//! target. Levels are configurable globally and per component, with text or
//! JSON output.

pub mod tracing_setup;

pub use tracing_setup::{init_tracing, LogConfig, LogInitError};
