//! shipstream-processor: turns committed blocks into listener callbacks.
//!
//! [`ShipBlockProcessor`] implements `shipstream_core::BlockProcessor`.
//! Listeners are registered with a filter (`*` or an exact name) and get a
//! [`ListenerHandle`] back for removal. Only items with at least one matching
//! listener are decoded.

pub mod handler;
pub mod processor;
mod registry;

pub use handler::{
    BlockHandler, DeltaHandler, DeltaListener, DeltaPayload, TraceHandler, TraceListener, TracePayload,
};
pub use processor::ShipBlockProcessor;
pub use registry::ListenerHandle;
