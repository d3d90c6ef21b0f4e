//! shipstream-consumer: the ordering buffer between the session and the
//! block processor.
//!
//! [`ShipBlockConsumer`] holds back the newest `block_delay` blocks so a
//! shallow fork replaces them before they are committed, and resumes from
//! the [`BlockPositionStore`] after a restart.
//!
//! [`BlockPositionStore`]: shipstream_core::BlockPositionStore

pub mod consumer;
pub mod repository;

pub use consumer::ShipBlockConsumer;
pub use repository::LocalBlockRepository;
