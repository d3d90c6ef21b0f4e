//! shipstream-decode: batch decode engines.
//!
//! - [`SingleThreadDeserializer`]: decodes on the calling task
//! - [`ParallelDeserializer`]: fixed rayon pool, one batch per pool thread
//! - [`ShipDeserializer`]: picks one of the above from [`DeserializerConfig`]
//!
//! [`DeserializerConfig`]: shipstream_core::DeserializerConfig

pub mod facade;
pub mod parallel;
pub mod request;
pub mod single;

pub use facade::ShipDeserializer;
pub use parallel::ParallelDeserializer;
pub use request::{DecodeOutcome, DecodeRequest, Deserializer};
pub use single::SingleThreadDeserializer;
