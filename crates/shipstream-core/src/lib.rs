//! shipstream-core: shared model for the state-history streaming pipeline.
//!
//! # Architecture
//!
//! ```text
//! StateHistoryConnection  (session, acks, reconnect)
//!        │ ShipBlockResponse, strictly in arrival order
//!        ▼
//! ShipConsumer            (delay buffer, position store)
//!        │ FullBlock + ExtractedTrace / ExtractedDelta
//!        ▼
//! BlockProcessor          (ABI updates, filtering, decode, listeners)
//!        ├── AbiProvider  (historical ABI cache → SchemaSource)
//!        └── Deserializer (sequential or worker pool)
//! ```

pub mod config;
pub mod error;
pub mod pattern;
pub mod trace;
pub mod traits;
pub mod types;

pub use config::{ConnectionOptions, ConsumerSettings, DeserializerConfig, ProcessorOptions};
pub use error::ShipError;
pub use pattern::Pattern;
pub use trace::{
    extract_deltas, extract_traces, sequence_key, AccountRamDelta, Action, ActionTrace, ContractRow,
    ExtractedDelta, ExtractedTrace, PermissionLevel, ShipTransaction,
};
pub use traits::{AbiProvider, BlockPositionStore, BlockProcessor, SchemaSource, ShipConsumer};
pub use types::{
    BlockPosition, BlockRequest, FullBlock, Payload, ShipBlock, ShipBlockResponse, ShipTableDelta, ShipTableRow,
};
