//! Collaborator seams between the session, the consumer, the processor and
//! the outside world.

use async_trait::async_trait;
use shipstream_abi::Abi;
use std::sync::Arc;

use crate::error::ShipError;
use crate::trace::{ExtractedDelta, ExtractedTrace};
use crate::types::{BlockPosition, BlockRequest, FullBlock, ShipBlockResponse};

/// Historical, account-scoped ABI lookup.
#[async_trait]
pub trait AbiProvider: Send + Sync {
    /// ABI of `account` as of `block_num`.
    async fn get_abi(&self, account: &str, block_num: u32) -> Result<Arc<Abi>, ShipError>;

    /// Record a new ABI version. `None` records that the account has no ABI.
    async fn set_abi(&self, account: &str, block_num: u32, abi: Option<Abi>) -> Result<(), ShipError>;
}

/// Answers schema lookups the cache cannot (typically a chain API node).
#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn get_current_head(&self) -> Result<u32, ShipError>;

    /// Current ABI of `account`; `Ok(None)` if the account has none.
    async fn get_schema(&self, account: &str) -> Result<Option<Abi>, ShipError>;
}

/// Persists the consumer's position for restarts.
#[async_trait]
pub trait BlockPositionStore: Send + Sync {
    async fn get_last_processed(&self) -> Result<u32, ShipError>;

    async fn set_last_processed(&self, block_num: u32) -> Result<(), ShipError>;

    /// Positions still reversible, oldest first.
    async fn get_reversible_window(&self) -> Result<Vec<BlockPosition>, ShipError>;

    /// Append `position` and drop every entry at or below `last_irreversible`.
    async fn append_reversible(&self, position: BlockPosition, last_irreversible: u32) -> Result<(), ShipError>;
}

/// Turns one committed block into listener callbacks.
#[async_trait]
pub trait BlockProcessor: Send + Sync {
    async fn on_block_start(&self, block: &FullBlock) -> Result<(), ShipError>;

    async fn process_block(
        &self,
        block: &FullBlock,
        traces: Vec<ExtractedTrace>,
        deltas: Vec<ExtractedDelta>,
    ) -> Result<(), ShipError>;

    async fn on_block_finished(&self, block: &FullBlock) -> Result<(), ShipError>;
}

/// Receives blocks from the session in arrival order.
#[async_trait]
pub trait ShipConsumer: Send + Sync {
    async fn consume(&self, block: ShipBlockResponse) -> Result<(), ShipError>;

    /// Subscription the session should send on (re)connect.
    async fn get_request_block_config(&self) -> Result<BlockRequest, ShipError>;

    /// Delta tables whose rows the session must decode.
    fn get_required_deltas(&self) -> Vec<String>;
}
