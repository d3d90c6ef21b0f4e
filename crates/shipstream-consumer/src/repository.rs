//! In-memory block position store.
//!
//! All data is lost when the process exits.

use async_trait::async_trait;
use shipstream_core::{BlockPosition, BlockPositionStore, ShipError};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Positions {
    last_processed: u32,
    reversible: Vec<BlockPosition>,
}

#[derive(Debug, Default)]
pub struct LocalBlockRepository {
    state: Mutex<Positions>,
}

impl LocalBlockRepository {
    pub fn new(last_processed: u32, reversible: Vec<BlockPosition>) -> Self {
        Self {
            state: Mutex::new(Positions {
                last_processed,
                reversible,
            }),
        }
    }

    /// A store that makes the consumer request `start_block` first.
    pub fn starting_at(start_block: u32) -> Self {
        Self::new(start_block.saturating_sub(1), vec![])
    }
}

#[async_trait]
impl BlockPositionStore for LocalBlockRepository {
    async fn get_last_processed(&self) -> Result<u32, ShipError> {
        Ok(self.state.lock().unwrap_or_else(|e| e.into_inner()).last_processed)
    }

    async fn set_last_processed(&self, block_num: u32) -> Result<(), ShipError> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).last_processed = block_num;
        Ok(())
    }

    async fn get_reversible_window(&self) -> Result<Vec<BlockPosition>, ShipError> {
        Ok(self.state.lock().unwrap_or_else(|e| e.into_inner()).reversible.clone())
    }

    async fn append_reversible(&self, position: BlockPosition, last_irreversible: u32) -> Result<(), ShipError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.reversible.push(position);
        state.reversible.retain(|p| p.block_num > last_irreversible);
        Ok(())
    }
}
