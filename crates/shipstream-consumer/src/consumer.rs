//! Delay buffer that commits blocks once `block_delay` newer ones arrived.

use async_trait::async_trait;
use shipstream_core::{
    extract_deltas, extract_traces, BlockPositionStore, BlockProcessor, BlockRequest, ConsumerSettings,
    ExtractedDelta, ExtractedTrace, FullBlock, ShipBlockResponse, ShipConsumer, ShipError,
};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub struct ShipBlockConsumer {
    settings: ConsumerSettings,
    repository: Arc<dyn BlockPositionStore>,
    processor: Arc<dyn BlockProcessor>,
    block_delay: usize,
    /// Received but not yet committed, oldest first.
    delayed: Mutex<VecDeque<ShipBlockResponse>>,
}

impl ShipBlockConsumer {
    pub fn new(
        settings: ConsumerSettings,
        repository: Arc<dyn BlockPositionStore>,
        processor: Arc<dyn BlockProcessor>,
        block_delay: usize,
    ) -> Self {
        Self {
            settings,
            repository,
            processor,
            block_delay,
            delayed: Mutex::new(VecDeque::new()),
        }
    }

    pub fn settings(&self) -> &ConsumerSettings {
        &self.settings
    }

    /// Blocks currently held back.
    pub async fn delayed_len(&self) -> usize {
        self.delayed.lock().await.len()
    }

    /// Commit one block: hooks, dispatch, then the position store.
    async fn process_block(&self, resp: ShipBlockResponse) -> Result<(), ShipError> {
        let block = FullBlock::from(&resp);
        let block_num = block.block_num();
        debug!(block_num, "committing block");

        self.processor.on_block_start(&block).await?;

        let traces = self.traces_of(&resp)?;
        let deltas = self.deltas_of(&resp)?;
        self.processor.process_block(&block, traces, deltas).await?;

        self.processor.on_block_finished(&block).await?;

        self.repository
            .append_reversible(resp.block.position(), resp.last_irreversible.block_num)
            .await?;
        self.repository.set_last_processed(block_num).await
    }

    fn traces_of(&self, resp: &ShipBlockResponse) -> Result<Vec<ExtractedTrace>, ShipError> {
        if !self.settings.fetch_traces {
            return Ok(vec![]);
        }
        tolerate_unsupported(resp.block.block_num, "traces", extract_traces(&resp.traces))
    }

    fn deltas_of(&self, resp: &ShipBlockResponse) -> Result<Vec<ExtractedDelta>, ShipError> {
        if !self.settings.fetch_deltas {
            return Ok(vec![]);
        }
        tolerate_unsupported(
            resp.block.block_num,
            "deltas",
            extract_deltas(&resp.deltas, &self.settings.delta_types),
        )
    }
}

/// An unsupported variant empties the group with a warning; anything else
/// aborts the block.
fn tolerate_unsupported<T>(block_num: u32, group: &str, result: Result<Vec<T>, ShipError>) -> Result<Vec<T>, ShipError> {
    match result {
        Ok(items) => Ok(items),
        Err(e) if !e.is_fatal_for_block() => {
            warn!(block_num, group, error = %e, "skipping block {group}");
            Ok(vec![])
        }
        Err(e) => Err(e.at_block(block_num, format!("Failed to extract {group}"))),
    }
}

#[async_trait]
impl ShipConsumer for ShipBlockConsumer {
    async fn consume(&self, block: ShipBlockResponse) -> Result<(), ShipError> {
        let mut delayed = self.delayed.lock().await;

        // A re-sent or forked block replaces everything at or above it.
        let incoming = block.block.block_num;
        delayed.retain(|b| b.block.block_num < incoming);
        delayed.push_back(block);

        while delayed.len() > self.block_delay {
            if let Some(next) = delayed.pop_front() {
                self.process_block(next).await?;
            }
        }
        Ok(())
    }

    async fn get_request_block_config(&self) -> Result<BlockRequest, ShipError> {
        Ok(BlockRequest {
            start_block_num: self.repository.get_last_processed().await?.saturating_add(1),
            end_block_num: self.settings.end_block,
            max_messages_in_flight: self.settings.max_messages_in_flight,
            have_positions: self.repository.get_reversible_window().await?,
            irreversible_only: self.settings.irreversible_only,
            fetch_block: true,
            fetch_traces: self.settings.fetch_traces,
            fetch_deltas: self.settings.fetch_deltas,
        })
    }

    fn get_required_deltas(&self) -> Vec<String> {
        self.settings.delta_types.clone()
    }
}
