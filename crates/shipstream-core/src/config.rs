//! Configuration shared by the session, consumer, decoder and processor.

use serde::{Deserialize, Serialize};

use crate::types::{CONTRACT_ROW_TABLE, UNBOUNDED_END_BLOCK};

/// Session / transport options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// Blocks to commit before sending an acknowledgement.
    #[serde(default = "default_one")]
    pub min_block_confirmation: u32,
    #[serde(default)]
    pub allow_empty_blocks: bool,
    #[serde(default)]
    pub allow_empty_traces: bool,
    #[serde(default)]
    pub allow_empty_deltas: bool,
    /// Fixed delay before reconnecting after a close.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Largest accepted frame in bytes. `None` = unlimited.
    #[serde(default)]
    pub max_message_size: Option<usize>,
}

fn default_one() -> u32 { 1 }
fn default_reconnect_delay_ms() -> u64 { 5_000 }

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            min_block_confirmation: 1,
            allow_empty_blocks: false,
            allow_empty_traces: false,
            allow_empty_deltas: false,
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_message_size: None,
        }
    }
}

/// What the consumer asks the node for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerSettings {
    /// Delta tables whose rows are decoded.
    #[serde(default = "default_delta_types")]
    pub delta_types: Vec<String>,
    #[serde(default = "default_end_block")]
    pub end_block: u32,
    #[serde(default = "bool_true")]
    pub fetch_deltas: bool,
    #[serde(default = "bool_true")]
    pub fetch_traces: bool,
    #[serde(default = "bool_true")]
    pub irreversible_only: bool,
    #[serde(default = "default_one")]
    pub max_messages_in_flight: u32,
    #[serde(default = "default_one")]
    pub min_block_confirmations: u32,
}

fn default_delta_types() -> Vec<String> { vec![CONTRACT_ROW_TABLE.to_string()] }
fn default_end_block() -> u32 { UNBOUNDED_END_BLOCK }
fn bool_true() -> bool { true }

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            delta_types: default_delta_types(),
            end_block: UNBOUNDED_END_BLOCK,
            fetch_deltas: true,
            fetch_traces: true,
            irreversible_only: true,
            max_messages_in_flight: 1,
            min_block_confirmations: 1,
        }
    }
}

/// Decode engine selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeserializerConfig {
    /// Worker threads; `0` decodes on the calling task.
    #[serde(default)]
    pub threads: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorOptions {
    /// Abort the block on any schema or decode failure instead of skipping
    /// the item.
    #[serde(default)]
    pub fail_on_deserialization_error: bool,
}
