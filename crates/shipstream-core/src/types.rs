//! Wire-level and per-block data model.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// Chain system account; owns `setabi` and `onblock`.
pub const SYSTEM_ACCOUNT: &str = "eosio";
/// System action that installs a contract ABI.
pub const SET_ABI_ACTION: &str = "setabi";
/// Implicit per-block system action.
pub const ON_BLOCK_ACTION: &str = "onblock";
/// Account whose actions are never dispatched.
pub const NULL_ACCOUNT: &str = "eosio.null";
/// Delta table carrying contract table rows.
pub const CONTRACT_ROW_TABLE: &str = "contract_row";
/// `end_block_num` sentinel meaning "stream forever".
pub const UNBOUNDED_END_BLOCK: u32 = u32::MAX;

/// A block number plus id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPosition {
    pub block_num: u32,
    /// Hex-encoded `checksum256`.
    pub block_id: String,
}

impl BlockPosition {
    pub fn new(block_num: u32, block_id: impl Into<String>) -> Self {
        Self {
            block_num,
            block_id: block_id.into(),
        }
    }
}

/// Parameters of a `get_blocks_request_v0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRequest {
    pub start_block_num: u32,
    pub end_block_num: u32,
    pub max_messages_in_flight: u32,
    pub have_positions: Vec<BlockPosition>,
    pub irreversible_only: bool,
    pub fetch_block: bool,
    pub fetch_traces: bool,
    pub fetch_deltas: bool,
}

impl Default for BlockRequest {
    fn default() -> Self {
        Self {
            start_block_num: 0,
            end_block_num: UNBOUNDED_END_BLOCK,
            max_messages_in_flight: 1,
            have_positions: vec![],
            irreversible_only: false,
            fetch_block: false,
            fetch_traces: false,
            fetch_deltas: false,
        }
    }
}

/// Binary payload that may or may not have been decoded yet.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Raw(Vec<u8>),
    Decoded(Value),
}

impl Payload {
    pub fn raw(&self) -> Option<&[u8]> {
        match self {
            Self::Raw(bytes) => Some(bytes),
            Self::Decoded(_) => None,
        }
    }

    pub fn decoded(&self) -> Option<&Value> {
        match self {
            Self::Raw(_) => None,
            Self::Decoded(value) => Some(value),
        }
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Raw(bytes) => serializer.serialize_str(&hex::encode_upper(bytes)),
            Self::Decoded(value) => value.serialize(serializer),
        }
    }
}

/// A block header as seen by listeners: the position fields merged with the
/// decoded `signed_block` body (timestamp, producer, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ShipBlock {
    pub block_num: u32,
    pub block_id: String,
    pub last_irreversible: BlockPosition,
    pub head: BlockPosition,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl ShipBlock {
    pub fn position(&self) -> BlockPosition {
        BlockPosition::new(self.block_num, self.block_id.clone())
    }

    pub fn timestamp(&self) -> Option<&str> {
        self.body.get("timestamp").and_then(Value::as_str)
    }

    pub fn producer(&self) -> Option<&str> {
        self.body.get("producer").and_then(Value::as_str)
    }
}

/// One row of a SHiP table delta.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShipTableRow {
    pub present: bool,
    pub data: Payload,
}

/// One SHiP table delta (`table_delta_v0` / `table_delta_v1`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShipTableDelta {
    /// Variant tag the node sent.
    pub version: String,
    pub name: String,
    pub rows: Vec<ShipTableRow>,
}

/// A fully received block, handed from the session to the consumer.
#[derive(Debug, Clone)]
pub struct ShipBlockResponse {
    pub this_block: BlockPosition,
    pub prev_block: Option<BlockPosition>,
    pub last_irreversible: BlockPosition,
    pub head: BlockPosition,
    pub block: ShipBlock,
    /// Decoded `transaction_trace` variants.
    pub traces: Vec<Value>,
    pub deltas: Vec<ShipTableDelta>,
}

/// The block passed to processors and listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FullBlock {
    pub this_block: ShipBlock,
    pub prev_block: Option<BlockPosition>,
    pub last_irreversible: BlockPosition,
    pub head: BlockPosition,
}

impl FullBlock {
    pub fn block_num(&self) -> u32 {
        self.this_block.block_num
    }
}

impl From<&ShipBlockResponse> for FullBlock {
    fn from(resp: &ShipBlockResponse) -> Self {
        Self {
            this_block: resp.block.clone(),
            prev_block: resp.prev_block.clone(),
            last_irreversible: resp.last_irreversible.clone(),
            head: resp.head.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn block_request_wire_shape() {
        let req = BlockRequest {
            start_block_num: 10,
            have_positions: vec![BlockPosition::new(9, "AB")],
            fetch_block: true,
            ..Default::default()
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["end_block_num"], json!(4294967295u32));
        assert_eq!(v["have_positions"][0]["block_id"], json!("AB"));
        assert_eq!(v["fetch_traces"], json!(false));
    }

    #[test]
    fn ship_block_flattens_body() {
        let mut body = Map::new();
        body.insert("timestamp".into(), json!("2024-01-01T00:00:00.000"));
        body.insert("producer".into(), json!("bp1"));
        let block = ShipBlock {
            block_num: 5,
            block_id: "FF".into(),
            body,
            ..Default::default()
        };
        let v = serde_json::to_value(&block).unwrap();
        assert_eq!(v["producer"], json!("bp1"));
        assert_eq!(v["block_num"], json!(5));
        assert_eq!(block.timestamp(), Some("2024-01-01T00:00:00.000"));
    }

    #[test]
    fn raw_payload_serializes_as_hex() {
        let v = serde_json::to_value(Payload::Raw(vec![0xde, 0xad])).unwrap();
        assert_eq!(v, json!("DEAD"));
    }
}
