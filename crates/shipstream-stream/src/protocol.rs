//! State-history wire messages.
//!
//! The first frame from the node is the protocol ABI as JSON. Every later
//! frame is a binary `result` variant; the client sends binary `request`
//! variants (`get_blocks_request_v0`, `get_blocks_ack_request_v0`).

use serde::Deserialize;
use serde_json::{json, Map, Value};
use shipstream_abi::TypeTable;
use shipstream_core::{BlockPosition, BlockRequest, Payload, ShipBlock, ShipError, ShipTableDelta, ShipTableRow};
use shipstream_decode::{DecodeRequest, Deserializer};

pub const RESULT_TYPE: &str = "result";
pub const REQUEST_TYPE: &str = "request";
pub const GET_BLOCKS_REQUEST: &str = "get_blocks_request_v0";
pub const GET_BLOCKS_ACK: &str = "get_blocks_ack_request_v0";
pub const SIGNED_BLOCK_TYPE: &str = "signed_block";
pub const TRACES_TYPE: &str = "transaction_trace[]";
pub const DELTAS_TYPE: &str = "table_delta[]";

/// Accepted `result` variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultVersion {
    /// `block` is raw `signed_block` bytes.
    V0,
    /// `block` arrives decoded as `signed_block_variant`.
    V1,
}

impl ResultVersion {
    pub fn from_variant(name: &str) -> Option<Self> {
        match name {
            "get_blocks_result_v0" => Some(Self::V0),
            "get_blocks_result_v1" => Some(Self::V1),
            _ => None,
        }
    }
}

/// Body of a `get_blocks_result_v0` / `_v1`. Optional payloads are hex strings
/// (v1 `block` excepted).
#[derive(Debug, Deserialize)]
pub struct BlocksResult {
    pub head: BlockPosition,
    pub last_irreversible: BlockPosition,
    pub this_block: Option<BlockPosition>,
    pub prev_block: Option<BlockPosition>,
    pub block: Option<Value>,
    pub traces: Option<String>,
    pub deltas: Option<String>,
}

/// Split a decoded `["variant", value]` pair.
pub fn split_variant(value: Value) -> Result<(String, Value), ShipError> {
    match value {
        Value::Array(mut pair) if pair.len() == 2 => {
            let inner = pair.pop().unwrap_or(Value::Null);
            match pair.pop() {
                Some(Value::String(name)) => Ok((name, inner)),
                _ => Err(ShipError::decode(RESULT_TYPE, "variant tag is not a string")),
            }
        }
        _ => Err(ShipError::decode(RESULT_TYPE, "expected a [\"variant\", value] pair")),
    }
}

/// Decode one inbound binary frame into its variant name and body.
pub fn decode_result(types: &TypeTable, frame: &[u8]) -> Result<(String, Value), ShipError> {
    split_variant(types.decode(RESULT_TYPE, frame)?)
}

pub fn parse_blocks_result(body: Value) -> Result<BlocksResult, ShipError> {
    BlocksResult::deserialize(body).map_err(|e| ShipError::decode("get_blocks_result", e))
}

pub fn encode_request(types: &TypeTable, request: &BlockRequest) -> Result<Vec<u8>, ShipError> {
    let body = serde_json::to_value(request).map_err(|e| ShipError::decode(GET_BLOCKS_REQUEST, e))?;
    Ok(types.encode(REQUEST_TYPE, &json!([GET_BLOCKS_REQUEST, body]))?)
}

pub fn encode_ack(types: &TypeTable, num_messages: u32) -> Result<Vec<u8>, ShipError> {
    Ok(types.encode(REQUEST_TYPE, &json!([GET_BLOCKS_ACK, { "num_messages": num_messages }]))?)
}

pub fn hex_payload(context: &str, hex_str: &str) -> Result<Vec<u8>, ShipError> {
    hex::decode(hex_str).map_err(|e| ShipError::decode(context, e))
}

/// Unwrap a v1 `signed_block_variant`; only `signed_block_v1` is supported.
pub fn unwrap_signed_block(variant: Value) -> Result<Value, ShipError> {
    let (name, block) = split_variant(variant)?;
    if name == "signed_block_v1" {
        Ok(block)
    } else {
        Err(ShipError::decode(
            SIGNED_BLOCK_TYPE,
            format!("Unsupported table block type received {name}"),
        ))
    }
}

/// Decode a single item, turning a failed outcome into an error.
pub async fn decode_one(
    deserializer: &dyn Deserializer,
    type_name: &str,
    data: Vec<u8>,
) -> Result<Value, ShipError> {
    let mut outcomes = deserializer
        .deserialize(vec![Some(DecodeRequest::new(type_name, data))])
        .await?;
    outcomes
        .pop()
        .unwrap_or_else(|| Err(ShipError::decode(type_name, "no result returned")))
}

/// Build [`ShipTableDelta`]s from decoded `table_delta[]`, decoding the rows
/// of every table named in `required` with the table name as the type.
pub async fn decode_deltas(
    deserializer: &dyn Deserializer,
    deltas: Value,
    required: &[String],
) -> Result<Vec<ShipTableDelta>, ShipError> {
    let Value::Array(deltas) = deltas else {
        return Err(ShipError::decode(DELTAS_TYPE, "expected an array"));
    };

    let mut result = Vec::with_capacity(deltas.len());
    for delta in deltas {
        let (version, body) = split_variant(delta)?;
        if version != "table_delta_v0" && version != "table_delta_v1" {
            return Err(ShipError::decode(
                DELTAS_TYPE,
                format!("Unsupported table delta type received {version}"),
            ));
        }
        let raw = RawDelta::deserialize(body).map_err(|e| ShipError::decode(DELTAS_TYPE, e))?;

        let mut rows = Vec::with_capacity(raw.rows.len());
        if required.iter().any(|r| r == &raw.name) {
            let batch = raw
                .rows
                .iter()
                .map(|row| Ok(Some(DecodeRequest::new(raw.name.clone(), hex_payload(&raw.name, &row.data)?))))
                .collect::<Result<Vec<_>, ShipError>>()?;
            let outcomes = deserializer.deserialize(batch).await?;
            for (row, outcome) in raw.rows.iter().zip(outcomes) {
                rows.push(ShipTableRow {
                    present: row.present.as_bool(),
                    data: Payload::Decoded(outcome?),
                });
            }
        } else {
            for row in &raw.rows {
                rows.push(ShipTableRow {
                    present: row.present.as_bool(),
                    data: Payload::Raw(hex_payload(&raw.name, &row.data)?),
                });
            }
        }
        result.push(ShipTableDelta {
            version,
            name: raw.name,
            rows,
        });
    }
    Ok(result)
}

#[derive(Deserialize)]
struct RawDelta {
    name: String,
    rows: Vec<RawRow>,
}

#[derive(Deserialize)]
struct RawRow {
    present: Presence,
    data: String,
}

/// `present` is a `bool` in `table_delta_v0` and may come through as a
/// number from other encoders.
#[derive(Deserialize)]
#[serde(untagged)]
enum Presence {
    Flag(bool),
    Number(u64),
}

impl Presence {
    fn as_bool(&self) -> bool {
        match self {
            Self::Flag(b) => *b,
            Self::Number(n) => *n != 0,
        }
    }
}

/// Merge the block position with the decoded `signed_block` body.
pub fn merge_block(
    this_block: &BlockPosition,
    last_irreversible: &BlockPosition,
    head: &BlockPosition,
    decoded: Option<Value>,
) -> ShipBlock {
    let mut body = match decoded {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    for key in ["block_num", "block_id", "last_irreversible", "head"] {
        body.remove(key);
    }
    ShipBlock {
        block_num: this_block.block_num,
        block_id: this_block.block_id.clone(),
        last_irreversible: last_irreversible.clone(),
        head: head.clone(),
        body,
    }
}

/// Advance the request window after a block: drop positions that became
/// irreversible (or are not older than `this_block`), then remember
/// `this_block` if it is still reversible.
pub fn advance_positions(request: &mut BlockRequest, this_block: Option<&BlockPosition>, last_irreversible: &BlockPosition) {
    match this_block {
        Some(block) => {
            request.start_block_num = block.block_num.saturating_add(1);
            request
                .have_positions
                .retain(|p| p.block_num > last_irreversible.block_num && p.block_num < block.block_num);
            if block.block_num > last_irreversible.block_num {
                request.have_positions.push(block.clone());
            }
        }
        None => request.start_block_num = request.start_block_num.saturating_add(1),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use shipstream_abi::Abi;

    /// Trimmed-down state-history protocol ABI.
    pub fn ship_abi() -> Abi {
        Abi::from_json(include_str!("../tests/fixtures/ship_abi.json")).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::ship_abi;
    use super::*;
    use shipstream_decode::SingleThreadDeserializer;

    fn id() -> String {
        format!("00000010{}", "A".repeat(56))
    }

    fn pos(n: u32) -> BlockPosition {
        BlockPosition::new(n, id())
    }

    #[test]
    fn request_and_ack_encode_as_request_variants() {
        let types = TypeTable::new(&ship_abi()).unwrap();
        let request = BlockRequest {
            start_block_num: 16,
            have_positions: vec![pos(15)],
            fetch_block: true,
            ..Default::default()
        };
        let bytes = encode_request(&types, &request).unwrap();
        assert_eq!(bytes[0], 1, "get_blocks_request_v0 is case 1");
        let back = split_variant(types.decode(REQUEST_TYPE, &bytes).unwrap()).unwrap();
        assert_eq!(back.0, GET_BLOCKS_REQUEST);
        assert_eq!(back.1["start_block_num"], json!(16));
        assert_eq!(back.1["have_positions"][0]["block_id"], json!(id()));

        let ack = encode_ack(&types, 3).unwrap();
        assert_eq!(ack, vec![2, 3, 0, 0, 0]);
    }

    #[test]
    fn unknown_result_variant_is_reported_by_name() {
        let types = TypeTable::new(&ship_abi()).unwrap();
        let frame = types
            .encode(RESULT_TYPE, &json!(["get_status_result_v0", { "head": { "block_num": 1, "block_id": id() } }]))
            .unwrap();
        let (name, _) = decode_result(&types, &frame).unwrap();
        assert_eq!(name, "get_status_result_v0");
        assert_eq!(ResultVersion::from_variant(&name), None);
        assert_eq!(ResultVersion::from_variant("get_blocks_result_v1"), Some(ResultVersion::V1));
    }

    #[test]
    fn v1_block_variant_must_be_signed_block_v1() {
        let ok = unwrap_signed_block(json!(["signed_block_v1", { "producer": "bp" }])).unwrap();
        assert_eq!(ok["producer"], json!("bp"));
        let err = unwrap_signed_block(json!(["signed_block_v9", {}])).unwrap_err();
        assert!(err.to_string().contains("Unsupported table block type received signed_block_v9"));
    }

    #[test]
    fn positions_window_tracks_reversible_blocks() {
        let mut request = BlockRequest {
            start_block_num: 10,
            have_positions: vec![pos(7), pos(8), pos(9), pos(12)],
            ..Default::default()
        };
        advance_positions(&mut request, Some(&pos(10)), &pos(8));
        assert_eq!(request.start_block_num, 11);
        let nums: Vec<u32> = request.have_positions.iter().map(|p| p.block_num).collect();
        assert_eq!(nums, vec![9, 10]);

        // irreversible block: not remembered
        advance_positions(&mut request, Some(&pos(11)), &pos(11));
        assert!(request.have_positions.is_empty());

        // empty window heartbeat only advances the start
        advance_positions(&mut request, None, &pos(11));
        assert_eq!(request.start_block_num, 13);
    }

    #[test]
    fn merged_block_keeps_position_fields() {
        let block = merge_block(&pos(5), &pos(3), &pos(9), Some(json!({ "producer": "bp", "block_num": 99 })));
        assert_eq!(block.block_num, 5);
        assert_eq!(block.producer(), Some("bp"));
        assert!(!block.body.contains_key("block_num"));
    }

    #[tokio::test]
    async fn required_delta_rows_are_decoded() {
        let abi = ship_abi();
        let types = TypeTable::new(&abi).unwrap();
        let de = SingleThreadDeserializer::new(&abi).unwrap();

        let row = types
            .encode(
                "contract_row",
                &json!(["contract_row_v0", {
                    "code": "eosio.token", "scope": "alice", "table": "accounts",
                    "primary_key": "5459781", "payer": "alice", "value": "0A"
                }]),
            )
            .unwrap();
        let deltas = json!([
            ["table_delta_v0", { "name": "contract_row", "rows": [{ "present": true, "data": hex::encode(&row) }] }],
            ["table_delta_v0", { "name": "account", "rows": [{ "present": false, "data": "0102" }] }]
        ]);

        let out = decode_deltas(&de, deltas, &["contract_row".to_string()]).await.unwrap();
        assert_eq!(out.len(), 2);
        let decoded = out[0].rows[0].data.decoded().unwrap();
        assert_eq!(decoded[1]["table"], json!("accounts"));
        assert_eq!(out[1].rows[0].data.raw(), Some(&[1u8, 2][..]));
        assert!(!out[1].rows[0].present);

        let bad = json!([["table_delta_v7", { "name": "x", "rows": [] }]]);
        let err = decode_deltas(&de, bad, &[]).await.unwrap_err();
        assert!(err.to_string().contains("Unsupported table delta type received table_delta_v7"));
    }
}
