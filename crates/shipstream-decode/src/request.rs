//! Batch decode contract shared by every engine.

use async_trait::async_trait;
use serde_json::Value;
use shipstream_abi::{Abi, TypeTable};
use shipstream_core::ShipError;
use std::sync::Arc;

/// One item of a decode batch.
#[derive(Debug, Clone)]
pub struct DecodeRequest {
    pub type_name: String,
    pub data: Vec<u8>,
    /// Decode against this ABI instead of the engine's own.
    pub abi: Option<Arc<Abi>>,
}

impl DecodeRequest {
    pub fn new(type_name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            type_name: type_name.into(),
            data,
            abi: None,
        }
    }

    pub fn with_abi(mut self, abi: Arc<Abi>) -> Self {
        self.abi = Some(abi);
        self
    }
}

/// Per-item outcome; one per request, in request order.
pub type DecodeOutcome = Result<Value, ShipError>;

/// Batch decoder. A failing item never aborts the rest of its batch; the
/// outer error is reserved for engine-level failures.
#[async_trait]
pub trait Deserializer: Send + Sync {
    /// `None` items (requests the caller could not build) yield an error
    /// outcome at their position.
    async fn deserialize(&self, batch: Vec<Option<DecodeRequest>>) -> Result<Vec<DecodeOutcome>, ShipError>;

    /// Release engine resources. A terminated engine rejects further batches.
    async fn terminate(&self);
}

/// Decode a single item against `table`, or against a table built from the
/// item's own ABI.
///
/// Override ABIs come from contract schemas, where trailing bytes are
/// tolerated; the session's own schema is length-checked.
pub(crate) fn decode_item(table: &TypeTable, item: Option<DecodeRequest>) -> DecodeOutcome {
    let item = item.ok_or_else(|| ShipError::decode("request", "Empty data received on deserialize worker"))?;
    match &item.abi {
        Some(abi) => {
            let own = TypeTable::new(abi)?;
            Ok(own.decode_with(&item.type_name, &item.data, false)?)
        }
        None => Ok(table.decode(&item.type_name, &item.data)?),
    }
}

pub(crate) fn decode_batch(table: &TypeTable, batch: Vec<Option<DecodeRequest>>) -> Vec<DecodeOutcome> {
    batch.into_iter().map(|item| decode_item(table, item)).collect()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use serde_json::json;

    pub fn session_abi() -> Abi {
        serde_json::from_value(json!({
            "version": "eosio::abi/1.1",
            "structs": [
                { "name": "pair", "base": "", "fields": [
                    { "name": "a", "type": "uint32" },
                    { "name": "b", "type": "string" }
                ]}
            ]
        }))
        .unwrap()
    }

    pub fn contract_abi() -> Arc<Abi> {
        Arc::new(
            serde_json::from_value(json!({
                "version": "eosio::abi/1.1",
                "structs": [
                    { "name": "counter", "base": "", "fields": [{ "name": "n", "type": "uint64" }] }
                ]
            }))
            .unwrap(),
        )
    }

    /// `pair { a: 7, b: "hi" }`
    pub fn pair_bytes() -> Vec<u8> {
        let mut bytes = 7u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[2, b'h', b'i']);
        bytes
    }

    pub fn mixed_batch() -> Vec<Option<DecodeRequest>> {
        let mut trailing = pair_bytes();
        trailing.push(0);
        let mut counter = 5u64.to_le_bytes().to_vec();
        counter.push(0xee); // tolerated with an override ABI
        vec![
            Some(DecodeRequest::new("pair", pair_bytes())),
            Some(DecodeRequest::new("pair", trailing)),
            None,
            Some(DecodeRequest::new("counter", counter).with_abi(contract_abi())),
            Some(DecodeRequest::new("pair", vec![1, 2])),
        ]
    }

    pub fn assert_mixed_outcomes(out: &[DecodeOutcome]) {
        assert_eq!(out.len(), 5);
        assert_eq!(out[0].as_ref().unwrap(), &json!({ "a": 7, "b": "hi" }));
        assert!(out[1].is_err());
        assert!(out[2].as_ref().unwrap_err().to_string().contains("Empty data"));
        assert_eq!(out[3].as_ref().unwrap(), &json!({ "n": "5" }));
        assert!(out[4].is_err());
    }
}
