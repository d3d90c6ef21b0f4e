//! Listener implementations that print dispatched items as JSON lines.

use async_trait::async_trait;
use serde_json::{json, Value};
use shipstream_core::{FullBlock, ShipError};
use shipstream_processor::{BlockHandler, DeltaHandler, DeltaPayload, TraceHandler, TracePayload};
use std::io::Write;

/// Writes one JSON object per line to stdout.
pub struct JsonLines;

impl JsonLines {
    fn emit(&self, kind: &str, block: &FullBlock, data: Value) -> Result<(), ShipError> {
        let line = json!({
            "kind": kind,
            "block_num": block.block_num(),
            "timestamp": block.this_block.timestamp(),
            "data": data,
        });
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{line}").map_err(|e| ShipError::Handler {
            handler: "json-lines".into(),
            reason: e.to_string(),
        })
    }
}

fn to_value(value: impl serde::Serialize) -> Result<Value, ShipError> {
    serde_json::to_value(value).map_err(|e| ShipError::Handler {
        handler: "json-lines".into(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl TraceHandler for JsonLines {
    async fn on_trace(&self, payload: &TracePayload, block: &FullBlock) -> Result<(), ShipError> {
        let mut data = to_value(&payload.trace)?;
        data["transaction_id"] = Value::String(payload.tx.id.clone());
        self.emit("trace", block, data)
    }
}

#[async_trait]
impl DeltaHandler for JsonLines {
    async fn on_delta(&self, delta: &DeltaPayload, block: &FullBlock) -> Result<(), ShipError> {
        self.emit("delta", block, to_value(delta)?)
    }
}

#[async_trait]
impl BlockHandler for JsonLines {
    async fn on_block(&self, block: &FullBlock) -> Result<(), ShipError> {
        self.emit("block", block, to_value(&block.this_block)?)
    }
}
