//! Listener traits, dispatch payloads and filtered listener registrations.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use shipstream_core::{ActionTrace, ContractRow, FullBlock, Pattern, ShipError, ShipTransaction};
use std::sync::Arc;

/// A decoded action trace as delivered to trace listeners.
#[derive(Debug, Clone, Serialize)]
pub struct TracePayload {
    pub trace: ActionTrace<Value>,
    /// Parent transaction. Sibling actions that were decoded for this block
    /// carry their decoded payloads.
    #[serde(skip)]
    pub tx: Arc<ShipTransaction>,
}

/// A decoded contract table row as delivered to delta listeners.
pub type DeltaPayload = ContractRow<Value>;

/// Receives decoded action traces.
#[async_trait]
pub trait TraceHandler: Send + Sync {
    async fn on_trace(&self, payload: &TracePayload, block: &FullBlock) -> Result<(), ShipError>;
}

/// Receives decoded table deltas.
#[async_trait]
pub trait DeltaHandler: Send + Sync {
    async fn on_delta(&self, delta: &DeltaPayload, block: &FullBlock) -> Result<(), ShipError>;
}

/// Called once per block. Used for block listeners and pre/post hooks.
#[async_trait]
pub trait BlockHandler: Send + Sync {
    async fn on_block(&self, block: &FullBlock) -> Result<(), ShipError>;
}

/// Trace listener registration: `account` and `name` filters plus the handler.
#[derive(Clone)]
pub struct TraceListener {
    pub account: Pattern,
    pub name: Pattern,
    pub handler: Arc<dyn TraceHandler>,
}

impl TraceListener {
    pub fn new(account: impl Into<Pattern>, name: impl Into<Pattern>, handler: Arc<dyn TraceHandler>) -> Self {
        Self {
            account: account.into(),
            name: name.into(),
            handler,
        }
    }

    pub fn matches(&self, account: &str, name: &str) -> bool {
        self.account.matches(account) && self.name.matches(name)
    }
}

/// Delta listener registration: `contract` and `table` filters plus the handler.
#[derive(Clone)]
pub struct DeltaListener {
    pub contract: Pattern,
    pub table: Pattern,
    pub handler: Arc<dyn DeltaHandler>,
}

impl DeltaListener {
    pub fn new(contract: impl Into<Pattern>, table: impl Into<Pattern>, handler: Arc<dyn DeltaHandler>) -> Self {
        Self {
            contract: contract.into(),
            table: table.into(),
            handler,
        }
    }

    pub fn matches(&self, contract: &str, table: &str) -> bool {
        self.contract.matches(contract) && self.table.matches(table)
    }
}
