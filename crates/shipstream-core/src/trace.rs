//! Normalized traces and deltas, extracted from decoded SHiP payloads.
//!
//! Only executed transactions (`transaction_trace_v0`, status 0) contribute
//! traces, and only action traces whose receiver is the acting contract
//! itself (notifications are skipped). Traces are ordered by numeric
//! `global_sequence`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::error::ShipError;
use crate::types::{Payload, ShipTableDelta, CONTRACT_ROW_TABLE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionLevel {
    pub actor: String,
    pub permission: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountRamDelta {
    pub account: String,
    pub delta: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Action<T> {
    pub account: String,
    pub name: String,
    pub authorization: Vec<PermissionLevel>,
    pub data: T,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionTrace<T> {
    pub action_ordinal: u32,
    pub creator_action_ordinal: u32,
    /// Decimal `uint64`; compare with [`sequence_key`].
    pub global_sequence: String,
    pub account_ram_deltas: Vec<AccountRamDelta>,
    pub act: Action<T>,
}

impl<T> ActionTrace<T> {
    pub fn map_data<U>(self, f: impl FnOnce(T) -> U) -> ActionTrace<U> {
        ActionTrace {
            action_ordinal: self.action_ordinal,
            creator_action_ordinal: self.creator_action_ordinal,
            global_sequence: self.global_sequence,
            account_ram_deltas: self.account_ram_deltas,
            act: Action {
                account: self.act.account,
                name: self.act.name,
                authorization: self.act.authorization,
                data: f(self.act.data),
            },
        }
    }
}

/// Parent transaction of a set of action traces.
///
/// The action list is shared between every [`ExtractedTrace`] of the
/// transaction; the block processor writes decoded payloads back into it.
#[derive(Debug)]
pub struct ShipTransaction {
    pub id: String,
    pub cpu_usage_us: u32,
    pub net_usage_words: u32,
    traces: RwLock<Vec<ActionTrace<Payload>>>,
}

impl ShipTransaction {
    pub fn new(id: String, cpu_usage_us: u32, net_usage_words: u32, traces: Vec<ActionTrace<Payload>>) -> Self {
        Self {
            id,
            cpu_usage_us,
            net_usage_words,
            traces: RwLock::new(traces),
        }
    }

    pub fn traces(&self) -> RwLockReadGuard<'_, Vec<ActionTrace<Payload>>> {
        self.traces.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn traces_mut(&self) -> RwLockWriteGuard<'_, Vec<ActionTrace<Payload>>> {
        self.traces.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the payload of the action with `global_sequence`. Returns
    /// `false` if no such action belongs to this transaction.
    pub fn write_back(&self, global_sequence: &str, data: Value) -> bool {
        let mut traces = self.traces_mut();
        match traces.iter_mut().find(|t| t.global_sequence == global_sequence) {
            Some(trace) => {
                trace.act.data = Payload::Decoded(data);
                true
            }
            None => false,
        }
    }
}

/// One action execution, still carrying its serialized payload.
#[derive(Debug, Clone)]
pub struct ExtractedTrace {
    pub trace: ActionTrace<Vec<u8>>,
    pub tx: Arc<ShipTransaction>,
}

/// A contract table row change (`contract_row_v0`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContractRow<T> {
    pub code: String,
    pub scope: String,
    pub table: String,
    pub primary_key: String,
    pub payer: String,
    /// `false` marks a deleted row.
    pub present: bool,
    pub value: T,
}

pub type ExtractedDelta = ContractRow<Vec<u8>>;

/// Numeric ordering key of a decimal `global_sequence`.
pub fn sequence_key(global_sequence: &str) -> u128 {
    global_sequence.parse().unwrap_or(u128::MAX)
}

// ─── Raw decoded shapes ─────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RawTransactionTrace {
    id: String,
    status: u8,
    cpu_usage_us: u32,
    net_usage_words: u32,
    action_traces: Vec<Value>,
}

#[derive(Deserialize)]
struct RawActionTrace {
    action_ordinal: u32,
    creator_action_ordinal: u32,
    receipt: Option<(String, RawReceipt)>,
    receiver: String,
    act: RawAction,
    #[serde(default)]
    account_ram_deltas: Vec<RawRamDelta>,
}

#[derive(Deserialize)]
struct RawReceipt {
    global_sequence: String,
}

#[derive(Deserialize)]
struct RawAction {
    account: String,
    name: String,
    authorization: Vec<PermissionLevel>,
    data: String,
}

#[derive(Deserialize)]
struct RawRamDelta {
    account: String,
    delta: String,
}

#[derive(Deserialize)]
struct RawContractRow {
    code: String,
    scope: String,
    table: String,
    primary_key: String,
    payer: String,
    value: String,
}

/// Split a decoded `["variant_name", {...}]` pair.
fn variant<'v>(context: &str, value: &'v Value) -> Result<(&'v str, &'v Value), ShipError> {
    match value.as_array().map(Vec::as_slice) {
        Some([Value::String(kind), inner]) => Ok((kind.as_str(), inner)),
        _ => Err(ShipError::decode(context, "expected a [\"variant\", value] pair")),
    }
}

fn bytes_from_hex(context: &str, hex_str: &str) -> Result<Vec<u8>, ShipError> {
    hex::decode(hex_str).map_err(|e| ShipError::decode(context, e))
}

fn convert_action(raw: RawActionTrace, global_sequence: String) -> Result<ActionTrace<Vec<u8>>, ShipError> {
    let account_ram_deltas = raw
        .account_ram_deltas
        .into_iter()
        .map(|d| {
            let delta = d.delta.parse().map_err(|e| ShipError::decode("account_delta", e))?;
            Ok(AccountRamDelta { account: d.account, delta })
        })
        .collect::<Result<Vec<_>, ShipError>>()?;

    Ok(ActionTrace {
        action_ordinal: raw.action_ordinal,
        creator_action_ordinal: raw.creator_action_ordinal,
        global_sequence,
        account_ram_deltas,
        act: Action {
            data: bytes_from_hex("action data", &raw.act.data)?,
            account: raw.act.account,
            name: raw.act.name,
            authorization: raw.act.authorization,
        },
    })
}

// ─── Extraction ─────────────────────────────────────────────────────────────

/// Flatten decoded `transaction_trace[]` into per-action units.
pub fn extract_traces(traces: &[Value]) -> Result<Vec<ExtractedTrace>, ShipError> {
    let mut result = Vec::new();

    for transaction in traces {
        let (kind, inner) = variant("transaction_trace", transaction)?;
        if kind != "transaction_trace_v0" {
            return Err(ShipError::UnsupportedVariant { variant: kind.to_string() });
        }
        let tx = RawTransactionTrace::deserialize(inner).map_err(|e| ShipError::decode("transaction_trace", e))?;
        if tx.status != 0 {
            continue;
        }

        let mut actions = Vec::with_capacity(tx.action_traces.len());
        for action_trace in &tx.action_traces {
            let (kind, inner) = variant("action_trace", action_trace)?;
            if kind != "action_trace_v0" && kind != "action_trace_v1" {
                return Err(ShipError::UnsupportedVariant { variant: kind.to_string() });
            }
            let trace = RawActionTrace::deserialize(inner).map_err(|e| ShipError::decode("action_trace", e))?;
            if trace.receiver != trace.act.account {
                continue;
            }
            let Some((_, receipt)) = &trace.receipt else {
                debug!(tx = %tx.id, action = %trace.act.name, "action trace without receipt skipped");
                continue;
            };
            let global_sequence = receipt.global_sequence.clone();
            actions.push(convert_action(trace, global_sequence)?);
        }
        actions.sort_by_key(|t| sequence_key(&t.global_sequence));

        let shared = Arc::new(ShipTransaction::new(
            tx.id,
            tx.cpu_usage_us,
            tx.net_usage_words,
            actions.iter().cloned().map(|t| t.map_data(Payload::Raw)).collect(),
        ));
        result.extend(actions.into_iter().map(|trace| ExtractedTrace {
            trace,
            tx: shared.clone(),
        }));
    }

    result.sort_by_key(|t| sequence_key(&t.trace.global_sequence));
    Ok(result)
}

/// Collect `contract_row` changes from deltas the session already decoded.
pub fn extract_deltas(deltas: &[ShipTableDelta], required: &[String]) -> Result<Vec<ExtractedDelta>, ShipError> {
    let mut result = Vec::new();

    for delta in deltas {
        if delta.version != "table_delta_v0" && delta.version != "table_delta_v1" {
            return Err(ShipError::UnsupportedVariant {
                variant: delta.version.clone(),
            });
        }
        if delta.name != CONTRACT_ROW_TABLE || !required.iter().any(|r| r == &delta.name) {
            continue;
        }

        for row in &delta.rows {
            let decoded = row.data.decoded().ok_or_else(|| {
                ShipError::decode(CONTRACT_ROW_TABLE, "row was not decoded by the session")
            })?;
            let (kind, inner) = variant(CONTRACT_ROW_TABLE, decoded)?;
            if kind != "contract_row_v0" {
                return Err(ShipError::UnsupportedVariant { variant: kind.to_string() });
            }
            let raw = RawContractRow::deserialize(inner).map_err(|e| ShipError::decode(CONTRACT_ROW_TABLE, e))?;
            result.push(ContractRow {
                value: bytes_from_hex("contract row value", &raw.value)?,
                code: raw.code,
                scope: raw.scope,
                table: raw.table,
                primary_key: raw.primary_key,
                payer: raw.payer,
                present: row.present,
            });
        }
    }

    Ok(result)
}
