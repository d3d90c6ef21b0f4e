//! Block processor: ABI update tracking, listener filtering, batch decode and
//! ordered dispatch.
//!
//! Per block, in order:
//! 1. pre-block hooks (`on_block_start`)
//! 2. `eosio::setabi` traces are decoded and fed into the [`AbiProvider`]
//! 3. block listeners
//! 4. traces and deltas without a matching listener are dropped
//! 5. one ABI per surviving item is resolved, then the batch is decoded
//! 6. trace listeners, then delta listeners, each awaited in turn
//! 7. post-block hooks (`on_block_finished`)

use async_trait::async_trait;
use futures::future::join_all;
use indexmap::IndexSet;
use serde::Deserialize;
use serde_json::Value;
use shipstream_abi::Abi;
use shipstream_core::types::{NULL_ACCOUNT, ON_BLOCK_ACTION, SET_ABI_ACTION, SYSTEM_ACCOUNT};
use shipstream_core::{
    AbiProvider, BlockProcessor, ExtractedDelta, ExtractedTrace, FullBlock, ProcessorOptions, ShipError,
};
use shipstream_decode::{DecodeOutcome, DecodeRequest, Deserializer};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::handler::{
    BlockHandler, DeltaHandler, DeltaListener, DeltaPayload, TraceHandler, TraceListener, TracePayload,
};
use crate::registry::{ListenerHandle, Registry};

/// Decoded `setabi` action payload.
#[derive(Deserialize)]
struct SetAbi {
    account: String,
    /// Hex-encoded binary `abi_def`; empty when the ABI is cleared.
    abi: String,
}

pub struct ShipBlockProcessor {
    deserializer: Arc<dyn Deserializer>,
    abi_provider: Arc<dyn AbiProvider>,
    options: ProcessorOptions,
    trace_listeners: Arc<Registry<TraceListener>>,
    delta_listeners: Arc<Registry<DeltaListener>>,
    block_listeners: Arc<Registry<Arc<dyn BlockHandler>>>,
    pre_block_hooks: Arc<Registry<Arc<dyn BlockHandler>>>,
    post_block_hooks: Arc<Registry<Arc<dyn BlockHandler>>>,
}

impl ShipBlockProcessor {
    pub fn new(
        deserializer: Arc<dyn Deserializer>,
        abi_provider: Arc<dyn AbiProvider>,
        options: ProcessorOptions,
    ) -> Self {
        Self {
            deserializer,
            abi_provider,
            options,
            trace_listeners: Registry::new(),
            delta_listeners: Registry::new(),
            block_listeners: Registry::new(),
            pre_block_hooks: Registry::new(),
            post_block_hooks: Registry::new(),
        }
    }

    // ─── Registration ─────────────────────────────────────────────────────────

    pub fn add_trace_listener(&self, listener: TraceListener) -> ListenerHandle {
        debug!(account = %listener.account, name = %listener.name, "trace listener added");
        self.trace_listeners.insert(listener)
    }

    pub fn add_delta_listener(&self, listener: DeltaListener) -> ListenerHandle {
        debug!(contract = %listener.contract, table = %listener.table, "delta listener added");
        self.delta_listeners.insert(listener)
    }

    pub fn add_block_listener(&self, handler: Arc<dyn BlockHandler>) -> ListenerHandle {
        self.block_listeners.insert(handler)
    }

    pub fn add_pre_block_hook(&self, handler: Arc<dyn BlockHandler>) -> ListenerHandle {
        self.pre_block_hooks.insert(handler)
    }

    pub fn add_post_block_hook(&self, handler: Arc<dyn BlockHandler>) -> ListenerHandle {
        self.post_block_hooks.insert(handler)
    }

    pub fn listener_count(&self) -> usize {
        self.trace_listeners.len() + self.delta_listeners.len() + self.block_listeners.len()
    }

    fn fail_fast(&self) -> bool {
        self.options.fail_on_deserialization_error
    }

    // ─── ABI updates ──────────────────────────────────────────────────────────

    /// Whether a `setabi` for `account` is worth decoding.
    fn tracks_account(&self, account: &str) -> bool {
        account == SYSTEM_ACCOUNT
            || self.delta_listeners.snapshot().iter().any(|l| l.contract.matches(account))
            || self.trace_listeners.snapshot().iter().any(|l| l.account.matches(account))
    }

    async fn process_abi_updates(&self, block: &FullBlock, traces: &[ExtractedTrace]) -> Result<(), ShipError> {
        let updates: Vec<&ExtractedTrace> = traces
            .iter()
            .filter(|t| t.trace.act.account == SYSTEM_ACCOUNT && t.trace.act.name == SET_ABI_ACTION)
            .collect();
        if updates.is_empty() {
            return Ok(());
        }

        let block_num = block.block_num();
        let (system_abi, type_name) = match self.system_setabi_type(block_num).await {
            Ok(found) => found,
            Err(e) if self.fail_fast() => {
                return Err(e.at_block(block_num, format!("Failed to get abi for {SYSTEM_ACCOUNT}")))
            }
            Err(e) => {
                warn!(block_num, error = %e, "cannot decode setabi actions, ABI updates skipped");
                return Ok(());
            }
        };

        let batch = updates
            .iter()
            .map(|t| Some(DecodeRequest::new(type_name.clone(), t.trace.act.data.clone()).with_abi(system_abi.clone())))
            .collect();
        let outcomes = self.deserializer.deserialize(batch).await?;

        for outcome in outcomes {
            let update = outcome.and_then(|value| {
                SetAbi::deserialize(value).map_err(|e| ShipError::decode(SET_ABI_ACTION, e))
            });
            let update = match update {
                Ok(update) => update,
                Err(e) if self.fail_fast() => return Err(e.at_block(block_num, "Failed to deserialize setabi")),
                Err(e) => {
                    warn!(block_num, error = %e, "undecodable setabi action skipped");
                    continue;
                }
            };
            if !self.tracks_account(&update.account) {
                continue;
            }

            match parse_abi(&update.abi) {
                Ok(abi) => {
                    self.abi_provider.set_abi(&update.account, block_num, abi).await?;
                }
                Err(e) if self.fail_fast() => {
                    return Err(e.at_block(block_num, format!("Error deserializing ABI {}", update.account)))
                }
                Err(e) => {
                    warn!(block_num, account = %update.account, error = %e, "Error deserializing ABI");
                }
            }
        }
        Ok(())
    }

    async fn system_setabi_type(&self, block_num: u32) -> Result<(Arc<Abi>, String), ShipError> {
        let abi = self.abi_provider.get_abi(SYSTEM_ACCOUNT, block_num).await?;
        let type_name = abi.action_type(SYSTEM_ACCOUNT, SET_ABI_ACTION)?.to_string();
        Ok((abi, type_name))
    }

    // ─── Resolve + decode ─────────────────────────────────────────────────────

    /// Warm the ABI cache once per account so the per-item lookups that follow
    /// hit the cache. Misses surface again per item.
    async fn warm_abis<'a>(&self, accounts: impl Iterator<Item = &'a str>, block_num: u32) {
        let unique: IndexSet<&str> = accounts.collect();
        for account in unique {
            if let Err(e) = self.abi_provider.get_abi(account, block_num).await {
                debug!(account, block_num, error = %e, "ABI prefetch failed");
            }
        }
    }

    /// Build one decode request, or `None` when the schema cannot be resolved
    /// and failures are tolerated.
    async fn request_for(
        &self,
        account: &str,
        block_num: u32,
        type_of: impl FnOnce(&Abi) -> Result<String, ShipError>,
        data: &[u8],
    ) -> Result<Option<DecodeRequest>, ShipError> {
        let resolved = match self.abi_provider.get_abi(account, block_num).await {
            Ok(abi) => type_of(&abi).map(|type_name| (abi, type_name)),
            Err(e) => Err(e),
        };
        match resolved {
            Ok((abi, type_name)) => Ok(Some(DecodeRequest::new(type_name, data.to_vec()).with_abi(abi))),
            Err(e) if self.fail_fast() => Err(e.at_block(block_num, format!("Failed to get abi for {account}"))),
            Err(e) => {
                warn!(account, block_num, error = %e, "item skipped, no usable ABI");
                Ok(None)
            }
        }
    }

    async fn decode_traces(
        &self,
        block: &FullBlock,
        traces: Vec<ExtractedTrace>,
    ) -> Result<Vec<(TracePayload, Vec<Arc<dyn TraceHandler>>)>, ShipError> {
        let block_num = block.block_num();
        let listeners = self.trace_listeners.snapshot();

        let matched: Vec<(ExtractedTrace, Vec<Arc<dyn TraceHandler>>)> = traces
            .into_iter()
            .filter_map(|t| {
                let act = &t.trace.act;
                if (act.account == SYSTEM_ACCOUNT && act.name == ON_BLOCK_ACTION) || act.account == NULL_ACCOUNT {
                    return None;
                }
                let handlers: Vec<_> = listeners
                    .iter()
                    .filter(|l| l.matches(&act.account, &act.name))
                    .map(|l| l.handler.clone())
                    .collect();
                (!handlers.is_empty()).then_some((t, handlers))
            })
            .collect();
        if matched.is_empty() {
            return Ok(vec![]);
        }

        self.warm_abis(matched.iter().map(|(t, _)| t.trace.act.account.as_str()), block_num)
            .await;

        let requests = join_all(matched.iter().map(|(t, _)| {
            let act = &t.trace.act;
            self.request_for(
                &act.account,
                block_num,
                |abi| Ok(abi.action_type(&act.account, &act.name)?.to_string()),
                &act.data,
            )
        }))
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;

        let outcomes = self.deserializer.deserialize(requests).await?;

        let mut result = Vec::with_capacity(matched.len());
        for ((extracted, handlers), outcome) in matched.into_iter().zip(outcomes) {
            let act = &extracted.trace.act;
            let value = match self.check_outcome(outcome, block_num, "traces", || {
                format!("{}::{} data={}", act.account, act.name, hex::encode_upper(&act.data))
            })? {
                Some(value) => value,
                None => continue,
            };

            extracted.tx.write_back(&extracted.trace.global_sequence, value.clone());
            result.push((
                TracePayload {
                    trace: extracted.trace.map_data(|_| value),
                    tx: extracted.tx,
                },
                handlers,
            ));
        }
        Ok(result)
    }

    async fn decode_deltas(
        &self,
        block: &FullBlock,
        deltas: Vec<ExtractedDelta>,
    ) -> Result<Vec<(DeltaPayload, Vec<Arc<dyn DeltaHandler>>)>, ShipError> {
        let block_num = block.block_num();
        let listeners = self.delta_listeners.snapshot();

        let matched: Vec<(ExtractedDelta, Vec<Arc<dyn DeltaHandler>>)> = deltas
            .into_iter()
            .filter_map(|d| {
                let handlers: Vec<_> = listeners
                    .iter()
                    .filter(|l| l.matches(&d.code, &d.table))
                    .map(|l| l.handler.clone())
                    .collect();
                (!handlers.is_empty()).then_some((d, handlers))
            })
            .collect();
        if matched.is_empty() {
            return Ok(vec![]);
        }

        self.warm_abis(matched.iter().map(|(d, _)| d.code.as_str()), block_num).await;

        let requests = join_all(matched.iter().map(|(d, _)| {
            self.request_for(
                &d.code,
                block_num,
                |abi| Ok(abi.table_type(&d.code, &d.table)?.to_string()),
                &d.value,
            )
        }))
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;

        let outcomes = self.deserializer.deserialize(requests).await?;

        let mut result = Vec::with_capacity(matched.len());
        for ((row, handlers), outcome) in matched.into_iter().zip(outcomes) {
            let value = match self.check_outcome(outcome, block_num, "deltas", || {
                format!("{}:{} data={}", row.code, row.table, hex::encode_upper(&row.value))
            })? {
                Some(value) => value,
                None => continue,
            };
            let payload = DeltaPayload {
                code: row.code,
                scope: row.scope,
                table: row.table,
                primary_key: row.primary_key,
                payer: row.payer,
                present: row.present,
                value,
            };
            result.push((payload, handlers));
        }
        Ok(result)
    }

    /// `Ok(None)` drops the item; in fail-fast mode a failed item aborts the block.
    fn check_outcome(
        &self,
        outcome: DecodeOutcome,
        block_num: u32,
        group: &str,
        describe: impl FnOnce() -> String,
    ) -> Result<Option<Value>, ShipError> {
        match outcome {
            Ok(value) => Ok(Some(value)),
            Err(e) if self.fail_fast() => Err(ShipError::decode(describe(), e)
                .at_block(block_num, format!("Failed to deserialize {group}"))),
            Err(e) => {
                warn!(block_num, group, item = %describe(), error = %e, "item dropped");
                Ok(None)
            }
        }
    }

    async fn run_block_handlers(&self, handlers: Vec<Arc<dyn BlockHandler>>, block: &FullBlock) -> Result<(), ShipError> {
        for handler in handlers {
            handler.on_block(block).await?;
        }
        Ok(())
    }
}

fn parse_abi(hex_abi: &str) -> Result<Option<Abi>, ShipError> {
    let bytes = hex::decode(hex_abi).map_err(|e| ShipError::decode("setabi abi", e))?;
    if bytes.is_empty() {
        return Ok(None);
    }
    Ok(Some(Abi::from_bin(&bytes)?))
}

#[async_trait]
impl BlockProcessor for ShipBlockProcessor {
    async fn on_block_start(&self, block: &FullBlock) -> Result<(), ShipError> {
        self.run_block_handlers(self.pre_block_hooks.snapshot(), block).await
    }

    async fn process_block(
        &self,
        block: &FullBlock,
        traces: Vec<ExtractedTrace>,
        deltas: Vec<ExtractedDelta>,
    ) -> Result<(), ShipError> {
        self.process_abi_updates(block, &traces).await?;

        self.run_block_handlers(self.block_listeners.snapshot(), block).await?;

        let (traces, deltas) = futures::try_join!(self.decode_traces(block, traces), self.decode_deltas(block, deltas))?;
        debug!(block_num = block.block_num(), traces = traces.len(), deltas = deltas.len(), "dispatching block");

        for (payload, handlers) in &traces {
            for handler in handlers {
                handler.on_trace(payload, block).await?;
            }
        }
        for (payload, handlers) in &deltas {
            for handler in handlers {
                handler.on_delta(payload, block).await?;
            }
        }
        Ok(())
    }

    async fn on_block_finished(&self, block: &FullBlock) -> Result<(), ShipError> {
        self.run_block_handlers(self.post_block_hooks.snapshot(), block).await
    }
}
