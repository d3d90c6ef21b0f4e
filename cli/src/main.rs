//! ShipStream CLI.
//!
//! # Commands
//! ```text
//! shipstream stream --config <shipstream.yaml> [--endpoint <ws-url>] [--api <http-url>] [--start <N>] [--end <N>]
//! shipstream decode --abi <contract.abi.json> --type <name> --hex <data>
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shipstream_abi::{Abi, TypeTable};
use shipstream_consumer::{LocalBlockRepository, ShipBlockConsumer};
use shipstream_core::SchemaSource;
use shipstream_decode::ShipDeserializer;
use shipstream_processor::{DeltaListener, ShipBlockProcessor, TraceListener};
use shipstream_registry::{LocalAbiProvider, RpcSchemaSource, StaticSchemaSource};
use shipstream_stream::{ShipEvent, StateHistoryConnection};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

mod config;
mod output;

use config::StreamConfig;
use output::JsonLines;

#[derive(Parser)]
#[command(
    name = "shipstream",
    about = "Stream decoded Antelope state-history data as JSON lines",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a state-history node and print matching traces and deltas
    Stream {
        /// YAML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// State-history WebSocket endpoint (overrides the config)
        #[arg(long)]
        endpoint: Option<String>,
        /// Chain API endpoint used for ABI lookups (overrides the config)
        #[arg(long)]
        api: Option<String>,
        /// First block to request
        #[arg(long)]
        start: Option<u32>,
        /// Stop before this block
        #[arg(long)]
        end: Option<u32>,
        /// Also print one line per block
        #[arg(long)]
        blocks: bool,
    },

    /// Decode hex data with a contract ABI
    Decode {
        /// Path to the ABI JSON file
        #[arg(long)]
        abi: PathBuf,
        /// Struct, action or variant type name
        #[arg(long = "type")]
        type_name: String,
        /// Serialized data as hex
        #[arg(long)]
        hex: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Stream { config, endpoint, api, start, end, blocks } => {
            let mut config = match config {
                Some(path) => StreamConfig::load(&path)?,
                None => StreamConfig::default(),
            };
            if let Some(endpoint) = endpoint {
                config.endpoint = endpoint;
            }
            if api.is_some() {
                config.api = api;
            }
            if let Some(start) = start {
                config.start_block = start;
            }
            if let Some(end) = end {
                config.consumer.end_block = end;
            }
            cmd_stream(config, blocks).await
        }

        Commands::Decode { abi, type_name, hex } => cmd_decode(&abi, &type_name, &hex),
    }
}

async fn cmd_stream(config: StreamConfig, print_blocks: bool) -> Result<()> {
    shipstream_observability::init_tracing(&config.log)?;

    let source: Arc<dyn SchemaSource> = match &config.api {
        Some(api) => Arc::new(RpcSchemaSource::new(api.as_str())?),
        None => {
            warn!("no chain API configured; contracts without an on-chain setabi cannot be decoded");
            Arc::new(StaticSchemaSource::new(0))
        }
    };
    let abi_provider = Arc::new(LocalAbiProvider::new(source));
    let deserializer = Arc::new(ShipDeserializer::new(config.deserializer.clone()));

    let processor = Arc::new(ShipBlockProcessor::new(
        deserializer.clone(),
        abi_provider,
        config.processor.clone(),
    ));
    let printer = Arc::new(JsonLines);
    for filter in &config.traces {
        processor.add_trace_listener(TraceListener::new(filter.account.clone(), filter.name.clone(), printer.clone()));
    }
    for filter in &config.deltas {
        processor.add_delta_listener(DeltaListener::new(filter.contract.clone(), filter.table.clone(), printer.clone()));
    }
    if print_blocks {
        processor.add_block_listener(printer.clone());
    }
    info!(listeners = processor.listener_count(), "processor ready");

    let repository = Arc::new(LocalBlockRepository::starting_at(config.start_block));
    let consumer = Arc::new(ShipBlockConsumer::new(
        config.consumer.clone(),
        repository,
        processor,
        config.block_delay,
    ));

    let connection = StateHistoryConnection::new(config.endpoint.clone(), config.connection.clone(), deserializer);
    let mut events = connection.subscribe();
    connection
        .start_processing(consumer)
        .await
        .context("starting the ship connection")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, stopping");
                break;
            }
            event = events.recv() => match event {
                Ok(ShipEvent::Warning(message)) if message.ends_with("Reader finished reading.") => break,
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event stream lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    connection.stop_processing().await;
    Ok(())
}

fn cmd_decode(abi_path: &Path, type_name: &str, data: &str) -> Result<()> {
    let text = std::fs::read_to_string(abi_path).with_context(|| format!("reading {}", abi_path.display()))?;
    let abi = Abi::from_json(&text).context("parsing ABI")?;
    let types = TypeTable::new(&abi).context("compiling ABI types")?;

    // action names resolve to their struct type
    let resolved = abi.action_type("", type_name).unwrap_or(type_name);
    let bytes = hex::decode(data.trim_start_matches("0x")).context("data is not valid hex")?;
    let value = types.decode(resolved, &bytes)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
