//! `shipstream.yaml` document.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shipstream_core::{ConnectionOptions, ConsumerSettings, DeserializerConfig, Pattern, ProcessorOptions};
use shipstream_observability::LogConfig;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// State-history WebSocket endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Chain API used to fetch contract ABIs on a cache miss.
    #[serde(default)]
    pub api: Option<String>,
    /// First block to request when nothing has been processed yet.
    #[serde(default = "default_start_block")]
    pub start_block: u32,
    /// Blocks held back before committing.
    #[serde(default)]
    pub block_delay: usize,
    #[serde(default)]
    pub connection: ConnectionOptions,
    #[serde(default)]
    pub consumer: ConsumerSettings,
    #[serde(default)]
    pub deserializer: DeserializerConfig,
    #[serde(default)]
    pub processor: ProcessorOptions,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub traces: Vec<TraceFilter>,
    #[serde(default)]
    pub deltas: Vec<DeltaFilter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceFilter {
    #[serde(default = "any")]
    pub account: Pattern,
    #[serde(default = "any")]
    pub name: Pattern,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaFilter {
    #[serde(default = "any")]
    pub contract: Pattern,
    #[serde(default = "any")]
    pub table: Pattern,
}

fn default_endpoint() -> String {
    "ws://127.0.0.1:8080".to_string()
}

fn default_start_block() -> u32 {
    1
}

fn any() -> Pattern {
    Pattern::Any
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api: None,
            start_block: default_start_block(),
            block_delay: 0,
            connection: ConnectionOptions::default(),
            consumer: ConsumerSettings::default(),
            deserializer: DeserializerConfig::default(),
            processor: ProcessorOptions::default(),
            log: LogConfig::default(),
            traces: vec![],
            deltas: vec![],
        }
    }
}

impl StreamConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_config_parses() {
        let config: StreamConfig = serde_yaml::from_str(include_str!("../shipstream.example.yaml")).unwrap();
        assert_eq!(config.endpoint, "ws://127.0.0.1:8080");
        assert_eq!(config.deserializer.threads, 2);
        assert_eq!(config.consumer.max_messages_in_flight, 10);
        assert!(!config.consumer.irreversible_only);
        assert_eq!(config.traces[0].name, Pattern::exact("transfer"));
        assert_eq!(config.deltas[0].table, Pattern::exact("accounts"));
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config: StreamConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.start_block, 1);
        assert!(config.api.is_none());
        assert_eq!(config.connection.reconnect_delay_ms, 5_000);
        assert!(config.traces.is_empty());
    }

    #[test]
    fn omitted_filter_fields_match_anything() {
        let filter: TraceFilter = serde_yaml::from_str("account: alice").unwrap();
        assert_eq!(filter.name, Pattern::Any);
    }
}
