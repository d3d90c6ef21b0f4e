//! Tracing / logging initialisation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Error)]
pub enum LogInitError {
    #[error("invalid log directives '{directives}': {reason}")]
    InvalidDirectives { directives: String, reason: String },

    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Log levels and output format.
///
/// ```yaml
/// level: info
/// json: false
/// components:
///   stream: debug      # shipstream_stream
///   session: trace     # shipstream::session (session events)
///   tokio_tungstenite: warn
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global default: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Per-component overrides. Short names (`stream`, `registry`, ...)
    /// expand to the `shipstream_*` crate; anything else is used as a target.
    #[serde(default)]
    pub components: BTreeMap<String, String>,
    /// JSON lines instead of human-readable text.
    #[serde(default)]
    pub json: bool,
    /// Let `RUST_LOG` replace the configured directives when set.
    #[serde(default = "default_true")]
    pub use_env: bool,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

const CRATES: &[&str] = &[
    "abi",
    "core",
    "decode",
    "registry",
    "processor",
    "consumer",
    "stream",
    "observability",
];

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: BTreeMap::new(),
            json: false,
            use_env: true,
        }
    }
}

impl LogConfig {
    /// `EnvFilter` directive string, e.g. `info,shipstream_stream=debug`.
    pub fn directives(&self) -> String {
        let mut directives = self.level.clone();
        for (component, level) in &self.components {
            directives.push(',');
            directives.push_str(&component_target(component));
            directives.push('=');
            directives.push_str(level);
        }
        directives
    }

    fn filter(&self) -> Result<EnvFilter, LogInitError> {
        if self.use_env {
            if let Ok(filter) = EnvFilter::try_from_default_env() {
                return Ok(filter);
            }
        }
        let directives = self.directives();
        EnvFilter::try_new(&directives).map_err(|e| LogInitError::InvalidDirectives {
            directives,
            reason: e.to_string(),
        })
    }
}

fn component_target(component: &str) -> String {
    match component {
        "session" => "shipstream::session".to_string(),
        c if CRATES.contains(&c) => format!("shipstream_{c}"),
        c => c.replace('-', "_"),
    }
}

/// Install the global subscriber. Call once at startup.
pub fn init_tracing(config: &LogConfig) -> Result<(), LogInitError> {
    let filter = config.filter()?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json {
        registry.with(fmt::layer().json().with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };
    installed.map_err(|_| LogInitError::AlreadyInitialized)
}
