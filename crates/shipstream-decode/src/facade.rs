//! Strategy-selecting decoder used by the session and the block processor.

use async_trait::async_trait;
use shipstream_abi::Abi;
use shipstream_core::{DeserializerConfig, ShipError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tracing::info;

use crate::parallel::ParallelDeserializer;
use crate::request::{DecodeOutcome, DecodeRequest, Deserializer};
use crate::single::SingleThreadDeserializer;

/// Picks [`SingleThreadDeserializer`] for `threads == 0` and
/// [`ParallelDeserializer`] otherwise. The choice is made by [`init`], which
/// must run before the first batch; re-initializing replaces the engine.
///
/// [`init`]: ShipDeserializer::init
pub struct ShipDeserializer {
    config: DeserializerConfig,
    strategy: RwLock<Option<Arc<dyn Deserializer>>>,
    waiting: AtomicUsize,
}

impl ShipDeserializer {
    pub fn new(config: DeserializerConfig) -> Self {
        Self {
            config,
            strategy: RwLock::new(None),
            waiting: AtomicUsize::new(0),
        }
    }

    pub fn init(&self, abi: &Abi) -> Result<(), ShipError> {
        let strategy: Arc<dyn Deserializer> = if self.config.threads > 0 {
            Arc::new(ParallelDeserializer::new(abi, self.config.threads)?)
        } else {
            Arc::new(SingleThreadDeserializer::new(abi)?)
        };
        info!(threads = self.config.threads, "deserializer initialized");
        *self.strategy.write().unwrap_or_else(|e| e.into_inner()) = Some(strategy);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.strategy.read().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    pub fn is_parallel(&self) -> bool {
        self.config.threads > 0
    }

    /// Batches currently being decoded.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Relaxed)
    }

    fn current(&self) -> Result<Arc<dyn Deserializer>, ShipError> {
        self.strategy
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| ShipError::DeserializerUnavailable("deserializer not initialized".into()))
    }
}

impl Default for ShipDeserializer {
    fn default() -> Self {
        Self::new(DeserializerConfig::default())
    }
}

#[async_trait]
impl Deserializer for ShipDeserializer {
    async fn deserialize(&self, batch: Vec<Option<DecodeRequest>>) -> Result<Vec<DecodeOutcome>, ShipError> {
        let strategy = self.current()?;
        self.waiting.fetch_add(1, Ordering::Relaxed);
        let result = strategy.deserialize(batch).await;
        self.waiting.fetch_sub(1, Ordering::Relaxed);
        result
    }

    async fn terminate(&self) {
        let strategy = self.strategy.write().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(strategy) = strategy {
            strategy.terminate().await;
        }
    }
}
