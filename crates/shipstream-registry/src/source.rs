//! In-memory [`SchemaSource`] for tests and offline replays.

use async_trait::async_trait;
use shipstream_abi::Abi;
use shipstream_core::{SchemaSource, ShipError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct StaticSchemaSource {
    head: AtomicU32,
    schemas: Mutex<HashMap<String, Abi>>,
    lookups: AtomicUsize,
}

impl StaticSchemaSource {
    pub fn new(head: u32) -> Self {
        Self {
            head: AtomicU32::new(head),
            ..Default::default()
        }
    }

    pub fn with_schema(self, account: impl Into<String>, abi: Abi) -> Self {
        self.insert(account, abi);
        self
    }

    pub fn insert(&self, account: impl Into<String>, abi: Abi) {
        self.schemas
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(account.into(), abi);
    }

    pub fn set_head(&self, head: u32) {
        self.head.store(head, Ordering::Relaxed);
    }

    /// Number of `get_schema` calls served.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SchemaSource for StaticSchemaSource {
    async fn get_current_head(&self) -> Result<u32, ShipError> {
        Ok(self.head.load(Ordering::Relaxed))
    }

    async fn get_schema(&self, account: &str) -> Result<Option<Abi>, ShipError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .schemas
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(account)
            .cloned())
    }
}
