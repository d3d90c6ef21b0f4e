//! Fixed-size rayon pool. Each batch runs on one pool thread and the result
//! comes back over a oneshot channel, so the async caller never blocks.

use async_trait::async_trait;
use rayon::{ThreadPool, ThreadPoolBuilder};
use shipstream_abi::{Abi, TypeTable};
use shipstream_core::ShipError;
use std::sync::{Arc, RwLock};
use tokio::sync::oneshot;
use tracing::debug;

use crate::request::{decode_batch, DecodeOutcome, DecodeRequest, Deserializer};

pub struct ParallelDeserializer {
    table: Arc<TypeTable>,
    pool: RwLock<Option<Arc<ThreadPool>>>,
    threads: usize,
}

impl ParallelDeserializer {
    pub fn new(abi: &Abi, threads: usize) -> Result<Self, ShipError> {
        let threads = threads.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("ship-decode-{i}"))
            .build()
            .map_err(|e| ShipError::DeserializerUnavailable(e.to_string()))?;
        debug!(threads, "decode worker pool started");

        Ok(Self {
            table: Arc::new(TypeTable::new(abi)?),
            pool: RwLock::new(Some(Arc::new(pool))),
            threads,
        })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn is_terminated(&self) -> bool {
        self.pool.read().unwrap_or_else(|e| e.into_inner()).is_none()
    }
}

#[async_trait]
impl Deserializer for ParallelDeserializer {
    async fn deserialize(&self, batch: Vec<Option<DecodeRequest>>) -> Result<Vec<DecodeOutcome>, ShipError> {
        let pool = self
            .pool
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| ShipError::DeserializerUnavailable("decode worker pool terminated".into()))?;

        let (tx, rx) = oneshot::channel();
        let table = self.table.clone();
        pool.spawn(move || {
            let _ = tx.send(decode_batch(&table, batch));
        });

        rx.await
            .map_err(|_| ShipError::DeserializerUnavailable("decode worker dropped the batch".into()))
    }

    async fn terminate(&self) {
        let pool = self.pool.write().unwrap_or_else(|e| e.into_inner()).take();
        if pool.is_some() {
            debug!(threads = self.threads, "decode worker pool terminated");
        }
    }
}
