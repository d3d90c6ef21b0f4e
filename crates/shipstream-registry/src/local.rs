//! Per-account ABI history with lazy fetch on miss.
//!
//! Records are kept newest-block-first. A lookup at block `N` returns the
//! record with the greatest block `<= N`; when every record is newer than
//! `N`, the most recently registered record is returned instead. Only an
//! account with no record at all goes to the [`SchemaSource`].

use async_trait::async_trait;
use shipstream_abi::Abi;
use shipstream_core::{AbiProvider, SchemaSource, ShipError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct SchemaRecord {
    block_num: u32,
    seq: u64,
    /// `None` = looked up and not found.
    abi: Option<Arc<Abi>>,
}

pub struct LocalAbiProvider {
    source: Arc<dyn SchemaSource>,
    records: Mutex<HashMap<String, Vec<SchemaRecord>>>,
    seq: AtomicU64,
    /// Serializes source lookups so concurrent misses fetch once.
    fetch_lock: tokio::sync::Mutex<()>,
}

impl LocalAbiProvider {
    pub fn new(source: Arc<dyn SchemaSource>) -> Self {
        Self {
            source,
            records: Mutex::new(HashMap::new()),
            seq: AtomicU64::new(0),
            fetch_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Register a record directly (negative entries included).
    pub fn register(&self, account: &str, block_num: u32, abi: Option<Arc<Abi>>) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let list = records.entry(account.to_string()).or_default();
        list.push(SchemaRecord { block_num, seq, abi });
        list.sort_by(|a, b| b.block_num.cmp(&a.block_num).then(b.seq.cmp(&a.seq)));
    }

    /// Block numbers recorded for `account`, newest block first.
    pub fn history(&self, account: &str) -> Vec<u32> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(account)
            .map(|list| list.iter().map(|r| r.block_num).collect())
            .unwrap_or_default()
    }

    /// `Some(record)` when the cache can answer without the source.
    fn cached(&self, account: &str, block_num: u32) -> Option<Option<Arc<Abi>>> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let list = records.get(account)?;
        list.iter()
            .find(|r| r.block_num <= block_num)
            .or_else(|| list.iter().max_by_key(|r| r.seq))
            .map(|r| r.abi.clone())
    }

    fn answer(account: &str, record: Option<Arc<Abi>>) -> Result<Arc<Abi>, ShipError> {
        record.ok_or_else(|| ShipError::SchemaNotFound {
            account: account.to_string(),
        })
    }
}

#[async_trait]
impl AbiProvider for LocalAbiProvider {
    async fn get_abi(&self, account: &str, block_num: u32) -> Result<Arc<Abi>, ShipError> {
        if let Some(record) = self.cached(account, block_num) {
            return Self::answer(account, record);
        }

        let _guard = self.fetch_lock.lock().await;
        if let Some(record) = self.cached(account, block_num) {
            return Self::answer(account, record);
        }

        let head = self.source.get_current_head().await?;
        match self.source.get_schema(account).await? {
            Some(abi) => {
                debug!(account, head, "ABI fetched from schema source");
                let abi = Arc::new(abi);
                self.register(account, head, Some(abi.clone()));
                Ok(abi)
            }
            None => {
                debug!(account, head, "no ABI at schema source, caching miss");
                self.register(account, head, None);
                Self::answer(account, None)
            }
        }
    }

    async fn set_abi(&self, account: &str, block_num: u32, abi: Option<Abi>) -> Result<(), ShipError> {
        info!(account, block_num, present = abi.is_some(), "ABI version registered");
        self.register(account, block_num, abi.map(Arc::new));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::StaticSchemaSource;

    fn abi(version: &str) -> Abi {
        Abi {
            version: version.into(),
            ..Default::default()
        }
    }

    fn provider(source: StaticSchemaSource) -> (Arc<StaticSchemaSource>, LocalAbiProvider) {
        let source = Arc::new(source);
        let provider = LocalAbiProvider::new(source.clone());
        (source, provider)
    }

    #[tokio::test]
    async fn resolves_greatest_block_at_or_below() {
        let (source, cache) = provider(StaticSchemaSource::new(1_000));
        cache.set_abi("game", 10, Some(abi("v10"))).await.unwrap();
        cache.set_abi("game", 30, Some(abi("v30"))).await.unwrap();
        cache.set_abi("game", 20, Some(abi("v20"))).await.unwrap();

        assert_eq!(cache.get_abi("game", 25).await.unwrap().version, "v20");
        assert_eq!(cache.get_abi("game", 30).await.unwrap().version, "v30");
        assert_eq!(cache.get_abi("game", 10).await.unwrap().version, "v10");
        assert_eq!(cache.history("game"), vec![30, 20, 10]);
        assert_eq!(source.lookups(), 0);
    }

    #[tokio::test]
    async fn falls_back_to_most_recently_registered() {
        let (source, cache) = provider(StaticSchemaSource::new(1_000));
        cache.set_abi("game", 100, Some(abi("v100"))).await.unwrap();
        cache.set_abi("game", 50, Some(abi("v50"))).await.unwrap();

        // both records are newer than block 10
        assert_eq!(cache.get_abi("game", 10).await.unwrap().version, "v50");
        assert_eq!(source.lookups(), 0);
    }

    #[tokio::test]
    async fn miss_fetches_once_and_registers_at_head() {
        let (source, cache) = provider(StaticSchemaSource::new(500).with_schema("token", abi("remote")));

        assert_eq!(cache.get_abi("token", 7).await.unwrap().version, "remote");
        assert_eq!(cache.get_abi("token", 9).await.unwrap().version, "remote");
        assert_eq!(cache.history("token"), vec![500]);
        assert_eq!(source.lookups(), 1);
    }

    #[tokio::test]
    async fn missing_schema_is_cached_negatively() {
        let (source, cache) = provider(StaticSchemaSource::new(500));

        for _ in 0..3 {
            let err = cache.get_abi("nobody", 1).await.unwrap_err();
            assert!(matches!(err, ShipError::SchemaNotFound { ref account } if account == "nobody"));
        }
        assert_eq!(source.lookups(), 1);

        // a later setabi supersedes the negative entry
        cache.set_abi("nobody", 600, Some(abi("deployed"))).await.unwrap();
        assert_eq!(cache.get_abi("nobody", 700).await.unwrap().version, "deployed");
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_fetch() {
        let (source, cache) = provider(StaticSchemaSource::new(1).with_schema("token", abi("remote")));
        let cache = Arc::new(cache);
        let calls = (0..5).map(|_| {
            let cache = cache.clone();
            async move { cache.get_abi("token", 1).await }
        });
        for result in futures::future::join_all(calls).await {
            assert!(result.is_ok());
        }
        assert_eq!(source.lookups(), 1);
    }
}
