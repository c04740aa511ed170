use analysis_core::{AnalysisRecord, CacheEntry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::{normalize_key, AnalysisStore};

/// Process-local store, used in tests and when no data directory is configured.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<BTreeMap<String, CacheEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with pre-built entries.
    pub fn with_entries(entries: impl IntoIterator<Item = CacheEntry>) -> Self {
        let map = entries
            .into_iter()
            .map(|mut e| {
                e.key = normalize_key(&e.key);
                (e.key.clone(), e)
            })
            .collect();
        Self {
            entries: RwLock::new(map),
        }
    }
}

#[async_trait]
impl AnalysisStore for InMemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<CacheEntry>> {
        Ok(self.entries.read().await.get(&normalize_key(key)).cloned())
    }

    async fn put(&self, key: &str, record: AnalysisRecord, now: DateTime<Utc>) -> StoreResult<()> {
        let key = normalize_key(key);
        if key.is_empty() {
            return Err(StoreError::EmptyKey);
        }
        self.entries.write().await.insert(
            key.clone(),
            CacheEntry {
                key,
                timestamp: now,
                record,
            },
        );
        Ok(())
    }

    async fn entries(&self) -> StoreResult<Vec<CacheEntry>> {
        Ok(self.entries.read().await.values().cloned().collect())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
