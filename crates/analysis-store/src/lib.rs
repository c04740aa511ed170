//! Durable storage for analysis records, keyed by normalized query.

pub mod error;
pub mod freshness;
pub mod json_file;
pub mod locks;
pub mod memory;

pub use error::{StoreError, StoreResult};
pub use freshness::{Freshness, FreshnessPolicy, DEFAULT_TTL_DAYS};
pub use json_file::{JsonFileStore, DOCUMENT_FILE_NAME};
pub use locks::{KeyGuard, KeyLocks};
pub use memory::InMemoryStore;

use analysis_core::{AnalysisRecord, CacheEntry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Trim and uppercase a free-text query.
///
/// `"  aapl "` and `"AAPL"` share an entry; a company name and its ticker do not.
pub fn normalize_key(query: &str) -> String {
    query.trim().to_uppercase()
}

/// Key to record mapping. Keys are normalized by the store.
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<CacheEntry>>;

    /// Create or overwrite the entry for `key`, stamped with `now`.
    async fn put(&self, key: &str, record: AnalysisRecord, now: DateTime<Utc>) -> StoreResult<()>;

    /// Every stored entry, ordered by key.
    async fn entries(&self) -> StoreResult<Vec<CacheEntry>>;

    fn backend_name(&self) -> &'static str;
}
