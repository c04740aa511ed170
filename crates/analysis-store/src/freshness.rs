use analysis_core::CacheEntry;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub const DEFAULT_TTL_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Fresh,
    Stale,
}

/// Entries younger than `ttl_days` whole days are fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    ttl_days: i64,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self::days(DEFAULT_TTL_DAYS)
    }
}

impl FreshnessPolicy {
    pub fn days(ttl_days: i64) -> Self {
        Self { ttl_days: ttl_days.max(0) }
    }

    pub fn ttl_days(&self) -> i64 {
        self.ttl_days
    }

    /// Whole days elapsed since the entry was written. Future timestamps count as 0.
    pub fn age_days(&self, entry: &CacheEntry, now: DateTime<Utc>) -> i64 {
        (now - entry.timestamp).num_days().max(0)
    }

    pub fn classify(&self, entry: &CacheEntry, now: DateTime<Utc>) -> Freshness {
        if self.age_days(entry, now) < self.ttl_days {
            Freshness::Fresh
        } else {
            Freshness::Stale
        }
    }

    pub fn is_fresh(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        self.classify(entry, now) == Freshness::Fresh
    }
}
