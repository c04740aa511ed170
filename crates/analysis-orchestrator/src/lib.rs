//! Request flow for one analysis query: cache read, model call, parsing,
//! validation and cache write, with a stale fallback when a refresh fails.

pub mod error;

pub use error::{AnalyzeError, AnalyzeResult};

use analysis_core::{
    parse_completion, podium, rank, AnalysisRecord, CacheEntry, CriterionDetail, RankingRow,
    ScoreValidator, TotalPolicy, Validated, ValidationNotice,
};
use analysis_store::{normalize_key, AnalysisStore, Freshness, FreshnessPolicy, KeyLocks};
use chrono::{DateTime, Utc};
use llm_client::{CompletionProvider, LlmError, RequestBuilder};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Where the returned record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisSource {
    /// Fresh cache entry, no model call
    Cache,
    /// Produced by the model during this request
    Fresh,
    /// Refresh failed, the previous (stale) entry is shown instead
    StaleFallback,
}

/// A refresh attempt that failed while an older entry was available.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshFailure {
    pub reason: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_completion: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
    pub key: String,
    pub source: AnalysisSource,
    pub analyzed_at: DateTime<Utc>,
    pub age_days: i64,
    pub record: AnalysisRecord,
    pub details: Vec<CriterionDetail>,
    /// Corrections made to a fresh model record
    pub notices: Vec<ValidationNotice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_failure: Option<RefreshFailure>,
    /// False when a fresh record could not be written back to the store
    pub persisted: bool,
}

/// A stored entry as seen by a read-only lookup.
#[derive(Debug, Clone, Serialize)]
pub struct StoredAnalysis {
    pub key: String,
    pub analyzed_at: DateTime<Utc>,
    pub age_days: i64,
    pub freshness: Freshness,
    pub record: AnalysisRecord,
    pub details: Vec<CriterionDetail>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankingView {
    pub rows: Vec<RankingRow>,
    /// Top three rows, present once at least three analyses exist
    pub podium: Option<Vec<RankingRow>>,
}

pub struct StockAnalyzer {
    provider: Arc<dyn CompletionProvider>,
    store: Arc<dyn AnalysisStore>,
    request_builder: RequestBuilder,
    validator: ScoreValidator,
    freshness: FreshnessPolicy,
    request_timeout: Duration,
    locks: KeyLocks,
}

impl StockAnalyzer {
    pub fn new(provider: Arc<dyn CompletionProvider>, store: Arc<dyn AnalysisStore>) -> Self {
        Self {
            provider,
            store,
            request_builder: RequestBuilder::default(),
            validator: ScoreValidator::new(),
            freshness: FreshnessPolicy::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            locks: KeyLocks::new(),
        }
    }

    pub fn with_request_builder(mut self, request_builder: RequestBuilder) -> Self {
        self.request_builder = request_builder;
        self
    }

    pub fn with_total_policy(mut self, policy: TotalPolicy) -> Self {
        self.validator = ScoreValidator::with_policy(policy);
        self
    }

    pub fn with_freshness(mut self, freshness: FreshnessPolicy) -> Self {
        self.freshness = freshness;
        self
    }

    /// Upper bound on one model call, on top of any client-side timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn backend_names(&self) -> (&'static str, &'static str) {
        (self.provider.backend_name(), self.store.backend_name())
    }

    pub async fn analyze(&self, query: &str, refresh: bool) -> AnalyzeResult<AnalysisOutcome> {
        self.analyze_at(query, refresh, Utc::now()).await
    }

    /// Serve `query` from a fresh cache entry, or ask the model and store the result.
    ///
    /// With `refresh` set, a fresh entry is ignored. When the model call or the
    /// parse fails and an older entry exists, that entry is returned as
    /// [`AnalysisSource::StaleFallback`]; without one the failure is the result.
    pub async fn analyze_at(
        &self,
        query: &str,
        refresh: bool,
        now: DateTime<Utc>,
    ) -> AnalyzeResult<AnalysisOutcome> {
        let key = normalize_key(query);
        if key.is_empty() {
            return Err(AnalyzeError::EmptyQuery);
        }

        let _guard = self.locks.lock(&key).await;

        let cached = self.store.get(&key).await?;
        if let Some(entry) = &cached {
            if !refresh && self.freshness.is_fresh(entry, now) {
                tracing::debug!(
                    "Cache hit for {} ({} days old)",
                    key,
                    self.freshness.age_days(entry, now)
                );
                return Ok(self.outcome_from_entry(entry.clone(), AnalysisSource::Cache, now));
            }
        }

        match self.request_analysis(query.trim()).await {
            Ok(validated) => Ok(self.store_fresh(key, validated, now).await),
            Err(e) => match cached {
                Some(entry) => {
                    tracing::warn!(
                        "Refresh for {} failed, serving entry from {}: {}",
                        key,
                        entry.timestamp,
                        e
                    );
                    let mut outcome =
                        self.outcome_from_entry(entry, AnalysisSource::StaleFallback, now);
                    outcome.refresh_failure = Some(refresh_failure(e));
                    Ok(outcome)
                }
                None => {
                    tracing::error!("Analysis for {} failed: {}", key, e);
                    Err(e)
                }
            },
        }
    }

    async fn request_analysis(&self, query: &str) -> AnalyzeResult<Validated> {
        let prompt = self.request_builder.build(query);

        let completion =
            match tokio::time::timeout(self.request_timeout, self.provider.generate(&prompt)).await {
                Ok(result) => result?,
                Err(_) => return Err(LlmError::Timeout(self.request_timeout.as_secs()).into()),
            };

        let raw = parse_completion(&completion).map_err(|source| AnalyzeError::Parse {
            source,
            raw_completion: completion.clone(),
        })?;

        Ok(self.validator.validate(raw))
    }

    async fn store_fresh(&self, key: String, validated: Validated, now: DateTime<Utc>) -> AnalysisOutcome {
        let Validated { record, notices } = validated;

        let persisted = match self.store.put(&key, record.clone(), now).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to store analysis for {}: {}", key, e);
                false
            }
        };

        tracing::info!(
            "Analyzed {} ({}): total {} with {} notices",
            key,
            record.ticker,
            record.total_score,
            notices.len()
        );

        AnalysisOutcome {
            key,
            source: AnalysisSource::Fresh,
            analyzed_at: now,
            age_days: 0,
            details: record.details(),
            record,
            notices,
            refresh_failure: None,
            persisted,
        }
    }

    fn outcome_from_entry(
        &self,
        entry: CacheEntry,
        source: AnalysisSource,
        now: DateTime<Utc>,
    ) -> AnalysisOutcome {
        let age_days = self.freshness.age_days(&entry, now);
        AnalysisOutcome {
            key: entry.key,
            source,
            analyzed_at: entry.timestamp,
            age_days,
            details: entry.record.details(),
            record: entry.record,
            notices: Vec::new(),
            refresh_failure: None,
            persisted: true,
        }
    }

    pub async fn lookup(&self, query: &str) -> AnalyzeResult<Option<StoredAnalysis>> {
        self.lookup_at(query, Utc::now()).await
    }

    /// Read a stored entry without calling the model.
    pub async fn lookup_at(
        &self,
        query: &str,
        now: DateTime<Utc>,
    ) -> AnalyzeResult<Option<StoredAnalysis>> {
        let key = normalize_key(query);
        if key.is_empty() {
            return Err(AnalyzeError::EmptyQuery);
        }

        Ok(self.store.get(&key).await?.map(|entry| StoredAnalysis {
            freshness: self.freshness.classify(&entry, now),
            age_days: self.freshness.age_days(&entry, now),
            key: entry.key,
            analyzed_at: entry.timestamp,
            details: entry.record.details(),
            record: entry.record,
        }))
    }

    pub async fn ranking(&self) -> AnalyzeResult<RankingView> {
        let entries = self.store.entries().await?;
        let rows = rank(&entries);
        let podium = podium(&rows).map(|top| top.to_vec());
        Ok(RankingView { rows, podium })
    }
}

fn refresh_failure(error: AnalyzeError) -> RefreshFailure {
    let retryable = error.is_retryable();
    let reason = error.to_string();
    let raw_completion = match error {
        AnalyzeError::Parse { raw_completion, .. } => Some(raw_completion),
        _ => None,
    };
    RefreshFailure {
        reason,
        retryable,
        raw_completion,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis_core::{ParseError, RUBRIC};
    use analysis_store::{InMemoryStore, StoreError, StoreResult};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use llm_client::{AnalysisPrompt, LlmResult, ScriptedProvider, ScriptedReply};
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 9, 30, 0).unwrap()
    }

    /// A well-formed completion giving every criterion one point.
    fn completion(ticker: &str, total: f64) -> String {
        let scores: serde_json::Map<String, serde_json::Value> = RUBRIC
            .iter()
            .map(|c| {
                (
                    c.id.to_string(),
                    json!({"value": "n/a", "score": 1, "reason": "scripted"}),
                )
            })
            .collect();
        json!({
            "company_name": format!("{} Inc", ticker),
            "ticker": ticker,
            "scores": scores,
            "total_score": total,
            "analysis_summary": "Scripted summary."
        })
        .to_string()
    }

    fn entry(key: &str, total: u32, timestamp: DateTime<Utc>) -> CacheEntry {
        CacheEntry {
            key: key.to_string(),
            timestamp,
            record: AnalysisRecord {
                company_name: format!("{} Inc", key),
                ticker: key.to_string(),
                scores: Default::default(),
                total_score: total,
                summary: "stored".to_string(),
            },
        }
    }

    fn analyzer(provider: Arc<ScriptedProvider>, store: Arc<InMemoryStore>) -> StockAnalyzer {
        StockAnalyzer::new(provider, store)
    }

    #[tokio::test]
    async fn test_fresh_analysis_is_stored() {
        let provider = Arc::new(ScriptedProvider::completions([completion("AAPL", 13.0)]));
        let store = Arc::new(InMemoryStore::new());
        let analyzer = analyzer(provider.clone(), store.clone());

        let outcome = analyzer.analyze_at("  aapl ", false, now()).await.unwrap();
        assert_eq!(outcome.source, AnalysisSource::Fresh);
        assert_eq!(outcome.key, "AAPL");
        assert_eq!(outcome.record.total_score, 13);
        assert_eq!(outcome.details.len(), 13);
        assert!(outcome.notices.is_empty());
        assert!(outcome.persisted);
        assert_eq!(provider.queries(), vec!["aapl"]);

        let stored = store.get("AAPL").await.unwrap().unwrap();
        assert_eq!(stored.timestamp, now());
        assert_eq!(stored.record, outcome.record);
    }

    #[tokio::test]
    async fn test_fresh_cache_skips_model() {
        let provider = Arc::new(ScriptedProvider::new(Vec::new()));
        let store = Arc::new(InMemoryStore::with_entries([entry(
            "AAPL",
            55,
            now() - ChronoDuration::days(6),
        )]));
        let analyzer = analyzer(provider.clone(), store);

        let outcome = analyzer.analyze_at("aapl", false, now()).await.unwrap();
        assert_eq!(outcome.source, AnalysisSource::Cache);
        assert_eq!(outcome.record.total_score, 55);
        assert_eq!(outcome.age_days, 6);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_entry_is_refreshed() {
        let provider = Arc::new(ScriptedProvider::completions([completion("AAPL", 13.0)]));
        let store = Arc::new(InMemoryStore::with_entries([entry(
            "AAPL",
            55,
            now() - ChronoDuration::days(7),
        )]));
        let analyzer = analyzer(provider.clone(), store.clone());

        let outcome = analyzer.analyze_at("AAPL", false, now()).await.unwrap();
        assert_eq!(outcome.source, AnalysisSource::Fresh);
        assert_eq!(outcome.record.total_score, 13);
        assert_eq!(provider.call_count(), 1);
        assert_eq!(store.get("AAPL").await.unwrap().unwrap().timestamp, now());
    }

    #[tokio::test]
    async fn test_forced_refresh_bypasses_fresh_entry() {
        let provider = Arc::new(ScriptedProvider::completions([completion("AAPL", 13.0)]));
        let store = Arc::new(InMemoryStore::with_entries([entry("AAPL", 55, now())]));
        let analyzer = analyzer(provider.clone(), store);

        let outcome = analyzer.analyze_at("AAPL", true, now()).await.unwrap();
        assert_eq!(outcome.source, AnalysisSource::Fresh);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_falls_back_to_stale_entry() {
        let provider = Arc::new(ScriptedProvider::new([ScriptedReply::Timeout]));
        let stale_at = now() - ChronoDuration::days(30);
        let store = Arc::new(InMemoryStore::with_entries([entry("KO", 48, stale_at)]));
        let analyzer = analyzer(provider, store.clone());

        let outcome = analyzer.analyze_at("ko", false, now()).await.unwrap();
        assert_eq!(outcome.source, AnalysisSource::StaleFallback);
        assert_eq!(outcome.record.total_score, 48);
        assert_eq!(outcome.age_days, 30);

        let failure = outcome.refresh_failure.unwrap();
        assert!(failure.retryable);
        assert!(failure.raw_completion.is_none());

        // the stale entry is left untouched
        assert_eq!(store.get("KO").await.unwrap().unwrap().timestamp, stale_at);
    }

    #[tokio::test]
    async fn test_parse_failure_falls_back_with_raw_completion() {
        let provider = Arc::new(ScriptedProvider::completions(["I cannot help with that."]));
        let store = Arc::new(InMemoryStore::with_entries([entry(
            "KO",
            48,
            now() - ChronoDuration::days(10),
        )]));
        let analyzer = analyzer(provider, store);

        let outcome = analyzer.analyze_at("KO", false, now()).await.unwrap();
        assert_eq!(outcome.source, AnalysisSource::StaleFallback);
        assert_eq!(
            outcome.refresh_failure.unwrap().raw_completion.as_deref(),
            Some("I cannot help with that.")
        );
    }

    #[tokio::test]
    async fn test_parse_failure_without_entry_keeps_raw_text() {
        let provider = Arc::new(ScriptedProvider::completions(["Here you go: {\"ticker\": "]));
        let analyzer = analyzer(provider, Arc::new(InMemoryStore::new()));

        match analyzer.analyze_at("AAPL", false, now()).await {
            Err(AnalyzeError::Parse {
                source,
                raw_completion,
            }) => {
                assert_eq!(source, ParseError::NoJsonObject);
                assert_eq!(raw_completion, "Here you go: {\"ticker\": ");
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transport_failure_without_entry_is_error() {
        let provider = Arc::new(ScriptedProvider::new([ScriptedReply::Failure(
            "upstream 503".into(),
        )]));
        let store = Arc::new(InMemoryStore::new());
        let analyzer = analyzer(provider, store.clone());

        let err = analyzer.analyze_at("AAPL", false, now()).await.unwrap_err();
        assert!(matches!(err, AnalyzeError::Transport(_)));
        assert!(err.is_retryable());
        assert!(store.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let provider = Arc::new(ScriptedProvider::new(Vec::new()));
        let analyzer = analyzer(provider.clone(), Arc::new(InMemoryStore::new()));

        assert!(matches!(
            analyzer.analyze_at("   ", false, now()).await,
            Err(AnalyzeError::EmptyQuery)
        ));
        assert!(matches!(analyzer.lookup_at("", now()).await, Err(AnalyzeError::EmptyQuery)));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_out_of_range_total_is_corrected() {
        let provider = Arc::new(ScriptedProvider::completions([format!(
            "```json\n{}\n```",
            completion("MSFT", 150.0)
        )]));
        let analyzer = analyzer(provider, Arc::new(InMemoryStore::new()));

        let outcome = analyzer.analyze_at("MSFT", false, now()).await.unwrap();
        assert_eq!(outcome.record.total_score, 13);
        assert!(outcome.notices.contains(&ValidationNotice::TotalCorrected {
            reported: Some(150.0),
            recomputed: 13,
        }));
    }

    #[tokio::test]
    async fn test_always_recompute_policy() {
        let provider = Arc::new(ScriptedProvider::completions([completion("MSFT", 50.0)]));
        let analyzer = analyzer(provider, Arc::new(InMemoryStore::new()))
            .with_total_policy(TotalPolicy::AlwaysRecompute);

        let outcome = analyzer.analyze_at("MSFT", false, now()).await.unwrap();
        assert_eq!(outcome.record.total_score, 13);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_model_call() {
        let provider = Arc::new(ScriptedProvider::completions([completion("AAPL", 13.0)]));
        let analyzer = Arc::new(analyzer(provider.clone(), Arc::new(InMemoryStore::new())));

        let (a, b) = tokio::join!(
            analyzer.analyze_at("AAPL", false, now()),
            analyzer.analyze_at("aapl", false, now())
        );
        let sources = [a.unwrap().source, b.unwrap().source];
        assert!(sources.contains(&AnalysisSource::Fresh));
        assert!(sources.contains(&AnalysisSource::Cache));
        assert_eq!(provider.call_count(), 1);
    }

    struct SlowProvider;

    #[async_trait]
    impl CompletionProvider for SlowProvider {
        async fn generate(&self, _prompt: &AnalysisPrompt) -> LlmResult<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(String::new())
        }

        fn backend_name(&self) -> &'static str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_slow_model_call_times_out() {
        let analyzer = StockAnalyzer::new(Arc::new(SlowProvider), Arc::new(InMemoryStore::new()))
            .with_request_timeout(Duration::from_millis(20));

        let err = analyzer.analyze_at("AAPL", false, now()).await.unwrap_err();
        assert!(matches!(err, AnalyzeError::Transport(LlmError::Timeout(_))));
    }

    struct ReadOnlyStore(InMemoryStore);

    #[async_trait]
    impl AnalysisStore for ReadOnlyStore {
        async fn get(&self, key: &str) -> StoreResult<Option<CacheEntry>> {
            self.0.get(key).await
        }

        async fn put(&self, _key: &str, _record: AnalysisRecord, _now: DateTime<Utc>) -> StoreResult<()> {
            Err(StoreError::EmptyKey)
        }

        async fn entries(&self) -> StoreResult<Vec<CacheEntry>> {
            self.0.entries().await
        }

        fn backend_name(&self) -> &'static str {
            "read_only"
        }
    }

    #[tokio::test]
    async fn test_failed_store_write_still_returns_record() {
        let provider = Arc::new(ScriptedProvider::completions([completion("AAPL", 13.0)]));
        let analyzer = StockAnalyzer::new(provider, Arc::new(ReadOnlyStore(InMemoryStore::new())));

        let outcome = analyzer.analyze_at("AAPL", false, now()).await.unwrap();
        assert_eq!(outcome.source, AnalysisSource::Fresh);
        assert!(!outcome.persisted);
    }

    #[tokio::test]
    async fn test_lookup_reports_freshness() {
        let store = Arc::new(InMemoryStore::with_entries([
            entry("AAPL", 40, now() - ChronoDuration::days(2)),
            entry("KO", 48, now() - ChronoDuration::days(9)),
        ]));
        let provider = Arc::new(ScriptedProvider::new(Vec::new()));
        let analyzer = analyzer(provider.clone(), store);

        let aapl = analyzer.lookup_at(" aapl", now()).await.unwrap().unwrap();
        assert_eq!(aapl.freshness, Freshness::Fresh);
        assert_eq!(aapl.age_days, 2);

        let ko = analyzer.lookup_at("KO", now()).await.unwrap().unwrap();
        assert_eq!(ko.freshness, Freshness::Stale);

        assert!(analyzer.lookup_at("MSFT", now()).await.unwrap().is_none());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_ranking_view() {
        let store = Arc::new(InMemoryStore::with_entries([
            entry("AAPL", 40, now()),
            entry("KO", 48, now()),
        ]));
        let analyzer = analyzer(Arc::new(ScriptedProvider::new(Vec::new())), store.clone());

        let view = analyzer.ranking().await.unwrap();
        assert_eq!(view.rows.len(), 2);
        assert_eq!(view.rows[0].ticker, "KO");
        assert!(view.podium.is_none());

        store.put("MSFT", entry("MSFT", 61, now()).record, now()).await.unwrap();
        let view = analyzer.ranking().await.unwrap();
        let podium = view.podium.unwrap();
        assert_eq!(podium.len(), 3);
        assert_eq!(podium[0].ticker, "MSFT");
        assert_eq!(podium[2].ticker, "AAPL");
    }
}
