//! Single JSON document holding every analysis.
//!
//! Layout: `{ "<KEY>": { "timestamp": "<RFC 3339>", "record": { ... } } }`.
//! The whole document is read on load and rewritten on save (temp file, then
//! rename). Documents written by older versions, with a `data` field and naive
//! ISO-8601 timestamps, are still readable. Those timestamps carry no offset and
//! were written in server-local time; they are read at the configured legacy
//! offset (UTC unless [`JsonFileStore::with_legacy_offset`] says otherwise), so
//! a wrong offset shifts their freshness by that many hours.
//!
//! Entries that cannot be decoded are kept verbatim and written back on every
//! save, never dropped.

use analysis_core::{AnalysisRecord, CacheEntry, RawAnalysis, ScoreValidator};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, SecondsFormat, TimeZone, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::error::{StoreError, StoreResult};
use crate::{normalize_key, AnalysisStore};

pub const DOCUMENT_FILE_NAME: &str = "analyses.json";

#[derive(Serialize)]
struct StoredEntry<'a> {
    timestamp: String,
    record: &'a AnalysisRecord,
}

/// Decoded document plus the raw entries that could not be decoded.
#[derive(Default)]
struct Document {
    entries: BTreeMap<String, CacheEntry>,
    unreadable: Map<String, Value>,
}

impl Document {
    fn insert(&mut self, entry: CacheEntry) {
        // A fresh write supersedes an unreadable entry under the same key
        self.unreadable.retain(|raw_key, _| normalize_key(raw_key) != entry.key);
        self.entries.insert(entry.key.clone(), entry);
    }
}

pub struct JsonFileStore {
    path: PathBuf,
    legacy_offset: FixedOffset,
    /// Serialises whole-document read-modify-write within this process
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            legacy_offset: Utc.fix(),
            write_lock: Mutex::new(()),
        }
    }

    /// Store at `<dir>/analyses.json`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(DOCUMENT_FILE_NAME))
    }

    /// Offset at which naive legacy timestamps were written.
    pub fn with_legacy_offset(mut self, offset: FixedOffset) -> Self {
        self.legacy_offset = offset;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> StoreResult<Document> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Document::default()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if contents.trim().is_empty() {
            return Ok(Document::default());
        }

        let raw: Map<String, Value> =
            serde_json::from_str(&contents).map_err(|source| StoreError::Corrupt {
                path: self.path.clone(),
                source,
            })?;

        let mut document = Document::default();
        for (key, value) in raw {
            match decode_entry(&key, &value, self.legacy_offset) {
                Some(entry) => {
                    document.entries.insert(entry.key.clone(), entry);
                }
                None => {
                    tracing::warn!(
                        "Keeping unreadable analysis entry '{}' in {} as-is",
                        key,
                        self.path.display()
                    );
                    document.unreadable.insert(key, value);
                }
            }
        }

        Ok(document)
    }

    async fn save(&self, document: &Document) -> StoreResult<()> {
        let mut out = document.unreadable.clone();
        for (key, entry) in &document.entries {
            let stored = StoredEntry {
                timestamp: entry.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
                record: &entry.record,
            };
            out.insert(key.clone(), serde_json::to_value(stored)?);
        }
        let json = serde_json::to_string_pretty(&out)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json).await.map_err(|source| StoreError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        tokio::fs::rename(&tmp_path, &self.path).await.map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;

        Ok(())
    }
}

#[async_trait]
impl AnalysisStore for JsonFileStore {
    async fn get(&self, key: &str) -> StoreResult<Option<CacheEntry>> {
        let key = normalize_key(key);
        if key.is_empty() {
            return Ok(None);
        }
        let mut document = self.load().await?;
        Ok(document.entries.remove(&key))
    }

    async fn put(&self, key: &str, record: AnalysisRecord, now: DateTime<Utc>) -> StoreResult<()> {
        let key = normalize_key(key);
        if key.is_empty() {
            return Err(StoreError::EmptyKey);
        }

        let _guard = self.write_lock.lock().await;
        let mut document = self.load().await?;
        document.insert(CacheEntry {
            key: key.clone(),
            timestamp: now,
            record,
        });
        self.save(&document).await?;

        tracing::debug!(
            "Stored analysis for {} ({} entries total)",
            key,
            document.entries.len() + document.unreadable.len()
        );
        Ok(())
    }

    async fn entries(&self) -> StoreResult<Vec<CacheEntry>> {
        Ok(self.load().await?.entries.into_values().collect())
    }

    fn backend_name(&self) -> &'static str {
        "json_file"
    }
}

fn decode_entry(key: &str, value: &Value, legacy_offset: FixedOffset) -> Option<CacheEntry> {
    let obj = value.as_object()?;
    let timestamp = parse_timestamp(obj.get("timestamp")?.as_str()?, legacy_offset)?;
    let record = obj.get("record").or_else(|| obj.get("data"))?.as_object()?;

    // No-op for records this store wrote; brings older documents up to the
    // record invariants. Quiet, since this runs on every read.
    let validated = ScoreValidator::new().quiet().validate(RawAnalysis::from_object(record));

    Some(CacheEntry {
        key: normalize_key(key),
        timestamp,
        record: validated.record,
    })
}

/// RFC 3339, or a naive ISO-8601 timestamp taken at `legacy_offset`.
fn parse_timestamp(raw: &str, legacy_offset: FixedOffset) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()?;
    legacy_offset
        .from_local_datetime(&naive)
        .single()
        .map(|ts| ts.with_timezone(&Utc))
}
