use analysis_core::TotalPolicy;
use analysis_store::DEFAULT_TTL_DAYS;
use anyhow::{Context, Result};
use chrono::{FixedOffset, Offset, Utc};
use llm_client::LlmConfig;
use std::net::SocketAddr;
use std::path::PathBuf;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_DATA_DIR: &str = "analysis_data";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Directory holding `analyses.json`
    pub data_dir: PathBuf,
    pub cache_ttl_days: i64,
    pub total_policy: TotalPolicy,
    /// Offset of naive timestamps in documents from older versions
    pub legacy_timestamp_offset: FixedOffset,
    pub llm: LlmConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let llm = LlmConfig::from_lookup(&lookup).context("Failed to load model configuration")?;

        let bind_addr = lookup("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .trim()
            .parse()
            .context("BIND_ADDR must be a socket address such as 0.0.0.0:3000")?;

        let data_dir = lookup("ANALYSIS_DATA_DIR")
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string())
            .into();

        let cache_ttl_days = match lookup("CACHE_TTL_DAYS") {
            Some(days) => days
                .trim()
                .parse()
                .with_context(|| format!("CACHE_TTL_DAYS has invalid value '{}'", days))?,
            None => DEFAULT_TTL_DAYS,
        };

        let total_policy = match lookup("SCORE_TOTAL_POLICY") {
            Some(policy) => policy.parse().map_err(anyhow::Error::msg)?,
            None => TotalPolicy::default(),
        };

        let legacy_timestamp_offset = match lookup("LEGACY_TIMESTAMP_OFFSET") {
            Some(offset) => offset.trim().parse().with_context(|| {
                format!("LEGACY_TIMESTAMP_OFFSET must look like +09:00, got '{}'", offset)
            })?,
            None => Utc.fix(),
        };

        Ok(Self {
            bind_addr,
            data_dir,
            cache_ttl_days,
            total_policy,
            legacy_timestamp_offset,
            llm,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup_from(&[("PERPLEXITY_API_KEY", "pplx-test")])).unwrap();
        assert_eq!(config.bind_addr.port(), 3000);
        assert_eq!(config.data_dir, PathBuf::from("analysis_data"));
        assert_eq!(config.cache_ttl_days, 7);
        assert_eq!(config.total_policy, TotalPolicy::TrustInRange);
        assert_eq!(config.legacy_timestamp_offset.local_minus_utc(), 0);
        assert_eq!(config.llm.model, "sonar-pro");
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("PERPLEXITY_API_KEY", "pplx-test"),
            ("BIND_ADDR", "127.0.0.1:8080"),
            ("ANALYSIS_DATA_DIR", "/var/lib/scores"),
            ("CACHE_TTL_DAYS", "3"),
            ("SCORE_TOTAL_POLICY", "always_recompute"),
            ("LEGACY_TIMESTAMP_OFFSET", "+09:00"),
        ]))
        .unwrap();
        assert_eq!(config.legacy_timestamp_offset.local_minus_utc(), 9 * 3600);
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/scores"));
        assert_eq!(config.cache_ttl_days, 3);
        assert_eq!(config.total_policy, TotalPolicy::AlwaysRecompute);
    }

    #[test]
    fn test_missing_credential_is_fatal() {
        let err = ServerConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(format!("{:#}", err).contains("PERPLEXITY_API_KEY"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        for (name, value) in [
            ("BIND_ADDR", "not-an-address"),
            ("CACHE_TTL_DAYS", "a week"),
            ("SCORE_TOTAL_POLICY", "average"),
            ("LEGACY_TIMESTAMP_OFFSET", "KST"),
        ] {
            let result = ServerConfig::from_lookup(lookup_from(&[
                ("PERPLEXITY_API_KEY", "pplx-test"),
                (name, value),
            ]));
            assert!(result.is_err(), "{} = {} should be rejected", name, value);
        }
    }
}
