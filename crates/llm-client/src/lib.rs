pub mod client;
pub mod error;
pub mod prompt;
pub mod provider;

pub use client::PerplexityClient;
pub use error::{LlmError, LlmResult};
pub use prompt::{
    detect_locale, AnalysisPrompt, ChatMessage, GenerationParams, MarketLocale, RequestBuilder,
};
pub use provider::{CompletionProvider, ScriptedProvider, ScriptedReply};

use std::fmt;
use std::time::Duration;

pub const API_KEY_VAR: &str = "PERPLEXITY_API_KEY";
pub const API_KEY_FILE_VAR: &str = "PERPLEXITY_API_KEY_FILE";

const DEFAULT_BASE_URL: &str = "https://api.perplexity.ai";
const DEFAULT_MODEL: &str = "sonar-pro";
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const MIN_TIMEOUT_SECS: u64 = 10;
const MAX_TIMEOUT_SECS: u64 = 600;

/// Credential for the hosted model. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> LlmResult<Self> {
        let key = key.into().trim().to_string();
        if key.is_empty() {
            return Err(LlmError::MissingCredential(API_KEY_VAR));
        }
        Ok(Self(key))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(****)")
    }
}

/// Configuration for the hosted model
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: ApiKey,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    pub params: GenerationParams,
}

impl LlmConfig {
    pub fn new(api_key: ApiKey) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            params: GenerationParams::default(),
        }
    }

    pub fn from_env() -> LlmResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> LlmResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = resolve_api_key(&lookup)?;
        let mut config = Self::new(api_key);

        if let Some(url) = lookup("PERPLEXITY_BASE_URL") {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(model) = lookup("PERPLEXITY_MODEL").filter(|m| !m.trim().is_empty()) {
            config.model = model.trim().to_string();
        }
        if let Some(secs) = lookup("LLM_TIMEOUT_SECS") {
            let secs: u64 = parse_var("LLM_TIMEOUT_SECS", &secs)?;
            config.timeout = Duration::from_secs(secs.clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS));
        }
        if let Some(t) = lookup("LLM_TEMPERATURE") {
            config.params.temperature = parse_var("LLM_TEMPERATURE", &t)?;
        }
        if let Some(n) = lookup("LLM_MAX_TOKENS") {
            config.params.max_tokens = parse_var("LLM_MAX_TOKENS", &n)?;
        }
        if let Some(domains) = lookup("LLM_SEARCH_DOMAINS") {
            config.params.search_domain_filter = domains
                .split(',')
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty())
                .collect();
        }
        config.params.search_recency_filter = lookup("LLM_SEARCH_RECENCY")
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());

        Ok(config)
    }
}

/// Secret file first, then the plain environment variable.
fn resolve_api_key<F>(lookup: &F) -> LlmResult<ApiKey>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = lookup(API_KEY_FILE_VAR).filter(|p| !p.trim().is_empty()) {
        match std::fs::read_to_string(path.trim()) {
            Ok(contents) if !contents.trim().is_empty() => return ApiKey::new(contents),
            Ok(_) => tracing::warn!("{} points at an empty file", API_KEY_FILE_VAR),
            Err(e) => tracing::warn!("Failed to read {} ({}): {}", API_KEY_FILE_VAR, path, e),
        }
    }

    lookup(API_KEY_VAR)
        .filter(|k| !k.trim().is_empty())
        .ok_or(LlmError::MissingCredential(API_KEY_VAR))
        .and_then(|key| ApiKey::new(key))
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> LlmResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| LlmError::InvalidConfig(format!("{} has invalid value '{}'", name, raw)))
}
