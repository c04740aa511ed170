use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{LlmError, LlmResult};
use crate::prompt::{AnalysisPrompt, ChatMessage};
use crate::provider::CompletionProvider;
use crate::LlmConfig;

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "is_empty_slice")]
    search_domain_filter: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    search_recency_filter: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions client for the Perplexity API.
#[derive(Clone)]
pub struct PerplexityClient {
    client: reqwest::Client,
    config: LlmConfig,
}

impl PerplexityClient {
    pub fn new(config: LlmConfig) -> LlmResult<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url)
    }

    /// Send one chat completion and return the completion text.
    pub async fn complete(&self, prompt: &AnalysisPrompt) -> LlmResult<String> {
        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages: &prompt.messages,
            temperature: prompt.params.temperature,
            max_tokens: prompt.params.max_tokens,
            search_domain_filter: &prompt.params.search_domain_filter,
            search_recency_filter: prompt.params.search_recency_filter.as_deref(),
        };

        tracing::info!(
            "Requesting analysis for '{}' from {} ({:?})",
            prompt.query,
            self.config.model,
            prompt.locale
        );

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(self.config.api_key.expose())
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: truncate(&body, 500),
            });
        }

        let text = response.text().await.map_err(|e| self.map_transport(e))?;
        extract_completion(&text)
    }

    fn map_transport(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout(self.config.timeout.as_secs())
        } else {
            LlmError::RequestFailed(e)
        }
    }
}

#[async_trait]
impl CompletionProvider for PerplexityClient {
    async fn generate(&self, prompt: &AnalysisPrompt) -> LlmResult<String> {
        self.complete(prompt).await
    }

    fn backend_name(&self) -> &'static str {
        "perplexity"
    }
}

fn is_empty_slice(items: &&[String]) -> bool {
    items.is_empty()
}

/// Pull the first choice's message content out of a response body.
fn extract_completion(body: &str) -> LlmResult<String> {
    let parsed: ChatCompletionResponse = serde_json::from_str(body)?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| LlmError::InvalidResponse("response contained no completion text".into()))
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max_chars).collect();
        out.push_str("...");
        out
    }
}
