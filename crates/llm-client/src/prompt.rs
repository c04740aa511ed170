//! Builds the completion request for a single stock query.
//!
//! The rubric text and JSON template are rendered from
//! [`analysis_core::RUBRIC`] so the point ceilings the model sees are the ones
//! the validator enforces.

use analysis_core::{Criterion, MAX_TOTAL_SCORE, RUBRIC};
use serde::Serialize;

const SYSTEM_PROMPT: &str = "You are a financial analyst. You base every figure on the most recent \
published financial data and filings, and you answer with a single JSON object only.";

/// Chat message in the provider's wire format.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system", content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user", content: content.into() }
    }
}

/// Generation parameters sent with every request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
    /// Provider-specific source allowlist; empty means unrestricted
    pub search_domain_filter: Vec<String>,
    /// Provider-specific recency window such as `month`
    pub search_recency_filter: Option<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 4000,
            search_domain_filter: Vec::new(),
            search_recency_filter: None,
        }
    }
}

/// Market the query most likely refers to. Only used to steer source selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketLocale {
    Korea,
    Global,
}

impl MarketLocale {
    fn source_hint(&self) -> &'static str {
        match self {
            MarketLocale::Korea => {
                "This looks like a Korean-listed company. Prefer DART electronic disclosures, \
                 KRX (KIND) filings and Naver Finance for figures, and report values in KRW terms."
            }
            MarketLocale::Global => {
                "Prefer the company's exchange filings (e.g. SEC 10-K/10-Q), investor relations \
                 releases and major financial data providers for figures."
            }
        }
    }
}

/// Hangul text or a 6-digit KRX code (optionally `.KS`/`.KQ`) means Korea.
pub fn detect_locale(query: &str) -> MarketLocale {
    let query = query.trim();

    let has_hangul = query.chars().any(|c| {
        matches!(c,
            '\u{AC00}'..='\u{D7A3}' | '\u{1100}'..='\u{11FF}' | '\u{3130}'..='\u{318F}')
    });
    if has_hangul {
        return MarketLocale::Korea;
    }

    let upper = query.to_ascii_uppercase();
    let code = upper
        .strip_suffix(".KS")
        .or_else(|| upper.strip_suffix(".KQ"))
        .unwrap_or(&upper);
    if code.len() == 6 && code.chars().all(|c| c.is_ascii_digit()) {
        return MarketLocale::Korea;
    }

    MarketLocale::Global
}

/// A fully built request, ready for any [`crate::CompletionProvider`].
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisPrompt {
    pub query: String,
    pub locale: MarketLocale,
    pub messages: Vec<ChatMessage>,
    pub params: GenerationParams,
}

impl AnalysisPrompt {
    /// The user-facing prompt text.
    pub fn user_text(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequestBuilder {
    params: GenerationParams,
}

impl RequestBuilder {
    pub fn new(params: GenerationParams) -> Self {
        Self { params }
    }

    pub fn build(&self, query: &str) -> AnalysisPrompt {
        let query = query.trim();
        let locale = detect_locale(query);

        let user = format!(
            "Analyse the stock '{query}' against the scoring criteria below and score each one.\n\n\
             Scoring criteria ({max} points in total):\n\n{rubric}\n\n\
             {hint}\n\n\
             Answer with exactly one JSON object in the following format and nothing else. \
             Do not add explanations, citations or text outside the object. \
             Every score must be one of the point values listed for its criterion.\n\n\
             {template}",
            query = query,
            max = MAX_TOTAL_SCORE,
            rubric = render_rubric(),
            hint = locale.source_hint(),
            template = render_response_template(),
        );

        AnalysisPrompt {
            query: query.to_string(),
            locale,
            messages: vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user)],
            params: self.params.clone(),
        }
    }
}

fn render_criterion(c: &Criterion) -> String {
    let kind = if c.qualitative { " (qualitative judgement)" } else { "" };
    format!(
        "{}. {}{} - up to {} points\n{}",
        c.ordinal,
        c.label,
        kind,
        c.max_score,
        c.describe_buckets()
    )
}

/// The full bucket table, one criterion per block.
pub fn render_rubric() -> String {
    RUBRIC
        .iter()
        .map(render_criterion)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// JSON skeleton the model must fill in.
pub fn render_response_template() -> String {
    let lines: Vec<String> = RUBRIC
        .iter()
        .map(|c| {
            if c.expects_value {
                format!(
                    "    \"{}\": {{\"value\": \"measured value\", \"score\": <0-{}>, \"reason\": \"short explanation\"}}",
                    c.id, c.max_score
                )
            } else {
                format!(
                    "    \"{}\": {{\"score\": <0-{}>, \"reason\": \"basis for the judgement\"}}",
                    c.id, c.max_score
                )
            }
        })
        .collect();

    format!(
        "{{\n  \"company_name\": \"company name\",\n  \"ticker\": \"ticker\",\n  \"scores\": {{\n{}\n  }},\n  \"total_score\": <sum of scores>,\n  \"analysis_summary\": \"overall assessment in 3-4 sentences\"\n}}",
        lines.join(",\n")
    )
}
