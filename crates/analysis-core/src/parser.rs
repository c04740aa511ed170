//! Pulls the JSON analysis object out of a free-text model completion.
//!
//! Strategies are tried in order: the whole completion, the first fenced code
//! block, then the first balanced `{...}` span. Rubric conformance is not
//! checked here.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{ParseError, ParseResult};
use crate::types::RawAnalysis;

static FENCED_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)```").expect("fenced block pattern")
});

/// Which strategy recovered the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    WholeCompletion,
    FencedBlock,
    BraceSpan,
}

/// Parse a completion into a raw analysis.
pub fn parse_completion(completion: &str) -> ParseResult<RawAnalysis> {
    let (object, strategy) = extract_json_object(completion)?;
    tracing::debug!("Recovered analysis object via {:?}", strategy);
    Ok(RawAnalysis::from_object(&object))
}

/// Find the first JSON object in a completion.
pub fn extract_json_object(completion: &str) -> ParseResult<(Map<String, Value>, ParseStrategy)> {
    let text = completion.trim();
    if text.is_empty() {
        return Err(ParseError::EmptyCompletion);
    }

    let candidates = [
        (Some(text), ParseStrategy::WholeCompletion),
        (fenced_block(text), ParseStrategy::FencedBlock),
        (brace_span(text), ParseStrategy::BraceSpan),
    ];

    // Remember a non-object parse so the failure can say what was found
    let mut non_object: Option<&'static str> = None;

    for (candidate, strategy) in candidates {
        let Some(candidate) = candidate else {
            continue;
        };
        match serde_json::from_str::<Value>(candidate.trim()) {
            Ok(Value::Object(map)) => return Ok((map, strategy)),
            Ok(other) => {
                non_object.get_or_insert(json_kind(&other));
            }
            Err(_) => {}
        }
    }

    match non_object {
        Some(found) => Err(ParseError::NotAnObject { found }),
        None => Err(ParseError::NoJsonObject),
    }
}

fn fenced_block(text: &str) -> Option<&str> {
    FENCED_BLOCK
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// First top-level `{...}` span, honouring string literals and escapes.
fn brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
