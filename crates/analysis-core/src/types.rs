use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::rubric::{Criterion, RUBRIC};

/// Points awarded for one rubric criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SubScore {
    /// Measured value the score was derived from, as reported (e.g. "7.2", "3.1%")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub score: f64,
    #[serde(default)]
    pub reason: String,
}

/// A validated analysis of one company against the rubric.
///
/// `scores` always holds all 13 criterion ids once the record has been
/// through the validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AnalysisRecord {
    #[serde(default)]
    pub company_name: String,
    #[serde(default)]
    pub ticker: String,
    #[serde(default)]
    pub scores: BTreeMap<String, SubScore>,
    #[serde(default)]
    pub total_score: u32,
    #[serde(default, rename = "analysis_summary", alias = "summary")]
    pub summary: String,
}

impl AnalysisRecord {
    pub fn sub_score(&self, criterion: &Criterion) -> Option<&SubScore> {
        self.scores.get(criterion.id)
    }

    /// Sum of the per-criterion scores over the fixed rubric ids.
    pub fn sum_of_scores(&self) -> f64 {
        RUBRIC
            .iter()
            .filter_map(|c| self.sub_score(c))
            .map(|s| s.score)
            .sum()
    }

    /// Per-criterion rows in rubric order, for detail views.
    pub fn details(&self) -> Vec<CriterionDetail> {
        RUBRIC
            .iter()
            .map(|c| {
                let sub = self.sub_score(c);
                CriterionDetail {
                    ordinal: c.ordinal,
                    criterion_id: c.id.to_string(),
                    label: c.label.to_string(),
                    score: sub.map(|s| s.score).unwrap_or(0.0),
                    max_score: c.max_score,
                    value: sub.and_then(|s| s.value.clone()),
                    reason: sub.map(|s| s.reason.clone()).unwrap_or_default(),
                }
            })
            .collect()
    }
}

/// One line of the result detail view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CriterionDetail {
    pub ordinal: u8,
    pub criterion_id: String,
    pub label: String,
    pub score: f64,
    pub max_score: u32,
    pub value: Option<String>,
    pub reason: String,
}

/// A stored analysis keyed by its normalized query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub timestamp: DateTime<Utc>,
    pub record: AnalysisRecord,
}

/// Sub-score exactly as the model reported it, before any clamping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSubScore {
    pub value: Option<String>,
    pub score: Option<f64>,
    pub reason: Option<String>,
}

/// Analysis exactly as the model reported it.
///
/// Built leniently from arbitrary JSON: every field is optional, numbers may
/// arrive as numeric strings, and score keys are kept verbatim so the
/// validator can decide which criterion each one belongs to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawAnalysis {
    pub company_name: Option<String>,
    pub ticker: Option<String>,
    pub scores: Vec<(String, RawSubScore)>,
    pub total_score: Option<f64>,
    pub summary: Option<String>,
}

impl RawAnalysis {
    pub fn from_object(obj: &Map<String, Value>) -> Self {
        let scores = match obj.get("scores") {
            Some(Value::Object(map)) => map
                .iter()
                .filter_map(|(k, v)| v.as_object().map(|o| (k.clone(), RawSubScore::from_object(o))))
                .collect(),
            // Some completions list the scores as an array of tagged objects
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| {
                    let o = item.as_object()?;
                    let id = text_field(o, "id")
                        .or_else(|| text_field(o, "criterion_id"))
                        .or_else(|| text_field(o, "criterion"))?;
                    Some((id, RawSubScore::from_object(o)))
                })
                .collect(),
            _ => Vec::new(),
        };

        Self {
            company_name: text_field(obj, "company_name"),
            ticker: text_field(obj, "ticker"),
            scores,
            total_score: obj.get("total_score").and_then(lenient_number),
            summary: text_field(obj, "analysis_summary").or_else(|| text_field(obj, "summary")),
        }
    }
}

impl RawSubScore {
    fn from_object(obj: &Map<String, Value>) -> Self {
        Self {
            value: text_field(obj, "value"),
            score: obj.get("score").and_then(lenient_number),
            reason: text_field(obj, "reason"),
        }
    }
}

impl From<&AnalysisRecord> for RawAnalysis {
    fn from(record: &AnalysisRecord) -> Self {
        Self {
            company_name: Some(record.company_name.clone()),
            ticker: Some(record.ticker.clone()),
            scores: record
                .scores
                .iter()
                .map(|(id, s)| {
                    (
                        id.clone(),
                        RawSubScore {
                            value: s.value.clone(),
                            score: Some(s.score),
                            reason: Some(s.reason.clone()),
                        },
                    )
                })
                .collect(),
            total_score: Some(record.total_score as f64),
            summary: Some(record.summary.clone()),
        }
    }
}

/// Accepts JSON numbers and numeric strings such as `"15"` or `" 7.5 "`.
fn lenient_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Strings are trimmed, numbers and booleans stringified, empty values dropped.
fn text_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    let text = match obj.get(key)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
