//! Score validation and normalization.
//!
//! Takes whatever the model reported and produces an [`AnalysisRecord`] whose
//! sub-scores all sit inside their criterion's range. Out-of-range values are
//! clamped, never rejected. The total is replaced by the recomputed sum when
//! the reported one is missing or outside `[0, 100]`; an in-range total is
//! kept under [`TotalPolicy::TrustInRange`] even if it disagrees with the sum.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::rubric::{resolve_criterion, Criterion, MAX_TOTAL_SCORE, RUBRIC};
use crate::types::{AnalysisRecord, RawAnalysis, RawSubScore, SubScore};

/// Reason attached to criteria the model left out.
pub const NOT_REPORTED: &str = "not reported";

/// How the reported total is reconciled with the per-criterion sum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TotalPolicy {
    /// Keep a reported total in `[0, 100]` as-is; replace it otherwise.
    #[default]
    TrustInRange,
    /// Always use the recomputed sum.
    AlwaysRecompute,
}

impl FromStr for TotalPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trust_in_range" | "trust" => Ok(TotalPolicy::TrustInRange),
            "always_recompute" | "recompute" => Ok(TotalPolicy::AlwaysRecompute),
            other => Err(format!("unknown total policy '{}'", other)),
        }
    }
}

/// Non-fatal corrections made while validating a record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationNotice {
    TotalCorrected { reported: Option<f64>, recomputed: u32 },
    ScoreClamped { criterion: String, reported: f64, clamped: f64 },
    CriterionMissing { criterion: String },
}

impl fmt::Display for ValidationNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationNotice::TotalCorrected { reported: Some(r), recomputed } => write!(
                f,
                "Reported total {} replaced by recomputed total {}",
                r, recomputed
            ),
            ValidationNotice::TotalCorrected { reported: None, recomputed } => {
                write!(f, "Total missing, recomputed as {}", recomputed)
            }
            ValidationNotice::ScoreClamped { criterion, reported, clamped } => write!(
                f,
                "Score for {} clamped from {} to {}",
                criterion, reported, clamped
            ),
            ValidationNotice::CriterionMissing { criterion } => {
                write!(f, "Criterion {} missing, scored as 0", criterion)
            }
        }
    }
}

/// Output of the validator.
#[derive(Debug, Clone, PartialEq)]
pub struct Validated {
    pub record: AnalysisRecord,
    pub notices: Vec<ValidationNotice>,
}

impl Validated {
    pub fn total_corrected(&self) -> bool {
        self.notices
            .iter()
            .any(|n| matches!(n, ValidationNotice::TotalCorrected { .. }))
    }
}

#[derive(Debug, Clone)]
pub struct ScoreValidator {
    policy: TotalPolicy,
    log_notices: bool,
}

impl Default for ScoreValidator {
    fn default() -> Self {
        Self::with_policy(TotalPolicy::default())
    }
}

impl ScoreValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: TotalPolicy) -> Self {
        Self {
            policy,
            log_notices: true,
        }
    }

    /// Return notices without logging them, for records that were already
    /// reported once (e.g. re-read from storage).
    pub fn quiet(mut self) -> Self {
        self.log_notices = false;
        self
    }

    pub fn policy(&self) -> TotalPolicy {
        self.policy
    }

    /// Validate a raw analysis. Pure and idempotent.
    pub fn validate(&self, raw: RawAnalysis) -> Validated {
        let mut notices = Vec::new();
        let slots = assign_to_criteria(&raw.scores);

        let mut scores = BTreeMap::new();
        for (criterion, slot) in RUBRIC.iter().zip(slots) {
            let sub = match slot {
                Some(reported) => clamp_sub_score(criterion, reported, &mut notices),
                None => {
                    notices.push(ValidationNotice::CriterionMissing {
                        criterion: criterion.id.to_string(),
                    });
                    SubScore {
                        value: None,
                        score: 0.0,
                        reason: NOT_REPORTED.to_string(),
                    }
                }
            };
            scores.insert(criterion.id.to_string(), sub);
        }

        let sum: f64 = scores.values().map(|s| s.score).sum();
        let recomputed = (sum.round() as u32).min(MAX_TOTAL_SCORE);
        let total_score = self.reconcile_total(raw.total_score, recomputed, &mut notices);

        if self.log_notices {
            for notice in &notices {
                tracing::warn!("{}", notice);
            }
        }

        Validated {
            record: AnalysisRecord {
                company_name: raw.company_name.unwrap_or_default(),
                ticker: raw.ticker.unwrap_or_default(),
                scores,
                total_score,
                summary: raw.summary.unwrap_or_default(),
            },
            notices,
        }
    }

    fn reconcile_total(
        &self,
        reported: Option<f64>,
        recomputed: u32,
        notices: &mut Vec<ValidationNotice>,
    ) -> u32 {
        let in_range = reported.filter(|t| t.is_finite() && *t >= 0.0 && *t <= MAX_TOTAL_SCORE as f64);

        let kept = match (self.policy, in_range) {
            (TotalPolicy::TrustInRange, Some(t)) => Some(t.round() as u32),
            (TotalPolicy::AlwaysRecompute, Some(t)) if t.round() as u32 == recomputed => {
                Some(recomputed)
            }
            _ => None,
        };

        match kept {
            Some(total) => total,
            None => {
                notices.push(ValidationNotice::TotalCorrected { reported, recomputed });
                recomputed
            }
        }
    }
}

/// Validate with the default [`TotalPolicy`].
pub fn validate(raw: RawAnalysis) -> Validated {
    ScoreValidator::new().validate(raw)
}

/// Map reported score keys onto the rubric, one slot per criterion.
///
/// Exact ids are placed first so that a loose key such as `"5"` never
/// overrides a correctly keyed `5_dividend_yield`. Later duplicates lose.
fn assign_to_criteria(reported: &[(String, RawSubScore)]) -> Vec<Option<&RawSubScore>> {
    let mut slots: Vec<Option<&RawSubScore>> = vec![None; RUBRIC.len()];

    for (key, sub) in reported {
        if let Some(idx) = RUBRIC.iter().position(|c| c.id == key.trim()) {
            if slots[idx].is_none() {
                slots[idx] = Some(sub);
            }
        }
    }

    for (key, sub) in reported {
        if let Some(c) = resolve_criterion(key) {
            let idx = (c.ordinal - 1) as usize;
            if slots[idx].is_none() {
                slots[idx] = Some(sub);
            }
        } else {
            tracing::debug!("Ignoring score for unknown criterion key '{}'", key);
        }
    }

    slots
}

fn clamp_sub_score(
    criterion: &Criterion,
    reported: &RawSubScore,
    notices: &mut Vec<ValidationNotice>,
) -> SubScore {
    let raw_score = reported.score.unwrap_or(0.0);
    let score = criterion.clamp(raw_score);
    if score != raw_score {
        notices.push(ValidationNotice::ScoreClamped {
            criterion: criterion.id.to_string(),
            reported: raw_score,
            clamped: score,
        });
    }

    SubScore {
        value: reported.value.clone(),
        score,
        reason: reported.reason.clone().unwrap_or_default(),
    }
}
