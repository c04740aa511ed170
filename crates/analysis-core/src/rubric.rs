//! The 13-criterion value-stock rubric.
//!
//! Each criterion carries its wire id, a display label, the maximum points it
//! can award and the bucket table the model is asked to apply. The prompt text
//! and the validator both read from [`RUBRIC`], so the point ceilings the model
//! is told about are the same ones the validator clamps to.

use serde::Serialize;

/// Total points available across the whole rubric.
pub const MAX_TOTAL_SCORE: u32 = 100;

/// One row of a criterion's bucket table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bucket {
    pub condition: &'static str,
    pub points: u32,
}

const fn bucket(condition: &'static str, points: u32) -> Bucket {
    Bucket { condition, points }
}

/// A fixed scoring criterion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Criterion {
    /// 1-based position in the rubric
    pub ordinal: u8,
    /// Stable wire id used as the key in `scores`
    pub id: &'static str,
    pub label: &'static str,
    pub max_score: u32,
    pub buckets: &'static [Bucket],
    /// Whether the model should report the measured value alongside the score
    pub expects_value: bool,
    /// Qualitative criteria are judged rather than measured
    pub qualitative: bool,
}

impl Criterion {
    /// Clamp an awarded score into `[0, max_score]`. Non-finite input counts as zero.
    pub fn clamp(&self, score: f64) -> f64 {
        if !score.is_finite() {
            return 0.0;
        }
        score.max(0.0).min(self.max_score as f64)
    }

    /// Bucket table rendered as `cond → pts` pairs, one per line.
    pub fn describe_buckets(&self) -> String {
        self.buckets
            .iter()
            .map(|b| format!("   - {}: {} points", b.condition, b.points))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub static RUBRIC: [Criterion; 13] = [
    Criterion {
        ordinal: 1,
        id: "1_trailing_per",
        label: "Trailing P/E",
        max_score: 20,
        buckets: &[
            bucket("below 5", 20),
            bucket("5 or above and below 8", 15),
            bucket("8 or above and below 10", 10),
            bucket("10 or above", 5),
        ],
        expects_value: true,
        qualitative: false,
    },
    Criterion {
        ordinal: 2,
        id: "2_pbr",
        label: "P/B (latest quarter)",
        max_score: 5,
        buckets: &[
            bucket("below 0.3", 5),
            bucket("0.3 or above and below 0.6", 4),
            bucket("0.6 or above and below 1.0", 3),
            bucket("1.0 or above", 0),
        ],
        expects_value: true,
        qualitative: false,
    },
    Criterion {
        ordinal: 3,
        id: "3_profit_sustainability",
        label: "Profit sustainability",
        max_score: 5,
        buckets: &[
            bucket("earnings broadly sustainable", 5),
            bucket("unstable earning power", 0),
        ],
        expects_value: false,
        qualitative: true,
    },
    Criterion {
        ordinal: 4,
        id: "4_duplicate_listing",
        label: "Duplicate listing",
        max_score: 5,
        buckets: &[
            bucket("duplicate listing (listed subsidiaries or sub-subsidiaries)", 0),
            bucket("sole listing", 5),
        ],
        expects_value: false,
        qualitative: false,
    },
    Criterion {
        ordinal: 5,
        id: "5_dividend_yield",
        label: "Dividend yield",
        max_score: 10,
        buckets: &[
            bucket("above 7%", 10),
            bucket("above 5% up to 7%", 7),
            bucket("above 3% up to 5%", 5),
            bucket("3% or below", 2),
            bucket("no dividend", 0),
        ],
        expects_value: true,
        qualitative: false,
    },
    Criterion {
        ordinal: 6,
        id: "6_quarterly_dividend",
        label: "Quarterly dividend",
        max_score: 5,
        buckets: &[bucket("yes", 5), bucket("no", 0)],
        expects_value: false,
        qualitative: false,
    },
    Criterion {
        ordinal: 7,
        id: "7_dividend_increase_years",
        label: "Consecutive dividend-increase years",
        max_score: 5,
        buckets: &[
            bucket("10 years or more", 5),
            bucket("5 years or more", 4),
            bucket("3 years or more", 3),
            bucket("none", 0),
        ],
        expects_value: true,
        qualitative: false,
    },
    Criterion {
        ordinal: 8,
        id: "8_buyback_cancellation",
        label: "Regular buyback and cancellation (at least once a year)",
        max_score: 7,
        buckets: &[bucket("yes", 7), bucket("no", 0)],
        expects_value: false,
        qualitative: false,
    },
    Criterion {
        ordinal: 9,
        id: "9_cancellation_ratio",
        label: "Annual cancellation ratio (of shares outstanding)",
        max_score: 8,
        buckets: &[
            bucket("above 2%", 8),
            bucket("above 1.5% up to 2%", 5),
            bucket("above 0.5% up to 1.5%", 3),
            bucket("0.5% or below", 0),
        ],
        expects_value: true,
        qualitative: false,
    },
    Criterion {
        ordinal: 10,
        id: "10_treasury_stock",
        label: "Treasury stock ratio",
        max_score: 5,
        buckets: &[
            bucket("none", 5),
            bucket("below 2%", 4),
            bucket("2% or above and below 5%", 2),
            bucket("5% or above", 0),
        ],
        expects_value: true,
        qualitative: false,
    },
    Criterion {
        ordinal: 11,
        id: "11_growth_potential",
        label: "Growth potential",
        max_score: 10,
        buckets: &[
            bucket("very high", 10),
            bucket("high", 7),
            bucket("medium", 5),
            bucket("low", 3),
        ],
        expects_value: false,
        qualitative: true,
    },
    Criterion {
        ordinal: 12,
        id: "12_management",
        label: "Management quality",
        max_score: 10,
        buckets: &[
            bucket("excellent management", 10),
            bucket("professional management", 5),
            bucket("owner management with poor results", 0),
        ],
        expects_value: false,
        qualitative: true,
    },
    Criterion {
        ordinal: 13,
        id: "13_global_brand",
        label: "Global brand",
        max_score: 5,
        buckets: &[bucket("yes", 5), bucket("no", 0)],
        expects_value: false,
        qualitative: false,
    },
];

/// Look up a criterion by its exact wire id.
pub fn criterion(id: &str) -> Option<&'static Criterion> {
    RUBRIC.iter().find(|c| c.id == id)
}

/// Resolve a loosely formatted key from a model response to a criterion.
///
/// Exact ids win. Otherwise the leading ordinal decides, so `"5"`,
/// `"5_dividend"` and `"5. Dividend yield"` all land on `5_dividend_yield`.
pub fn resolve_criterion(key: &str) -> Option<&'static Criterion> {
    let key = key.trim();
    if let Some(c) = criterion(key) {
        return Some(c);
    }

    let digits: String = key.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let ordinal: u8 = digits.parse().ok()?;
    RUBRIC.iter().find(|c| c.ordinal == ordinal)
}
