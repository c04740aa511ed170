//! Ranking of stored analyses by total score.

use chrono::NaiveDate;
use serde::Serialize;

use crate::types::CacheEntry;

/// Number of rows highlighted above the full table.
pub const PODIUM_SIZE: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RankingRow {
    pub rank: usize,
    pub key: String,
    pub company_name: String,
    pub ticker: String,
    pub total_score: u32,
    pub analysis_date: NaiveDate,
}

/// Sort entries by total score, highest first.
///
/// Ties are broken by ticker (case-insensitive, ascending) and then by input
/// order, so the result is deterministic for any given input.
pub fn rank(entries: &[CacheEntry]) -> Vec<RankingRow> {
    let mut rows: Vec<RankingRow> = entries
        .iter()
        .map(|entry| {
            let record = &entry.record;
            RankingRow {
                rank: 0,
                key: entry.key.clone(),
                company_name: non_empty_or(&record.company_name, &entry.key),
                ticker: non_empty_or(&record.ticker, &entry.key),
                total_score: record.total_score,
                analysis_date: entry.timestamp.date_naive(),
            }
        })
        .collect();

    // sort_by is stable, which keeps input order as the final tiebreak
    rows.sort_by(|a, b| {
        b.total_score
            .cmp(&a.total_score)
            .then_with(|| a.ticker.to_lowercase().cmp(&b.ticker.to_lowercase()))
    });

    for (i, row) in rows.iter_mut().enumerate() {
        row.rank = i + 1;
    }

    rows
}

/// The top rows, only once there are enough analyses to fill the podium.
pub fn podium(rows: &[RankingRow]) -> Option<&[RankingRow]> {
    if rows.len() >= PODIUM_SIZE {
        Some(&rows[..PODIUM_SIZE])
    } else {
        None
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}
