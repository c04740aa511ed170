//! Domain core for rubric-based stock scoring: the rubric table, analysis
//! records, completion parsing, score validation and ranking.

pub mod error;
pub mod parser;
pub mod ranking;
pub mod rubric;
pub mod types;
pub mod validator;

pub use error::*;
pub use parser::{extract_json_object, parse_completion, ParseStrategy};
pub use ranking::{podium, rank, RankingRow, PODIUM_SIZE};
pub use rubric::{criterion, resolve_criterion, Bucket, Criterion, MAX_TOTAL_SCORE, RUBRIC};
pub use types::*;
pub use validator::{
    validate, ScoreValidator, TotalPolicy, Validated, ValidationNotice, NOT_REPORTED,
};
