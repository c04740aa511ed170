//! Analysis API Routes
//!
//! Scoring a stock against the rubric, reading stored analyses and the ranking.

use analysis_orchestrator::{AnalysisOutcome, RankingView, StoredAnalysis};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;

use crate::request_id::RequestId;
use crate::{ApiResponse, AppError, AppState};

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct AnalyzeRequest {
    /// Company name or ticker, e.g. "AAPL" or "삼성전자"
    pub query: String,
    /// Ignore a fresh cached analysis
    #[serde(default)]
    pub refresh: bool,
}

pub fn analysis_routes() -> Router<AppState> {
    Router::new()
        .route("/api/analyze", post(analyze))
        .route("/api/analyses/:query", get(get_analysis))
        .route("/api/rankings", get(get_rankings))
}

#[utoipa::path(
    post,
    path = "/api/analyze",
    request_body = AnalyzeRequest,
    responses(
        (status = 200, description = "Scored analysis, from cache or freshly produced"),
        (status = 400, description = "Empty query"),
        (status = 502, description = "Model unreachable or its response unreadable")
    ),
    tag = "Analysis"
)]
async fn analyze(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<ApiResponse<AnalysisOutcome>>, AppError> {
    tracing::info!(
        "[{}] Analyze '{}' (refresh: {})",
        request_id.0,
        request.query.trim(),
        request.refresh
    );

    let outcome = state.analyzer.analyze(&request.query, request.refresh).await?;
    Ok(Json(ApiResponse::success(outcome)))
}

#[utoipa::path(
    get,
    path = "/api/analyses/{query}",
    params(("query" = String, Path, description = "Company name or ticker, as analyzed")),
    responses(
        (status = 200, description = "Stored analysis with its freshness"),
        (status = 404, description = "No analysis stored for this query")
    ),
    tag = "Analysis"
)]
async fn get_analysis(
    State(state): State<AppState>,
    Path(query): Path<String>,
) -> Result<Json<ApiResponse<StoredAnalysis>>, AppError> {
    match state.analyzer.lookup(&query).await? {
        Some(stored) => Ok(Json(ApiResponse::success(stored))),
        None => Err(AppError::with_status(
            StatusCode::NOT_FOUND,
            anyhow::anyhow!("No analysis stored for '{}'", query.trim()),
        )),
    }
}

#[utoipa::path(
    get,
    path = "/api/rankings",
    responses((status = 200, description = "All stored analyses by total score, with the podium")),
    tag = "Analysis"
)]
async fn get_rankings(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<RankingView>>, AppError> {
    let view = state.analyzer.ranking().await?;
    Ok(Json(ApiResponse::success(view)))
}
