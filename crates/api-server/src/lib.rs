//! HTTP surface for rubric-based stock scoring.

pub mod analysis_routes;
pub mod config;
pub mod request_id;

pub use config::ServerConfig;

use analysis_orchestrator::{AnalyzeError, StockAnalyzer};
use analysis_store::{FreshnessPolicy, JsonFileStore};
use anyhow::Context;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use llm_client::{PerplexityClient, RequestBuilder};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::analysis_routes::analysis_routes;
use crate::request_id::request_id_middleware;

#[derive(Clone)]
pub struct AppState {
    pub analyzer: Arc<StockAnalyzer>,
}

impl AppState {
    pub fn new(analyzer: StockAnalyzer) -> Self {
        Self {
            analyzer: Arc::new(analyzer),
        }
    }
}

/// Response envelope shared by every endpoint.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    data: Option<()>,
    error: String,
    retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    raw_completion: Option<String>,
}

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    error: anyhow::Error,
    retryable: bool,
    raw_completion: Option<String>,
}

impl AppError {
    pub fn with_status(status: StatusCode, error: anyhow::Error) -> Self {
        Self {
            status,
            error,
            retryable: false,
            raw_completion: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<AnalyzeError> for AppError {
    fn from(e: AnalyzeError) -> Self {
        let status = match &e {
            AnalyzeError::EmptyQuery => StatusCode::BAD_REQUEST,
            AnalyzeError::Transport(_) | AnalyzeError::Parse { .. } => StatusCode::BAD_GATEWAY,
            AnalyzeError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let retryable = e.is_retryable();
        let raw_completion = match &e {
            AnalyzeError::Parse { raw_completion, .. } => Some(raw_completion.clone()),
            _ => None,
        };

        Self {
            status,
            error: e.into(),
            retryable,
            raw_completion,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("Request failed ({}): {:#}", self.status, self.error);
        }

        let body = ErrorBody {
            success: false,
            data: None,
            error: format!("{:#}", self.error),
            retryable: self.retryable,
            raw_completion: self.raw_completion,
        };
        (self.status, Json(body)).into_response()
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        analysis_routes::analyze,
        analysis_routes::get_analysis,
        analysis_routes::get_rankings,
        health
    ),
    components(schemas(
        analysis_routes::AnalyzeRequest,
        analysis_core::AnalysisRecord,
        analysis_core::SubScore,
        analysis_core::CriterionDetail,
        analysis_core::RankingRow
    )),
    tags((name = "Analysis", description = "Rubric-based stock scoring"))
)]
pub struct ApiDoc;

#[derive(Serialize)]
struct HealthStatus {
    status: &'static str,
    model_backend: &'static str,
    store_backend: &'static str,
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up")),
    tag = "Analysis"
)]
async fn health(State(state): State<AppState>) -> Json<ApiResponse<HealthStatus>> {
    let (model_backend, store_backend) = state.analyzer.backend_names();
    Json(ApiResponse::success(HealthStatus {
        status: "ok",
        model_backend,
        store_backend,
    }))
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api-docs/openapi.json", get(openapi_json))
        .merge(analysis_routes())
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = tracing::field::Empty,
            )
        }))
        .with_state(state)
}

/// Wire the analyzer from configuration.
pub fn build_analyzer(config: &ServerConfig) -> anyhow::Result<StockAnalyzer> {
    let client =
        PerplexityClient::new(config.llm.clone()).context("Failed to build model client")?;
    let store = JsonFileStore::in_dir(&config.data_dir)
        .with_legacy_offset(config.legacy_timestamp_offset);

    tracing::info!(
        "Model {} at {}, analyses in {}",
        client.model(),
        config.llm.base_url,
        store.path().display()
    );

    Ok(StockAnalyzer::new(Arc::new(client), Arc::new(store))
        .with_request_builder(RequestBuilder::new(config.llm.params.clone()))
        .with_total_policy(config.total_policy)
        .with_freshness(FreshnessPolicy::days(config.cache_ttl_days))
        .with_request_timeout(config.llm.timeout))
}

pub async fn run_server() -> anyhow::Result<()> {
    let config = ServerConfig::from_env()?;
    tracing::info!("Configuration loaded");
    tracing::info!("  Cache TTL: {} days", config.cache_ttl_days);
    tracing::info!("  Total policy: {:?}", config.total_policy);

    let app = build_router(AppState::new(build_analyzer(&config)?));

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    tracing::info!("API server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis_core::RUBRIC;
    use analysis_store::{AnalysisStore, InMemoryStore};
    use axum::body::Body;
    use axum::http::{header, Request as HttpRequest};
    use llm_client::{ScriptedProvider, ScriptedReply};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn completion(ticker: &str) -> String {
        let scores: serde_json::Map<String, Value> = RUBRIC
            .iter()
            .map(|c| (c.id.to_string(), json!({"score": 2, "reason": "scripted"})))
            .collect();
        json!({
            "company_name": format!("{} Inc", ticker),
            "ticker": ticker,
            "scores": scores,
            "total_score": 26,
            "analysis_summary": "Scripted."
        })
        .to_string()
    }

    fn app(replies: Vec<ScriptedReply>, store: Arc<InMemoryStore>) -> Router {
        let analyzer = StockAnalyzer::new(Arc::new(ScriptedProvider::new(replies)), store);
        build_router(AppState::new(analyzer))
    }

    fn post_analyze(body: Value) -> HttpRequest<Body> {
        HttpRequest::post("/api/analyze")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_analyze_then_lookup_and_rank() {
        let store = Arc::new(InMemoryStore::new());
        let app = app(vec![ScriptedReply::Completion(completion("AAPL"))], store.clone());

        let response = app
            .clone()
            .oneshot(post_analyze(json!({"query": " aapl "})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["source"], "fresh");
        assert_eq!(body["data"]["record"]["total_score"], 26);
        assert_eq!(body["data"]["details"].as_array().unwrap().len(), 13);

        let response = app
            .clone()
            .oneshot(HttpRequest::get("/api/analyses/aapl").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["data"]["key"], "AAPL");
        assert_eq!(body["data"]["freshness"], "fresh");

        let response = app
            .oneshot(HttpRequest::get("/api/rankings").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["data"]["rows"][0]["ticker"], "AAPL");
        assert_eq!(body["data"]["rows"][0]["rank"], 1);
        assert!(body["data"]["podium"].is_null());
        assert_eq!(store.entries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_query_is_bad_request() {
        let app = app(Vec::new(), Arc::new(InMemoryStore::new()));
        let response = app.oneshot(post_analyze(json!({"query": "   "}))).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_unknown_lookup_is_not_found() {
        let app = app(Vec::new(), Arc::new(InMemoryStore::new()));
        let response = app
            .oneshot(HttpRequest::get("/api/analyses/MSFT").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_model_failure_is_bad_gateway() {
        let app = app(vec![ScriptedReply::Timeout], Arc::new(InMemoryStore::new()));
        let response = app.oneshot(post_analyze(json!({"query": "AAPL"}))).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = json_body(response).await;
        assert_eq!(body["retryable"], true);
        assert!(body.get("raw_completion").is_none());
    }

    #[tokio::test]
    async fn test_unreadable_completion_returns_raw_text() {
        let app = app(
            vec![ScriptedReply::Completion("Sorry, no data.".into())],
            Arc::new(InMemoryStore::new()),
        );
        let response = app.oneshot(post_analyze(json!({"query": "AAPL"}))).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = json_body(response).await;
        assert_eq!(body["raw_completion"], "Sorry, no data.");
    }

    #[tokio::test]
    async fn test_request_id_is_echoed_or_generated() {
        let app = app(Vec::new(), Arc::new(InMemoryStore::new()));

        let response = app
            .clone()
            .oneshot(
                HttpRequest::get("/health")
                    .header("x-request-id", "abc-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()["x-request-id"], "abc-123");
        let body = json_body(response).await;
        assert_eq!(body["data"]["model_backend"], "scripted");
        assert_eq!(body["data"]["store_backend"], "memory");

        let response = app
            .oneshot(HttpRequest::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let generated = response.headers()["x-request-id"].to_str().unwrap();
        assert_eq!(generated.len(), 36);
    }

    #[tokio::test]
    async fn test_openapi_document_lists_routes() {
        let app = app(Vec::new(), Arc::new(InMemoryStore::new()));
        let response = app
            .oneshot(HttpRequest::get("/api-docs/openapi.json").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(response).await;
        assert!(body["paths"]["/api/analyze"].is_object());
        assert!(body["paths"]["/api/rankings"].is_object());
    }
}
