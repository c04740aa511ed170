use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest caller-supplied ID accepted before a fresh one is minted.
const MAX_REQUEST_ID_LEN: usize = 128;

/// Correlates an analysis request across the access log, the orchestrator's
/// cache and model logs, and the caller's own logs.
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

fn caller_request_id(headers: &HeaderMap) -> Option<String> {
    let id = headers.get(REQUEST_ID_HEADER)?.to_str().ok()?.trim();
    (!id.is_empty() && id.len() <= MAX_REQUEST_ID_LEN).then(|| id.to_string())
}

/// Tags every request with an ID: the caller's, when sane, or a new UUID v4.
///
/// The ID fills the `request_id` field of the `http_request` span, is handed to
/// handlers as a [`RequestId`] extension and comes back on the response.
pub async fn request_id_middleware(
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Response {
    let id = caller_request_id(&headers).unwrap_or_else(|| Uuid::new_v4().to_string());
    tracing::Span::current().record("request_id", id.as_str());

    request.extensions_mut().insert(RequestId(id.clone()));
    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
