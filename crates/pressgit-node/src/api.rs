//! HTTP API for the pressgit node.
//!
//! Serves one repository over git smart HTTP. Requests are matched on their
//! path suffix, so the repository can be mounted under any prefix
//! (`/site.git/info/refs`, `/info/refs`, ...).

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header::HeaderName, HeaderMap, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use pressgit_git::{BufferingResponseWriter, GitError, GitRequest, GitServer};
use serde::Serialize;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The served repository.
    pub server: GitServer,
}

impl AppState {
    /// Wraps a server.
    pub fn new(server: GitServer) -> Self {
        Self { server }
    }
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("git error: {0}")]
    Git(#[from] GitError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Git(e) => {
                StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(status = %status, error = %self, "Request failed");
        } else {
            tracing::warn!(status = %status, error = %self, "Request rejected");
        }

        (status, format!("{}\n", self)).into_response()
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    head: Option<String>,
}

/// Creates the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // Git smart HTTP protocol, routed by path suffix
        .fallback(git_request)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let head = state
        .server
        .repository()
        .head()
        .map_err(GitError::from)?
        .map(|id| id.to_hex());
    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        head,
    }))
}

/// Hands `HEAD`, `info/refs` and `git-upload-pack` requests to the server.
async fn git_request(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let path_and_query = uri
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or_else(|| uri.path());
    let mut request = GitRequest::new(path_and_query).with_body(body);
    if let Some(protocol) = headers.get("git-protocol").and_then(|v| v.to_str().ok()) {
        request = request.with_git_protocol(protocol);
    }

    let server = state.server.clone();
    let written = tokio::task::spawn_blocking(move || {
        let mut writer = BufferingResponseWriter::new();
        server.handle_request(&request, &mut writer).map(|()| writer)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    into_response(written)
}

fn into_response(written: BufferingResponseWriter) -> Result<Response, ApiError> {
    let mut response = Response::new(Body::from(written.body));
    *response.status_mut() =
        StatusCode::from_u16(written.status).map_err(|e| ApiError::Internal(e.to_string()))?;
    for (name, value) in &written.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        let value = HeaderValue::from_str(value).map_err(|e| ApiError::Internal(e.to_string()))?;
        response.headers_mut().insert(name, value);
    }
    Ok(response)
}
