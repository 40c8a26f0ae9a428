use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use docqa_core::{
    CompletionModel, DocumentQa, Embedder, IngestError, PromptedRefinement, QueryRequest, RagError,
};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub const SESSION_COOKIE: &str = "docqa_session";
pub const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

pub type DynCompletion = Arc<dyn CompletionModel>;
pub type Service = DocumentQa<Arc<dyn Embedder>, PromptedRefinement<DynCompletion>, DynCompletion>;

pub struct AppState {
    pub qa: Service,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{message}")]
    Rejected { status: StatusCode, message: String },
    #[error("{0}")]
    BadGateway(String),
    #[error("{0}")]
    GatewayTimeout(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Rejected { status, .. } => *status,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<RagError> for ApiError {
    fn from(error: RagError) -> Self {
        match &error {
            RagError::EmptyQuery | RagError::NoDocument => ApiError::BadRequest(error.to_string()),
            RagError::Timeout { .. } => ApiError::GatewayTimeout(error.to_string()),
            RagError::BackendResponse { .. }
            | RagError::Http(_)
            | RagError::ModelOutput(_)
            | RagError::Serialization(_) => ApiError::BadGateway(error.to_string()),
            RagError::Url(_) | RagError::Regex(_) | RagError::Request(_) => {
                ApiError::Internal(error.to_string())
            }
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(error: IngestError) -> Self {
        match error {
            IngestError::Embedding(inner) => ApiError::from(inner),
            IngestError::Io(inner) => ApiError::Internal(inner.to_string()),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/upload", post(upload))
        .route("/query", post(query))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn upload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut file = None;
    while let Some(field) = multipart.next_field().await.map_err(|error| {
        ApiError::Rejected {
            status: error.status(),
            message: error.body_text(),
        }
    })? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(|error| ApiError::Rejected {
            status: error.status(),
            message: error.body_text(),
        })?;
        file = Some((file_name, bytes));
        break;
    }

    let (file_name, bytes) = file.ok_or_else(|| ApiError::BadRequest("No file part".to_string()))?;
    if file_name.trim().is_empty() {
        return Err(ApiError::BadRequest("No selected file".to_string()));
    }

    let existing = session_from_headers(&headers);
    let session_id = existing
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let purged = state.qa.sessions().purge_expired().await;
    if purged > 0 {
        info!(purged, "dropped expired sessions");
    }

    let summary = state.qa.ingest(&session_id, &file_name, &bytes).await?;

    let mut response = Json(summary).into_response();
    if existing.is_none() {
        let cookie = format!("{SESSION_COOKIE}={session_id}; Path=/; HttpOnly; SameSite=Lax");
        let value = HeaderValue::from_str(&cookie)
            .map_err(|error| ApiError::Internal(error.to_string()))?;
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    Ok(response)
}

async fn query(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::Rejected {
        status: rejection.status(),
        message: rejection.body_text(),
    })?;
    if request.query.trim().is_empty() {
        return Err(RagError::EmptyQuery.into());
    }
    let session_id = session_from_headers(&headers).ok_or(RagError::NoDocument)?;

    let response = state.qa.answer(&session_id, &request).await?;
    Ok(Json(response).into_response())
}

/// Session id from the `Cookie` header, if the client sent one.
pub fn session_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.trim().is_empty())
        .map(|(_, value)| value.trim().to_string())
}
