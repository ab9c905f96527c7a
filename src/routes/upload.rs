//! Upload Routes
//!
//! HTTP endpoints for resumable chunked uploads.
//!
//! Endpoints:
//! - POST /api/v1/upload - Start a session
//! - POST /api/v1/upload/:identifier/chunks/:chunk_number - Upload a chunk
//! - POST /api/v1/upload/:identifier/pause - Pause a session
//! - POST /api/v1/upload/:identifier/resume - Resume a session
//! - GET /api/v1/upload/:identifier - Get session status
//! - DELETE /api/v1/upload/:identifier - Purge a session

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::state::AppState;
use crate::upload::{
    ChunkUploadResponse, ErrorKind, SessionId, SessionStateResponse, StartUploadRequest,
    StartUploadResponse, StatusReport, UploadError,
};

// ============================================================================
// Error Response
// ============================================================================

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

impl IntoResponse for UploadError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if self.kind() == ErrorKind::Io {
            tracing::error!(error = %self, "Upload storage failure");
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        });

        (status, body).into_response()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Create the upload router. `max_body` bounds a single chunk body.
pub fn router(max_body: u64) -> Router<AppState> {
    let limit = usize::try_from(max_body).unwrap_or(usize::MAX);

    Router::new()
        .route("/", post(start_session))
        .route(
            "/:identifier/chunks/:chunk_number",
            post(upload_chunk).layer(DefaultBodyLimit::max(limit)),
        )
        .route("/:identifier/pause", post(pause_session))
        .route("/:identifier/resume", post(resume_session))
        .route("/:identifier", get(get_session).delete(purge_session))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/upload
///
/// Start a chunked upload. Returns the session identifier.
async fn start_session(
    State(state): State<AppState>,
    payload: Result<Json<StartUploadRequest>, JsonRejection>,
) -> Result<Json<StartUploadResponse>, UploadError> {
    let Json(request) = payload.map_err(|rejection| UploadError::InvalidField {
        field: "body",
        reason: rejection.body_text(),
    })?;

    let response = state.uploads().start(&request).await?;
    Ok(Json(response))
}

/// POST /api/v1/upload/:identifier/chunks/:chunk_number
///
/// Upload a single chunk. The chunk data is the raw request body.
async fn upload_chunk(
    State(state): State<AppState>,
    Path((identifier, chunk_number)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<ChunkUploadResponse>, UploadError> {
    let id = SessionId::parse(&identifier)?;
    let chunk_number = parse_chunk_number(&chunk_number)?;

    let response = state.uploads().submit_chunk(&id, chunk_number, &body).await?;
    Ok(Json(response))
}

/// POST /api/v1/upload/:identifier/pause
async fn pause_session(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<Json<SessionStateResponse>, UploadError> {
    let id = SessionId::parse(&identifier)?;
    Ok(Json(state.uploads().pause(&id).await?))
}

/// POST /api/v1/upload/:identifier/resume
async fn resume_session(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<Json<SessionStateResponse>, UploadError> {
    let id = SessionId::parse(&identifier)?;
    Ok(Json(state.uploads().resume(&id).await?))
}

/// GET /api/v1/upload/:identifier
async fn get_session(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<Json<StatusReport>, UploadError> {
    let id = SessionId::parse(&identifier)?;
    Ok(Json(state.uploads().status(&id).await?))
}

/// DELETE /api/v1/upload/:identifier
///
/// Operator purge: drops the session and its remaining chunks.
async fn purge_session(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<StatusCode, UploadError> {
    let id = SessionId::parse(&identifier)?;
    state.uploads().purge(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_chunk_number(raw: &str) -> Result<u32, UploadError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(UploadError::MissingField("chunkNumber"));
    }
    raw.parse().map_err(|_| UploadError::InvalidField {
        field: "chunkNumber",
        reason: format!("{:?} is not a positive integer", raw),
    })
}

// ============================================================================
// Tests
// ============================================================================
