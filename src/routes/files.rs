//! Completed upload listing

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;
use crate::upload::{StoredFile, UploadError};

#[derive(Serialize)]
pub struct FileListResponse {
    pub files: Vec<StoredFile>,
}

/// GET /api/v1/files
async fn list_files(State(state): State<AppState>) -> Result<Json<FileListResponse>, UploadError> {
    let files = state.uploads().list_completed().await?;
    Ok(Json(FileListResponse { files }))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_files))
}
