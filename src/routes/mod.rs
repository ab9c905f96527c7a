//! Route modules for the upload server

pub mod files;
pub mod health;
pub mod upload;

use axum::Router;

use crate::state::AppState;

/// Assemble every API route
pub fn api_router(state: AppState) -> Router {
    let max_body = state.config().upload.max_file_size;

    Router::new()
        .nest("/health", health::router())
        .nest("/api/v1/upload", upload::router(max_body))
        .nest("/api/v1/files", files::router())
        .with_state(state)
}
