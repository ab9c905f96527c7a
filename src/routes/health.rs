//! Health check with a summary of live upload sessions

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;
use crate::upload::SessionStatus;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub sessions: SessionCounts,
}

/// Sessions still held by the registry, by coarse state
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionCounts {
    pub receiving: usize,
    pub paused: usize,
    pub merging: usize,
    pub finished: usize,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let mut sessions = SessionCounts::default();
    for session in state.uploads().registry().list().await {
        match session.status {
            SessionStatus::Created | SessionStatus::InProgress => sessions.receiving += 1,
            SessionStatus::Paused => sessions.paused += 1,
            SessionStatus::Completing => sessions.merging += 1,
            SessionStatus::Completed | SessionStatus::Failed => sessions.finished += 1,
        }
    }

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        sessions,
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health_check))
}
