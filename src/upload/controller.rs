//! Session Controller
//!
//! Pause, resume, status and operator purge.

use super::chunk_store::ChunkStore;
use super::merger::Merger;
use super::registry::SessionRegistry;
use super::types::{SessionId, SessionStatus, StatusReport, UploadError, UploadSession};

#[derive(Clone)]
pub struct SessionController {
    registry: SessionRegistry,
    chunk_store: ChunkStore,
    merger: Merger,
}

impl SessionController {
    pub fn new(registry: SessionRegistry, chunk_store: ChunkStore, merger: Merger) -> Self {
        Self {
            registry,
            chunk_store,
            merger,
        }
    }

    /// Stop accepting chunks. Received chunks are kept.
    pub async fn pause(&self, id: &SessionId) -> Result<UploadSession, UploadError> {
        let session = self
            .registry
            .transition(
                id,
                |s| {
                    if !s.status.accepts_chunks() {
                        return Err(UploadError::InvalidState {
                            id: s.id.clone(),
                            status: s.status,
                            action: "pause",
                        });
                    }
                    Ok(())
                },
                |s| {
                    s.status = SessionStatus::Paused;
                    s.clone()
                },
            )
            .await?;

        tracing::info!(
            session_id = %id,
            chunks_received = session.received_chunks.len(),
            "Upload session paused"
        );

        Ok(session)
    }

    /// Accept chunks again.
    ///
    /// A chunk that was mid-write when the pause landed may have completed the
    /// set, in which case resuming runs the merge.
    pub async fn resume(&self, id: &SessionId) -> Result<UploadSession, UploadError> {
        let session = self
            .registry
            .transition(
                id,
                |s| {
                    if s.status != SessionStatus::Paused {
                        return Err(UploadError::InvalidState {
                            id: s.id.clone(),
                            status: s.status,
                            action: "resume",
                        });
                    }
                    Ok(())
                },
                |s| {
                    s.status = SessionStatus::InProgress;
                    s.clone()
                },
            )
            .await?;

        tracing::info!(
            session_id = %id,
            chunks_received = session.received_chunks.len(),
            "Upload session resumed"
        );

        if session.is_complete() && session.in_flight_chunks.is_empty() {
            if let Some(merged) = self.merger.complete_if_ready(id).await? {
                return Ok(merged);
            }
            return self.registry.get(id).await;
        }

        Ok(session)
    }

    /// Read-only status report
    pub async fn status(&self, id: &SessionId) -> Result<StatusReport, UploadError> {
        let session = self.registry.get(id).await?;
        Ok(StatusReport::from(&session))
    }

    /// Remove a session and any chunks it still owns. Merged files are kept.
    pub async fn purge(&self, id: &SessionId) -> Result<usize, UploadError> {
        self.registry.delete(id).await?;
        let deleted = self.chunk_store.delete_session_chunks(id).await?;

        tracing::info!(session_id = %id, chunks_deleted = deleted, "Upload session purged");
        Ok(deleted)
    }
}

// ============================================================================
// Tests
// ============================================================================
