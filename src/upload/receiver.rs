//! Chunk Receiver
//!
//! Accepts one chunk at a time:
//! 1. Reserve the chunk number (rejects paused sessions and duplicates)
//! 2. Persist the payload through the chunk store
//! 3. Commit the number into `received_chunks`
//! 4. Try the completion latch and merge if this was the last chunk

use super::chunk_store::ChunkStore;
use super::merger::Merger;
use super::registry::SessionRegistry;
use super::types::{SessionId, SessionStatus, UploadError, UploadSession};

#[derive(Clone)]
pub struct ChunkReceiver {
    registry: SessionRegistry,
    chunk_store: ChunkStore,
    merger: Merger,
}

impl ChunkReceiver {
    pub fn new(registry: SessionRegistry, chunk_store: ChunkStore, merger: Merger) -> Self {
        Self {
            registry,
            chunk_store,
            merger,
        }
    }

    /// Record a chunk and return the session as it stands afterwards
    pub async fn receive(
        &self,
        id: &SessionId,
        chunk_number: u32,
        data: &[u8],
    ) -> Result<UploadSession, UploadError> {
        if data.is_empty() {
            return Err(UploadError::MissingField("chunk"));
        }

        self.registry
            .transition(
                id,
                |s| check_acceptance(s, chunk_number),
                |s| {
                    s.in_flight_chunks.insert(chunk_number);
                },
            )
            .await
            .inspect_err(|e| {
                tracing::warn!(
                    session_id = %id,
                    chunk_number = chunk_number,
                    error = %e,
                    "Chunk rejected"
                );
            })?;

        let record = match self.chunk_store.store_chunk(id, chunk_number, data).await {
            Ok(record) => record,
            Err(e) => {
                if let Err(mark_err) = self.registry.mark_failed(id, &e.to_string()).await {
                    tracing::warn!(session_id = %id, error = %mark_err, "Could not mark session failed");
                }
                return Err(e);
            }
        };

        let committed = self
            .registry
            .transition(
                id,
                |s| {
                    if !s.in_flight_chunks.contains(&chunk_number) {
                        return Err(UploadError::InvalidState {
                            id: s.id.clone(),
                            status: s.status,
                            action: "commit chunk",
                        });
                    }
                    Ok(())
                },
                |s| {
                    s.in_flight_chunks.remove(&chunk_number);
                    s.received_chunks.insert(chunk_number);
                    s.bytes_received += record.size;
                    if s.status == SessionStatus::Created {
                        s.status = SessionStatus::InProgress;
                    }
                    s.clone()
                },
            )
            .await;

        let committed = match committed {
            Ok(session) => session,
            Err(e) => {
                // Session was purged or failed while the payload was being written
                if let Err(delete_err) = self.chunk_store.delete_chunk(id, chunk_number).await {
                    tracing::warn!(
                        session_id = %id,
                        chunk_number = chunk_number,
                        error = %delete_err,
                        "Could not delete uncommitted chunk"
                    );
                }
                return Err(e);
            }
        };

        tracing::debug!(
            session_id = %id,
            chunk_number = chunk_number,
            chunks_received = committed.received_chunks.len(),
            total_chunks = committed.total_chunks,
            progress = format!("{:.1}%", committed.progress()),
            "Chunk uploaded"
        );

        if !(committed.is_complete() && committed.in_flight_chunks.is_empty()) {
            return Ok(committed);
        }

        match self.merger.complete_if_ready(id).await? {
            Some(merged) => Ok(merged),
            // Another submission holds the latch, or the session is paused
            None => self.registry.get(id).await,
        }
    }
}

/// Whether `chunk_number` may be reserved on `session`
fn check_acceptance(session: &UploadSession, chunk_number: u32) -> Result<(), UploadError> {
    if chunk_number == 0 || chunk_number > session.total_chunks {
        return Err(UploadError::ChunkOutOfRange {
            chunk_number,
            total_chunks: session.total_chunks,
        });
    }

    if session.status == SessionStatus::Paused {
        return Err(UploadError::SessionPaused(session.id.clone()));
    }

    if session.contains_chunk(chunk_number) {
        return Err(UploadError::ChunkAlreadyReceived(chunk_number));
    }

    if !session.status.accepts_chunks() {
        return Err(UploadError::InvalidState {
            id: session.id.clone(),
            status: session.status,
            action: "accept chunk",
        });
    }

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
