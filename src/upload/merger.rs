//! Merger
//!
//! Folds a session's chunks into the final file in ascending chunk-number
//! order, one chunk at a time, deleting each chunk once it is written.
//! Output goes to a hidden `.part` sibling and is renamed into place only
//! once every chunk is on disk.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

use super::chunk_store::ChunkStore;
use super::registry::SessionRegistry;
use super::types::{SessionId, SessionStatus, UploadError, UploadSession};

#[derive(Clone)]
pub struct Merger {
    registry: SessionRegistry,
    chunk_store: ChunkStore,
}

impl Merger {
    pub fn new(registry: SessionRegistry, chunk_store: ChunkStore) -> Self {
        Self {
            registry,
            chunk_store,
        }
    }

    /// Take the completion latch and merge if every chunk has arrived.
    ///
    /// The latch is a single `InProgress -> Completing` transition, so among
    /// racing callers exactly one merges. Losers, and callers whose session
    /// is not ready yet, get `Ok(None)`.
    pub async fn complete_if_ready(&self, id: &SessionId) -> Result<Option<UploadSession>, UploadError> {
        let latched = self
            .registry
            .transition(
                id,
                |s| {
                    let ready = s.status == SessionStatus::InProgress
                        && s.is_complete()
                        && s.in_flight_chunks.is_empty();
                    if !ready {
                        return Err(UploadError::InvalidState {
                            id: s.id.clone(),
                            status: s.status,
                            action: "complete",
                        });
                    }
                    Ok(())
                },
                |s| s.status = SessionStatus::Completing,
            )
            .await;

        match latched {
            Ok(()) => self.merge(id).await.map(Some),
            Err(UploadError::InvalidState { .. }) => {
                tracing::debug!(session_id = %id, "Completion latch not taken");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Merge a session whose completion latch is held.
    ///
    /// On success the session is `Completed`. On any I/O failure it is
    /// `Failed`, the partial output is removed, and the failure is returned.
    /// There is no retry.
    pub async fn merge(&self, id: &SessionId) -> Result<UploadSession, UploadError> {
        let session = self.registry.get(id).await?;
        if session.status != SessionStatus::Completing {
            return Err(UploadError::InvalidState {
                id: id.clone(),
                status: session.status,
                action: "merge",
            });
        }

        tracing::info!(
            session_id = %id,
            file_name = %session.file_name,
            chunks = session.total_chunks,
            final_path = %session.final_path.display(),
            "Merging chunks"
        );

        match self.write_merged(&session).await {
            Ok(written) => {
                let completed = self
                    .registry
                    .transition(
                        id,
                        |s| expect_completing(s, "complete"),
                        |s| {
                            s.status = SessionStatus::Completed;
                            s.clone()
                        },
                    )
                    .await?;

                tracing::info!(
                    session_id = %id,
                    file_name = %completed.file_name,
                    bytes = written,
                    "Upload session completed"
                );

                Ok(completed)
            }
            Err(e) => {
                let reason = e.to_string();
                remove_partial(&session).await;
                if let Err(mark_err) = self.registry.mark_failed(id, &reason).await {
                    tracing::warn!(session_id = %id, error = %mark_err, "Could not mark session failed");
                }
                Err(UploadError::MergeFailed {
                    id: id.clone(),
                    reason,
                })
            }
        }
    }

    async fn write_merged(&self, session: &UploadSession) -> Result<u64, UploadError> {
        if let Some(parent) = session.final_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let partial = partial_path(&session.final_path);
        let file = File::create(&partial).await?;
        let mut out = BufWriter::new(file);
        let mut written = 0u64;

        for chunk_number in 1..=session.total_chunks {
            let mut reader = self.chunk_store.open_chunk(&session.id, chunk_number).await?;
            let copied = tokio::io::copy(&mut reader, &mut out).await?;
            out.flush().await?;
            drop(reader);

            self.chunk_store.delete_chunk(&session.id, chunk_number).await?;
            written += copied;

            tracing::debug!(
                session_id = %session.id,
                chunk_number = chunk_number,
                bytes = copied,
                "Chunk merged"
            );
        }

        out.get_mut().sync_all().await?;
        drop(out);
        tokio::fs::rename(&partial, &session.final_path).await?;
        Ok(written)
    }
}

/// `<dir>/.<name>.part`; the upload listing skips dot-files
pub(crate) fn partial_path(final_path: &Path) -> PathBuf {
    let name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    final_path.with_file_name(format!(".{}.part", name))
}

async fn remove_partial(session: &UploadSession) {
    let partial = partial_path(&session.final_path);
    match tokio::fs::remove_file(&partial).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            session_id = %session.id,
            path = %partial.display(),
            error = %e,
            "Could not remove partial merge output"
        ),
    }
}

fn expect_completing(session: &UploadSession, action: &'static str) -> Result<(), UploadError> {
    if session.status != SessionStatus::Completing {
        return Err(UploadError::InvalidState {
            id: session.id.clone(),
            status: session.status,
            action,
        });
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::types::{StartUploadRequest, MAX_FILE_SIZE};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        registry: SessionRegistry,
        store: ChunkStore,
        merger: Merger,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let registry = SessionRegistry::new(dir.path().join("uploads"), MAX_FILE_SIZE);
        let store = ChunkStore::with_local_storage(dir.path().join("tmp"));
        let merger = Merger::new(registry.clone(), store.clone());
        Fixture {
            _dir: dir,
            registry,
            store,
            merger,
        }
    }

    async fn latched_session(f: &Fixture, chunks: &[(u32, &[u8])]) -> UploadSession {
        let req = StartUploadRequest::new("out.bin", 64, "application/octet-stream", chunks.len() as u32);
        let session = f.registry.create(&req).await.unwrap();
        for (n, data) in chunks {
            f.store.store_chunk(&session.id, *n, data).await.unwrap();
        }
        let numbers: Vec<u32> = chunks.iter().map(|(n, _)| *n).collect();
        f.registry
            .transition(
                &session.id,
                |_| Ok(()),
                |s| {
                    s.received_chunks.extend(numbers);
                    s.status = SessionStatus::Completing;
                    s.clone()
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_merge_orders_by_chunk_number() {
        let f = fixture();
        // Stored in reverse order on purpose
        let session = latched_session(&f, &[(3, &b"!"[..]), (2, &b"World"[..]), (1, &b"Hello, "[..])]).await;

        let merged = f.merger.merge(&session.id).await.unwrap();
        assert_eq!(merged.status, SessionStatus::Completed);

        let bytes = tokio::fs::read(&session.final_path).await.unwrap();
        assert_eq!(bytes, b"Hello, World!");

        // Chunks reclaimed
        assert_eq!(f.store.delete_session_chunks(&session.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_merge_requires_latch() {
        let f = fixture();
        let req = StartUploadRequest::new("out.bin", 8, "application/octet-stream", 1);
        let session = f.registry.create(&req).await.unwrap();

        let result = f.merger.merge(&session.id).await;
        assert!(matches!(result, Err(UploadError::InvalidState { action: "merge", .. })));
        assert_eq!(f.registry.get(&session.id).await.unwrap().status, SessionStatus::Created);
    }

    #[tokio::test]
    async fn test_missing_chunk_fails_session() {
        let f = fixture();
        let session = latched_session(&f, &[(1, &b"abc"[..]), (2, &b"def"[..])]).await;
        f.store.delete_chunk(&session.id, 2).await.unwrap();

        let result = f.merger.merge(&session.id).await;
        assert!(matches!(result, Err(UploadError::MergeFailed { .. })));

        let failed = f.registry.get(&session.id).await.unwrap();
        assert_eq!(failed.status, SessionStatus::Failed);
        assert!(failed.failure_reason.is_some());

        // Nothing left behind under either name
        assert!(!session.final_path.exists());
        assert!(!partial_path(&session.final_path).exists());
    }

    #[test]
    fn test_partial_path_is_hidden_sibling() {
        let partial = partial_path(Path::new("/data/uploads/0123abcd4567-movie.mkv"));
        assert_eq!(partial, Path::new("/data/uploads/.0123abcd4567-movie.mkv.part"));
    }
}
