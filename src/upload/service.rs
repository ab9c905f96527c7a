//! Upload service
//!
//! Wires the registry, chunk store, receiver, merger and controller together
//! behind one cheap-to-clone handle for the HTTP layer.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::UploadConfig;

use super::chunk_store::ChunkStore;
use super::controller::SessionController;
use super::merger::Merger;
use super::reaper::SessionReaper;
use super::receiver::ChunkReceiver;
use super::registry::SessionRegistry;
use super::types::{
    ChunkUploadResponse, SessionId, SessionStateResponse, SessionStatus, StartUploadRequest,
    StartUploadResponse, StatusReport, StoredFile, UploadError, UploadSession,
};

#[derive(Clone)]
pub struct UploadService {
    registry: SessionRegistry,
    chunk_store: ChunkStore,
    receiver: ChunkReceiver,
    controller: SessionController,
}

impl UploadService {
    pub fn new(upload_dir: PathBuf, chunk_store: ChunkStore, max_file_size: u64) -> Self {
        let registry = SessionRegistry::new(upload_dir, max_file_size);
        let merger = Merger::new(registry.clone(), chunk_store.clone());

        Self {
            receiver: ChunkReceiver::new(registry.clone(), chunk_store.clone(), merger.clone()),
            controller: SessionController::new(registry.clone(), chunk_store.clone(), merger),
            registry,
            chunk_store,
        }
    }

    /// Service backed by local chunk storage
    pub fn from_config(config: &UploadConfig) -> Self {
        Self::new(
            config.upload_dir.clone(),
            ChunkStore::with_local_storage(config.chunk_dir.clone()),
            config.max_file_size,
        )
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn reaper(&self, retention: chrono::Duration, interval: Duration) -> SessionReaper {
        SessionReaper::new(
            self.registry.clone(),
            self.chunk_store.clone(),
            retention,
            interval,
        )
    }

    // ========================================================================
    // Operations
    // ========================================================================

    pub async fn start(&self, request: &StartUploadRequest) -> Result<StartUploadResponse, UploadError> {
        let session = self.registry.create(request).await?;
        Ok(StartUploadResponse {
            identifier: session.id,
            total_chunks: session.total_chunks,
            status: session.status,
        })
    }

    pub async fn submit_chunk(
        &self,
        id: &SessionId,
        chunk_number: u32,
        data: &[u8],
    ) -> Result<ChunkUploadResponse, UploadError> {
        let session = self.receiver.receive(id, chunk_number, data).await?;
        Ok(ChunkUploadResponse {
            identifier: session.id.clone(),
            chunk_number,
            received_chunks: session.received_list(),
            total_chunks: session.total_chunks,
            status: session.status,
        })
    }

    pub async fn pause(&self, id: &SessionId) -> Result<SessionStateResponse, UploadError> {
        let session = self.controller.pause(id).await?;
        Ok(state_response(&session))
    }

    pub async fn resume(&self, id: &SessionId) -> Result<SessionStateResponse, UploadError> {
        let session = self.controller.resume(id).await?;
        Ok(state_response(&session))
    }

    pub async fn status(&self, id: &SessionId) -> Result<StatusReport, UploadError> {
        self.controller.status(id).await
    }

    pub async fn purge(&self, id: &SessionId) -> Result<usize, UploadError> {
        self.controller.purge(id).await
    }

    /// Merged files in the upload directory, sorted by name.
    ///
    /// Output of sessions that are still merging or have failed is hidden, as
    /// are dot-files (in-progress merges and the default chunk directory).
    pub async fn list_completed(&self) -> Result<Vec<StoredFile>, UploadError> {
        let unfinished: HashSet<PathBuf> = self
            .registry
            .list()
            .await
            .into_iter()
            .filter(|s| s.status != SessionStatus::Completed)
            .map(|s| s.final_path)
            .collect();

        let mut entries = match tokio::fs::read_dir(self.registry.upload_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(UploadError::StorageError(format!("Unable to scan directory: {}", e))),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() || unfinished.contains(&entry.path()) {
                continue;
            }
            files.push(StoredFile {
                name,
                size: metadata.len(),
            });
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }
}

fn state_response(session: &UploadSession) -> SessionStateResponse {
    SessionStateResponse {
        identifier: session.id.clone(),
        status: session.status,
        received_chunks: session.received_list(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::types::MAX_FILE_SIZE;
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> UploadService {
        UploadService::new(
            dir.path().join("uploads"),
            ChunkStore::with_local_storage(dir.path().join("tmp")),
            MAX_FILE_SIZE,
        )
    }

    #[tokio::test]
    async fn test_list_completed_hides_unfinished() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        assert!(service.list_completed().await.unwrap().is_empty());

        let done = service
            .start(&StartUploadRequest::new("done.txt", 5, "text/plain", 1))
            .await
            .unwrap();
        service.submit_chunk(&done.identifier, 1, b"hello").await.unwrap();

        let failed = service
            .start(&StartUploadRequest::new("broken.txt", 5, "text/plain", 1))
            .await
            .unwrap();
        let failed_session = service.registry().get(&failed.identifier).await.unwrap();
        tokio::fs::write(&failed_session.final_path, b"partial").await.unwrap();
        service
            .registry()
            .mark_failed(&failed.identifier, "simulated")
            .await
            .unwrap();

        let files = service.list_completed().await.unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].name.ends_with("done.txt"));
        assert_eq!(files[0].size, 5);
    }

    #[tokio::test]
    async fn test_pause_resume_responses() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let started = service
            .start(&StartUploadRequest::new("a.bin", 4, "application/octet-stream", 2))
            .await
            .unwrap();
        assert_eq!(started.status, SessionStatus::Created);

        service.submit_chunk(&started.identifier, 2, b"cd").await.unwrap();
        let paused = service.pause(&started.identifier).await.unwrap();
        assert_eq!(paused.status, SessionStatus::Paused);
        assert_eq!(paused.received_chunks, vec![2]);

        let resumed = service.resume(&started.identifier).await.unwrap();
        assert_eq!(resumed.status, SessionStatus::InProgress);
        assert_eq!(resumed.received_chunks, vec![2]);
    }
}
