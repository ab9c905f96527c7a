//! Chunk Store
//!
//! Temporary storage for uploaded chunks before they are merged.
//! Chunks are keyed by `(session identifier, chunk number)`.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::io::AsyncRead;

use super::types::{ChunkRecord, SessionId, UploadError};

/// Streaming handle to a stored chunk
pub type ChunkReader = Box<dyn AsyncRead + Send + Unpin>;

// ============================================================================
// Chunk Store Trait
// ============================================================================

/// Trait for chunk storage backends
#[async_trait::async_trait]
pub trait ChunkStorage: Send + Sync {
    /// Store a chunk, replacing any previous payload under the same key
    async fn store_chunk(
        &self,
        session_id: &SessionId,
        chunk_number: u32,
        data: &[u8],
    ) -> Result<ChunkRecord, UploadError>;

    /// Open a chunk for streaming reads
    async fn open_chunk(
        &self,
        session_id: &SessionId,
        chunk_number: u32,
    ) -> Result<ChunkReader, UploadError>;

    /// Delete a single chunk. Deleting a missing chunk is not an error.
    async fn delete_chunk(&self, session_id: &SessionId, chunk_number: u32) -> Result<(), UploadError>;

    /// Delete all chunks for a session, returning how many were removed
    async fn delete_session_chunks(&self, session_id: &SessionId) -> Result<usize, UploadError>;

    /// Sessions that currently own stored chunks
    async fn list_sessions(&self) -> Result<Vec<SessionId>, UploadError>;
}

// ============================================================================
// Chunk Store (Main Implementation)
// ============================================================================

/// Chunk store with a pluggable backend
#[derive(Clone)]
pub struct ChunkStore {
    backend: Arc<dyn ChunkStorage>,
}

impl ChunkStore {
    /// Create with local filesystem storage
    pub fn with_local_storage(base_path: PathBuf) -> Self {
        Self::with_backend(Arc::new(LocalChunkStorage::new(base_path)))
    }

    /// Create with a custom backend
    pub fn with_backend(backend: Arc<dyn ChunkStorage>) -> Self {
        Self { backend }
    }

    pub async fn store_chunk(
        &self,
        session_id: &SessionId,
        chunk_number: u32,
        data: &[u8],
    ) -> Result<ChunkRecord, UploadError> {
        let record = self.backend.store_chunk(session_id, chunk_number, data).await?;

        tracing::debug!(
            session_id = %session_id,
            chunk_number = chunk_number,
            size = record.size,
            location = %record.location.display(),
            "Stored chunk"
        );

        Ok(record)
    }

    pub async fn open_chunk(
        &self,
        session_id: &SessionId,
        chunk_number: u32,
    ) -> Result<ChunkReader, UploadError> {
        self.backend.open_chunk(session_id, chunk_number).await
    }

    pub async fn delete_chunk(&self, session_id: &SessionId, chunk_number: u32) -> Result<(), UploadError> {
        self.backend.delete_chunk(session_id, chunk_number).await
    }

    pub async fn delete_session_chunks(&self, session_id: &SessionId) -> Result<usize, UploadError> {
        self.backend.delete_session_chunks(session_id).await
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionId>, UploadError> {
        self.backend.list_sessions().await
    }
}

// ============================================================================
// Local Filesystem Storage
// ============================================================================

/// Local filesystem chunk storage
pub struct LocalChunkStorage {
    base_path: PathBuf,
}

impl LocalChunkStorage {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn chunks_root(&self) -> PathBuf {
        self.base_path.join("chunks")
    }

    fn session_dir(&self, session_id: &SessionId) -> PathBuf {
        self.chunks_root().join(session_id.as_str())
    }

    fn chunk_path(&self, session_id: &SessionId, chunk_number: u32) -> PathBuf {
        self.session_dir(session_id)
            .join(format!("{:08}.chunk", chunk_number))
    }
}

#[async_trait::async_trait]
impl ChunkStorage for LocalChunkStorage {
    async fn store_chunk(
        &self,
        session_id: &SessionId,
        chunk_number: u32,
        data: &[u8],
    ) -> Result<ChunkRecord, UploadError> {
        let path = self.chunk_path(session_id, chunk_number);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| UploadError::StorageError(e.to_string()))?;
        }

        // Write beside the final name so a half-written chunk is never visible
        let partial = path.with_extension("chunk.part");
        tokio::fs::write(&partial, data)
            .await
            .map_err(|e| UploadError::StorageError(format!("Failed to write chunk: {}", e)))?;
        tokio::fs::rename(&partial, &path)
            .await
            .map_err(|e| UploadError::StorageError(format!("Failed to commit chunk: {}", e)))?;

        Ok(ChunkRecord {
            session_id: session_id.clone(),
            chunk_number,
            location: path,
            size: data.len() as u64,
            stored_at: Utc::now(),
        })
    }

    async fn open_chunk(
        &self,
        session_id: &SessionId,
        chunk_number: u32,
    ) -> Result<ChunkReader, UploadError> {
        let path = self.chunk_path(session_id, chunk_number);
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| UploadError::StorageError(format!("Failed to open chunk {}: {}", chunk_number, e)))?;
        Ok(Box::new(file))
    }

    async fn delete_chunk(&self, session_id: &SessionId, chunk_number: u32) -> Result<(), UploadError> {
        let path = self.chunk_path(session_id, chunk_number);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(UploadError::StorageError(e.to_string())),
        }
    }

    async fn delete_session_chunks(&self, session_id: &SessionId) -> Result<usize, UploadError> {
        let session_dir = self.session_dir(session_id);

        if !session_dir.exists() {
            return Ok(0);
        }

        let mut count = 0;
        let mut entries = tokio::fs::read_dir(&session_dir)
            .await
            .map_err(|e| UploadError::StorageError(e.to_string()))?;

        while let Some(entry) = entries.next_entry().await
            .map_err(|e| UploadError::StorageError(e.to_string()))?
        {
            tokio::fs::remove_file(entry.path())
                .await
                .map_err(|e| UploadError::StorageError(e.to_string()))?;
            count += 1;
        }

        // Remove empty directory
        let _ = tokio::fs::remove_dir(&session_dir).await;

        Ok(count)
    }

    async fn list_sessions(&self) -> Result<Vec<SessionId>, UploadError> {
        let root = self.chunks_root();
        let mut entries = match tokio::fs::read_dir(&root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(UploadError::StorageError(e.to_string())),
        };

        let mut sessions = Vec::new();
        while let Some(entry) = entries.next_entry().await
            .map_err(|e| UploadError::StorageError(e.to_string()))?
        {
            if let Some(name) = entry.file_name().to_str() {
                if let Ok(id) = SessionId::parse(name) {
                    sessions.push(id);
                }
            }
        }

        Ok(sessions)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    async fn read_all(store: &ChunkStore, id: &SessionId, n: u32) -> Vec<u8> {
        let mut reader = store.open_chunk(id, n).await.unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_local_chunk_storage() {
        let temp_dir = TempDir::new().unwrap();
        let store = ChunkStore::with_local_storage(temp_dir.path().to_path_buf());

        let session_id = SessionId::generate();
        let data = b"test chunk data";

        let record = store.store_chunk(&session_id, 1, data).await.unwrap();
        assert_eq!(record.size, data.len() as u64);
        assert_eq!(record.chunk_number, 1);
        assert!(record.location.ends_with("00000001.chunk"));

        assert_eq!(read_all(&store, &session_id, 1).await, data);

        let deleted = store.delete_session_chunks(&session_id).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(store.open_chunk(&session_id, 1).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_single_chunk() {
        let temp_dir = TempDir::new().unwrap();
        let store = ChunkStore::with_local_storage(temp_dir.path().to_path_buf());
        let session_id = SessionId::generate();

        store.store_chunk(&session_id, 1, b"one").await.unwrap();
        store.store_chunk(&session_id, 2, b"two").await.unwrap();

        store.delete_chunk(&session_id, 1).await.unwrap();
        // Idempotent
        store.delete_chunk(&session_id, 1).await.unwrap();

        assert!(store.open_chunk(&session_id, 1).await.is_err());
        assert_eq!(read_all(&store, &session_id, 2).await, b"two");
    }

    #[tokio::test]
    async fn test_list_sessions() {
        let temp_dir = TempDir::new().unwrap();
        let store = ChunkStore::with_local_storage(temp_dir.path().to_path_buf());
        assert!(store.list_sessions().await.unwrap().is_empty());

        let a = SessionId::generate();
        let b = SessionId::generate();
        store.store_chunk(&a, 1, b"a").await.unwrap();
        store.store_chunk(&b, 3, b"b").await.unwrap();
        tokio::fs::create_dir_all(temp_dir.path().join("chunks").join("not-a-session"))
            .await
            .unwrap();

        let mut listed = store.list_sessions().await.unwrap();
        listed.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(listed, expected);
    }
}
