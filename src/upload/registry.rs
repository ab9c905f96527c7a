//! Session Registry
//!
//! Process-wide table of upload sessions:
//! - Outer map guarded by an async `RwLock`, written only on create/delete
//! - One mutex per session, so unrelated sessions never contend
//! - `transition` is the single path through which session state changes

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::RwLock;

use super::types::{
    NewSession, SessionId, SessionStatus, StartUploadRequest, UploadError, UploadSession,
    MAX_FILE_NAME_BYTES,
};

struct Slot {
    session: UploadSession,
    /// Set once the session is deleted; late transitions see it as gone
    removed: bool,
}

type SessionEntry = Arc<Mutex<Slot>>;

// ============================================================================
// Session Registry
// ============================================================================

/// Registry of upload sessions
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,

    /// Directory merged files are written to
    upload_dir: PathBuf,

    /// Largest declared file size accepted at creation
    max_file_size: u64,
}

impl SessionRegistry {
    pub fn new(upload_dir: PathBuf, max_file_size: u64) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: RwLock::new(HashMap::new()),
                upload_dir,
                max_file_size,
            }),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.inner.upload_dir
    }

    // ========================================================================
    // Session Lifecycle
    // ========================================================================

    /// Validate a start request and register a new session
    pub async fn create(&self, request: &StartUploadRequest) -> Result<UploadSession, UploadError> {
        let meta = validate_start(request, self.inner.max_file_size)?;

        let session = {
            let mut sessions = self.inner.sessions.write().await;

            // 128 random bits make a collision astronomically unlikely; re-draw anyway
            let mut id = SessionId::generate();
            while sessions.contains_key(&id) {
                tracing::warn!(session_id = %id, "Session identifier collision, re-drawing");
                id = SessionId::generate();
            }

            let final_path = self
                .inner
                .upload_dir
                .join(format!("{}-{}", id.short(), meta.file_name));
            let session = UploadSession::new(id.clone(), meta, final_path);

            sessions.insert(
                id,
                Arc::new(Mutex::new(Slot {
                    session: session.clone(),
                    removed: false,
                })),
            );
            session
        };

        tracing::info!(
            session_id = %session.id,
            file_name = %session.file_name,
            file_size = session.file_size,
            total_chunks = session.total_chunks,
            "Created upload session"
        );

        Ok(session)
    }

    /// Snapshot of a session
    pub async fn get(&self, id: &SessionId) -> Result<UploadSession, UploadError> {
        let entry = self.entry(id).await?;
        let slot = entry.lock();
        if slot.removed {
            return Err(UploadError::SessionNotFound(id.to_string()));
        }
        Ok(slot.session.clone())
    }

    /// Atomically apply `mutation` if `predicate` accepts the current state.
    ///
    /// The predicate's error is returned unchanged and the session is left
    /// untouched. On success `updated_at` is bumped.
    pub async fn transition<P, M, T>(
        &self,
        id: &SessionId,
        predicate: P,
        mutation: M,
    ) -> Result<T, UploadError>
    where
        P: FnOnce(&UploadSession) -> Result<(), UploadError>,
        M: FnOnce(&mut UploadSession) -> T,
    {
        let entry = self.entry(id).await?;
        let mut slot = entry.lock();
        if slot.removed {
            return Err(UploadError::SessionNotFound(id.to_string()));
        }

        predicate(&slot.session)?;
        let output = mutation(&mut slot.session);
        slot.session.updated_at = Utc::now();

        Ok(output)
    }

    /// Move a non-terminal session to `Failed` after an unrecoverable I/O error
    pub async fn mark_failed(&self, id: &SessionId, reason: &str) -> Result<(), UploadError> {
        self.transition(
            id,
            |s| {
                if s.status.is_terminal() {
                    return Err(UploadError::InvalidState {
                        id: s.id.clone(),
                        status: s.status,
                        action: "fail",
                    });
                }
                Ok(())
            },
            |s| {
                s.status = SessionStatus::Failed;
                s.in_flight_chunks.clear();
                s.failure_reason = Some(reason.to_string());
            },
        )
        .await?;

        tracing::error!(session_id = %id, reason = %reason, "Upload session failed");
        Ok(())
    }

    /// Remove a session's bookkeeping. Refused while a merge is running.
    pub async fn delete(&self, id: &SessionId) -> Result<UploadSession, UploadError> {
        let session = {
            let mut sessions = self.inner.sessions.write().await;
            let entry = sessions
                .get(id)
                .cloned()
                .ok_or_else(|| UploadError::SessionNotFound(id.to_string()))?;

            let mut slot = entry.lock();
            if slot.session.status == SessionStatus::Completing {
                return Err(UploadError::InvalidState {
                    id: id.clone(),
                    status: slot.session.status,
                    action: "delete",
                });
            }

            slot.removed = true;
            sessions.remove(id);
            slot.session.clone()
        };

        tracing::info!(
            session_id = %id,
            file_name = %session.file_name,
            status = %session.status,
            "Upload session deleted"
        );

        Ok(session)
    }

    // ========================================================================
    // Query Methods
    // ========================================================================

    /// Snapshot of every session
    pub async fn list(&self) -> Vec<UploadSession> {
        let entries: Vec<SessionEntry> = {
            let sessions = self.inner.sessions.read().await;
            sessions.values().cloned().collect()
        };

        entries
            .iter()
            .filter_map(|entry| {
                let slot = entry.lock();
                (!slot.removed).then(|| slot.session.clone())
            })
            .collect()
    }

    pub async fn contains(&self, id: &SessionId) -> bool {
        self.inner.sessions.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn entry(&self, id: &SessionId) -> Result<SessionEntry, UploadError> {
        let sessions = self.inner.sessions.read().await;
        sessions
            .get(id)
            .cloned()
            .ok_or_else(|| UploadError::SessionNotFound(id.to_string()))
    }
}

// ============================================================================
// Validation
// ============================================================================

fn validate_start(request: &StartUploadRequest, max_file_size: u64) -> Result<NewSession, UploadError> {
    let raw_name = request
        .file_name
        .as_deref()
        .filter(|name| !name.trim().is_empty())
        .ok_or(UploadError::MissingField("fileName"))?;
    let file_size = request.file_size.ok_or(UploadError::MissingField("fileSize"))?;
    let file_type = request
        .file_type
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .ok_or(UploadError::MissingField("fileType"))?;
    let total_chunks = request
        .total_chunks
        .ok_or(UploadError::MissingField("totalChunks"))?;

    if total_chunks == 0 {
        return Err(UploadError::InvalidField {
            field: "totalChunks",
            reason: "must be at least 1".to_string(),
        });
    }

    if file_size > max_file_size {
        return Err(UploadError::FileTooLarge {
            size: file_size,
            max: max_file_size,
        });
    }

    let file_name = sanitize_file_name(raw_name).ok_or_else(|| UploadError::InvalidField {
        field: "fileName",
        reason: format!("{:?} is not a usable file name", raw_name),
    })?;

    if file_name.len() > MAX_FILE_NAME_BYTES {
        return Err(UploadError::InvalidField {
            field: "fileName",
            reason: format!(
                "{} bytes exceeds the {} byte limit",
                file_name.len(),
                MAX_FILE_NAME_BYTES
            ),
        });
    }

    Ok(NewSession {
        file_name,
        file_size,
        file_type: file_type.trim().to_string(),
        total_chunks,
    })
}

/// Reduce a client-declared name to a bare file name safe to join onto the
/// upload directory
fn sanitize_file_name(raw: &str) -> Option<String> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw).trim();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_control() { '_' } else { c })
        .collect();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return None;
    }
    Some(cleaned)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::upload::types::MAX_FILE_SIZE;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(PathBuf::from("/tmp/uploads"), MAX_FILE_SIZE)
    }

    fn request(total_chunks: u32) -> StartUploadRequest {
        StartUploadRequest::new("video.mp4", 4096, "video/mp4", total_chunks)
    }

    #[tokio::test]
    async fn test_create_session() {
        let registry = registry();
        let session = registry.create(&request(3)).await.unwrap();

        assert_eq!(session.file_name, "video.mp4");
        assert_eq!(session.total_chunks, 3);
        assert_eq!(session.status, SessionStatus::Created);
        assert!(session.received_chunks.is_empty());
        assert!(session.final_path.starts_with("/tmp/uploads"));
        assert!(session.final_path.to_string_lossy().ends_with("video.mp4"));
    }

    #[tokio::test]
    async fn test_create_rejects_missing_fields() {
        let registry = registry();

        let mut req = request(2);
        req.file_name = None;
        assert!(matches!(
            registry.create(&req).await,
            Err(UploadError::MissingField("fileName"))
        ));

        let mut req = request(2);
        req.total_chunks = None;
        assert!(matches!(
            registry.create(&req).await,
            Err(UploadError::MissingField("totalChunks"))
        ));

        let mut req = request(2);
        req.file_type = Some("   ".to_string());
        assert!(matches!(
            registry.create(&req).await,
            Err(UploadError::MissingField("fileType"))
        ));

        assert!(matches!(
            registry.create(&request(0)).await,
            Err(UploadError::InvalidField { field: "totalChunks", .. })
        ));

        let mut req = request(2);
        req.file_size = Some(MAX_FILE_SIZE + 1);
        assert!(matches!(
            registry.create(&req).await,
            Err(UploadError::FileTooLarge { .. })
        ));

        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_file_name_is_sanitized() {
        let registry = registry();
        let req = StartUploadRequest::new("../../etc/passwd", 10, "text/plain", 1);
        let session = registry.create(&req).await.unwrap();
        assert_eq!(session.file_name, "passwd");
        assert_eq!(session.final_path.parent(), Some(Path::new("/tmp/uploads")));

        let req = StartUploadRequest::new("dir/..", 10, "text/plain", 1);
        assert!(registry.create(&req).await.is_err());
    }

    #[tokio::test]
    async fn test_file_name_length_limit() {
        let registry = registry();

        let at_limit = "a".repeat(MAX_FILE_NAME_BYTES);
        let session = registry
            .create(&StartUploadRequest::new(&at_limit, 10, "text/plain", 1))
            .await
            .unwrap();
        let stored = session.final_path.file_name().unwrap().len();
        assert!(stored + ".".len() + ".part".len() <= 255);

        let too_long = "a".repeat(250);
        assert!(matches!(
            registry.create(&StartUploadRequest::new(&too_long, 10, "text/plain", 1)).await,
            Err(UploadError::InvalidField { field: "fileName", .. })
        ));

        // Multi-byte names are measured in bytes
        let wide = "é".repeat(MAX_FILE_NAME_BYTES / 2 + 1);
        assert!(matches!(
            registry.create(&StartUploadRequest::new(&wide, 10, "text/plain", 1)).await,
            Err(UploadError::InvalidField { field: "fileName", .. })
        ));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_identifiers_are_unique() {
        let registry = registry();
        let mut seen = HashSet::new();
        for _ in 0..200 {
            let session = registry.create(&request(1)).await.unwrap();
            assert!(seen.insert(session.id));
        }
        assert_eq!(registry.len().await, 200);
    }

    #[tokio::test]
    async fn test_get_unknown_session() {
        let registry = registry();
        let result = registry.get(&SessionId::generate()).await;
        assert!(matches!(result, Err(UploadError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_transition_rejected_leaves_state_untouched() {
        let registry = registry();
        let session = registry.create(&request(2)).await.unwrap();

        let result = registry
            .transition(
                &session.id,
                |s| {
                    Err(UploadError::InvalidState {
                        id: s.id.clone(),
                        status: s.status,
                        action: "test",
                    })
                },
                |s| s.status = SessionStatus::Failed,
            )
            .await;
        assert!(matches!(result, Err(UploadError::InvalidState { .. })));

        let current = registry.get(&session.id).await.unwrap();
        assert_eq!(current.status, SessionStatus::Created);
        assert_eq!(current.updated_at, session.updated_at);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_transitions_are_not_lost() {
        let registry = registry();
        let session = registry.create(&request(64)).await.unwrap();

        let mut handles = Vec::new();
        for n in 1..=64u32 {
            let registry = registry.clone();
            let id = session.id.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .transition(&id, |_| Ok(()), |s| s.received_chunks.insert(n))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        let current = registry.get(&session.id).await.unwrap();
        assert_eq!(current.received_chunks.len(), 64);
        assert!(current.is_complete());
    }

    #[tokio::test]
    async fn test_delete_session() {
        let registry = registry();
        let session = registry.create(&request(2)).await.unwrap();

        registry.delete(&session.id).await.unwrap();

        assert!(registry.get(&session.id).await.is_err());
        assert!(matches!(
            registry.delete(&session.id).await,
            Err(UploadError::SessionNotFound(_))
        ));
        assert!(matches!(
            registry.transition(&session.id, |_| Ok(()), |_| ()).await,
            Err(UploadError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_refused_while_completing() {
        let registry = registry();
        let session = registry.create(&request(1)).await.unwrap();
        registry
            .transition(&session.id, |_| Ok(()), |s| s.status = SessionStatus::Completing)
            .await
            .unwrap();

        assert!(matches!(
            registry.delete(&session.id).await,
            Err(UploadError::InvalidState { action: "delete", .. })
        ));
        assert!(registry.contains(&session.id).await);
    }
}
