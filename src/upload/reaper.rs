//! Session Reaper
//!
//! Retention policy for abandoned uploads:
//! - Sessions untouched for longer than the retention window are purged
//!   (bookkeeping and leftover chunks; merged files are kept)
//! - Sessions mid-merge are never touched
//! - Chunk directories with no registry entry are deleted

use std::time::Duration;

use chrono::Utc;

use super::chunk_store::ChunkStore;
use super::registry::SessionRegistry;
use super::types::{ErrorKind, SessionStatus, UploadError};

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub sessions_reaped: usize,
    pub chunks_deleted: usize,
    pub orphaned_dirs: usize,
}

#[derive(Clone)]
pub struct SessionReaper {
    registry: SessionRegistry,
    chunk_store: ChunkStore,
    retention: chrono::Duration,
    interval: Duration,
}

impl SessionReaper {
    pub fn new(
        registry: SessionRegistry,
        chunk_store: ChunkStore,
        retention: chrono::Duration,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            chunk_store,
            retention,
            interval,
        }
    }

    /// Run one retention pass
    pub async fn sweep(&self) -> Result<SweepStats, UploadError> {
        let cutoff = Utc::now() - self.retention;
        let mut stats = SweepStats::default();

        for session in self.registry.list().await {
            if session.status == SessionStatus::Completing || session.updated_at >= cutoff {
                continue;
            }

            match self.registry.delete(&session.id).await {
                Ok(_) => {}
                // Touched or latched since the snapshot was taken
                Err(e) if matches!(e.kind(), ErrorKind::Conflict | ErrorKind::NotFound) => continue,
                Err(e) => return Err(e),
            }

            stats.sessions_reaped += 1;
            stats.chunks_deleted += self.chunk_store.delete_session_chunks(&session.id).await?;

            tracing::debug!(
                session_id = %session.id,
                status = %session.status,
                "Reaped stale upload session"
            );
        }

        for id in self.chunk_store.list_sessions().await? {
            if self.registry.contains(&id).await {
                continue;
            }
            stats.chunks_deleted += self.chunk_store.delete_session_chunks(&id).await?;
            stats.orphaned_dirs += 1;
        }

        if stats != SweepStats::default() {
            tracing::info!(
                sessions = stats.sessions_reaped,
                chunks = stats.chunks_deleted,
                orphaned_dirs = stats.orphaned_dirs,
                "Cleaned up stale uploads"
            );
        }

        Ok(stats)
    }

    /// Start background cleanup task
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);

            loop {
                interval.tick().await;
                if let Err(e) = self.sweep().await {
                    tracing::warn!(error = %e, "Upload reaper sweep failed");
                }
            }
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
