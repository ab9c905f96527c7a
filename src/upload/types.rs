//! Upload types for resumable chunked sessions

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

/// Maximum declared file size: 100MB
pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Sessions untouched for this long are reaped
pub const SESSION_RETENTION_HOURS: i64 = 24;

/// Interval between reaper sweeps
pub const REAPER_INTERVAL_SECS: u64 = 300;

/// Longest sanitized file name, in bytes. The stored name gains a 13-byte id
/// prefix, and a leading dot plus `.part` while merging, and must stay
/// within NAME_MAX (255).
pub const MAX_FILE_NAME_BYTES: usize = 236;

/// Bytes of CSPRNG output per session identifier
const IDENTIFIER_BYTES: usize = 16;

// ============================================================================
// Session Identifier
// ============================================================================

/// Opaque, unguessable upload identifier (128 random bits, hex encoded)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Draw a fresh identifier from the operating system's CSPRNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; IDENTIFIER_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Parse a client-supplied identifier.
    ///
    /// A blank value is a validation error. Anything that is not a well-formed
    /// identifier cannot name a session, so it is reported as not found.
    pub fn parse(raw: &str) -> Result<Self, UploadError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(UploadError::MissingField("identifier"));
        }

        let well_formed = raw.len() == IDENTIFIER_BYTES * 2
            && raw.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if !well_formed {
            return Err(UploadError::SessionNotFound(raw.to_string()));
        }

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix used to keep merged file names unique
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Start Session Types
// ============================================================================

/// Request to start a chunked upload.
///
/// Every field is optional at the wire level so that a missing parameter is
/// reported as a validation error rather than a deserialization rejection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartUploadRequest {
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
    pub file_type: Option<String>,
    pub total_chunks: Option<u32>,
}

impl StartUploadRequest {
    pub fn new(
        file_name: impl Into<String>,
        file_size: u64,
        file_type: impl Into<String>,
        total_chunks: u32,
    ) -> Self {
        Self {
            file_name: Some(file_name.into()),
            file_size: Some(file_size),
            file_type: Some(file_type.into()),
            total_chunks: Some(total_chunks),
        }
    }
}

/// Response to a start request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartUploadResponse {
    pub identifier: SessionId,
    pub total_chunks: u32,
    pub status: SessionStatus,
}

// ============================================================================
// Chunk / Pause / Resume Types
// ============================================================================

/// Response after a chunk submission
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadResponse {
    pub identifier: SessionId,
    pub chunk_number: u32,
    pub received_chunks: Vec<u32>,
    pub total_chunks: u32,
    pub status: SessionStatus,
}

/// Response after pause or resume, for client reconciliation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStateResponse {
    pub identifier: SessionId,
    pub status: SessionStatus,
    pub received_chunks: Vec<u32>,
}

/// Read-only status report
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub identifier: SessionId,
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
    pub status: SessionStatus,
    pub received_chunks: Vec<u32>,
    pub missing_chunks: Vec<u32>,
    pub total_chunks: u32,
    pub bytes_received: u64,
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl From<&UploadSession> for StatusReport {
    fn from(session: &UploadSession) -> Self {
        Self {
            identifier: session.id.clone(),
            file_name: session.file_name.clone(),
            file_size: session.file_size,
            file_type: session.file_type.clone(),
            status: session.status,
            received_chunks: session.received_list(),
            missing_chunks: session.missing_chunks(),
            total_chunks: session.total_chunks,
            bytes_received: session.bytes_received,
            progress: session.progress(),
            created_at: session.created_at,
            updated_at: session.updated_at,
            failure_reason: session.failure_reason.clone(),
        }
    }
}

// ============================================================================
// Session Types
// ============================================================================

/// Validated metadata for a new session
#[derive(Debug, Clone)]
pub struct NewSession {
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
    pub total_chunks: u32,
}

/// Upload session state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    /// Unique session ID
    pub id: SessionId,

    /// Client-declared file name (sanitized to a bare name)
    pub file_name: String,

    /// Client-declared size in bytes
    pub file_size: u64,

    /// Client-declared MIME type
    pub file_type: String,

    /// Expected chunk count; chunks are numbered 1..=total_chunks
    pub total_chunks: u32,

    /// Chunk numbers whose payload is stored
    pub received_chunks: HashSet<u32>,

    /// Chunk numbers reserved by a submission still writing its payload
    pub in_flight_chunks: HashSet<u32>,

    /// Sum of received chunk lengths
    pub bytes_received: u64,

    /// Where the merged file is written
    pub final_path: PathBuf,

    pub status: SessionStatus,

    pub created_at: DateTime<Utc>,

    /// Bumped on every successful transition
    pub updated_at: DateTime<Utc>,

    /// Set when the session fails on I/O
    pub failure_reason: Option<String>,
}

impl UploadSession {
    /// Create a new upload session
    pub fn new(id: SessionId, meta: NewSession, final_path: PathBuf) -> Self {
        let now = Utc::now();

        Self {
            id,
            file_name: meta.file_name,
            file_size: meta.file_size,
            file_type: meta.file_type,
            total_chunks: meta.total_chunks,
            received_chunks: HashSet::new(),
            in_flight_chunks: HashSet::new(),
            bytes_received: 0,
            final_path,
            status: SessionStatus::Created,
            created_at: now,
            updated_at: now,
            failure_reason: None,
        }
    }

    /// Check if all chunks have been received
    pub fn is_complete(&self) -> bool {
        self.received_chunks.len() == self.total_chunks as usize
    }

    pub fn contains_chunk(&self, chunk_number: u32) -> bool {
        self.received_chunks.contains(&chunk_number) || self.in_flight_chunks.contains(&chunk_number)
    }

    /// Received chunk numbers in ascending order
    pub fn received_list(&self) -> Vec<u32> {
        let mut chunks: Vec<u32> = self.received_chunks.iter().copied().collect();
        chunks.sort_unstable();
        chunks
    }

    /// Chunk numbers that still need to be uploaded
    pub fn missing_chunks(&self) -> Vec<u32> {
        (1..=self.total_chunks)
            .filter(|n| !self.received_chunks.contains(n))
            .collect()
    }

    /// Calculate progress percentage
    pub fn progress(&self) -> f64 {
        if self.total_chunks == 0 {
            return 100.0;
        }
        (self.received_chunks.len() as f64 / self.total_chunks as f64) * 100.0
    }
}

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No chunks received yet
    Created,
    /// At least one chunk received
    InProgress,
    /// Chunk submissions are rejected until resumed
    Paused,
    /// Completion latch taken, merge running
    Completing,
    /// Merged file written
    Completed,
    /// Unrecoverable I/O error
    Failed,
}

impl SessionStatus {
    /// Whether chunk submissions are accepted in this state
    pub fn accepts_chunks(self) -> bool {
        matches!(self, Self::Created | Self::InProgress)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
            Self::Completing => "completing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Chunk Metadata
// ============================================================================

/// A stored chunk awaiting merge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub session_id: SessionId,
    pub chunk_number: u32,

    /// Storage path
    pub location: PathBuf,

    /// Size in bytes
    pub size: u64,

    pub stored_at: DateTime<Utc>,
}

/// A merged file in the upload directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFile {
    pub name: String,
    pub size: u64,
}

// ============================================================================
// Error Types
// ============================================================================

/// Error classification shared by every upload error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Io,
}

/// Upload error types
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Missing required parameter: {0}")]
    MissingField(&'static str),

    #[error("Invalid parameter {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("File too large: {size} bytes (max: {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Chunk number out of range: {chunk_number} (expected 1..={total_chunks})")]
    ChunkOutOfRange { chunk_number: u32, total_chunks: u32 },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Chunk already uploaded: {0}")]
    ChunkAlreadyReceived(u32),

    #[error("Session is paused: {0}")]
    SessionPaused(SessionId),

    #[error("Invalid state transition for session {id}: {status} does not allow {action}")]
    InvalidState {
        id: SessionId,
        status: SessionStatus,
        action: &'static str,
    },

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Merge failed for session {id}: {reason}")]
    MergeFailed { id: SessionId, reason: String },
}

impl UploadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingField(_)
            | Self::InvalidField { .. }
            | Self::FileTooLarge { .. }
            | Self::ChunkOutOfRange { .. } => ErrorKind::Validation,
            Self::SessionNotFound(_) => ErrorKind::NotFound,
            Self::ChunkAlreadyReceived(_) | Self::SessionPaused(_) | Self::InvalidState { .. } => {
                ErrorKind::Conflict
            }
            Self::StorageError(_) | Self::MergeFailed { .. } => ErrorKind::Io,
        }
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            // Duplicate chunks are reported as a client error, not a conflict
            Self::ChunkAlreadyReceived(_) => StatusCode::BAD_REQUEST,
            _ => match self.kind() {
                ErrorKind::Validation => StatusCode::BAD_REQUEST,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Conflict => StatusCode::CONFLICT,
                ErrorKind::Io => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "MISSING_PARAMETER",
            Self::InvalidField { .. } => "INVALID_PARAMETER",
            Self::FileTooLarge { .. } => "FILE_TOO_LARGE",
            Self::ChunkOutOfRange { .. } => "CHUNK_OUT_OF_RANGE",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::ChunkAlreadyReceived(_) => "CHUNK_ALREADY_RECEIVED",
            Self::SessionPaused(_) => "SESSION_PAUSED",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::StorageError(_) => "STORAGE_ERROR",
            Self::MergeFailed { .. } => "MERGE_FAILED",
        }
    }
}

impl From<std::io::Error> for UploadError {
    fn from(e: std::io::Error) -> Self {
        Self::StorageError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_entropy_and_format() {
        let id = SessionId::generate();
        assert_eq!(id.as_str().len(), 32);
        assert!(SessionId::parse(id.as_str()).is_ok());
        assert_ne!(id, SessionId::generate());
    }

    #[test]
    fn test_identifier_parse_errors() {
        assert!(matches!(
            SessionId::parse("  "),
            Err(UploadError::MissingField("identifier"))
        ));
        assert!(matches!(
            SessionId::parse("../../etc/passwd"),
            Err(UploadError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_maps_to_bad_request() {
        let err = UploadError::ChunkAlreadyReceived(3);
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);

        let paused = UploadError::SessionPaused(SessionId::generate());
        assert_eq!(paused.status_code(), axum::http::StatusCode::CONFLICT);
    }

    #[test]
    fn test_missing_chunks() {
        let meta = NewSession {
            file_name: "a.bin".to_string(),
            file_size: 10,
            file_type: "application/octet-stream".to_string(),
            total_chunks: 4,
        };
        let mut session = UploadSession::new(SessionId::generate(), meta, PathBuf::from("a.bin"));
        session.received_chunks.extend([3, 1]);

        assert_eq!(session.received_list(), vec![1, 3]);
        assert_eq!(session.missing_chunks(), vec![2, 4]);
        assert_eq!(session.progress(), 50.0);
        assert!(!session.is_complete());
    }
}
