//! Resumable Chunked Upload Module
//!
//! Implements reliable large file uploads with:
//! - Out-of-order chunk submission with duplicate detection
//! - Pause/resume of individual sessions
//! - Exactly-once, ordered reassembly once every chunk has arrived
//!
//! Protocol Flow:
//! 1. Client starts a session with file metadata and a chunk count
//! 2. Client uploads chunks `1..=totalChunks` in any order
//! 3. The submission that completes the set merges the file
//! 4. Client polls status, pausing and resuming as needed

pub mod chunk_store;
pub mod controller;
pub mod merger;
pub mod reaper;
pub mod receiver;
pub mod registry;
pub mod service;
pub mod types;

pub use chunk_store::{ChunkReader, ChunkStorage, ChunkStore, LocalChunkStorage};
pub use controller::SessionController;
pub use merger::Merger;
pub use reaper::{SessionReaper, SweepStats};
pub use receiver::ChunkReceiver;
pub use registry::SessionRegistry;
pub use service::UploadService;
pub use types::*;
