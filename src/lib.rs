//! Chunked Upload Server Library
//!
//! Resumable, pausable chunked uploads with ordered reassembly.
//! The server binary is in main.rs.
//!
//! # Modules
//!
//! - `upload`: session registry, chunk storage, receiver, merger and controller
//! - `routes`: axum HTTP surface
//! - `config`: environment-driven configuration

pub mod config;
pub mod routes;
pub mod state;
pub mod upload;
