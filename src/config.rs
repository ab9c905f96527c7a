//! Configuration management for the upload server

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::upload::{MAX_FILE_SIZE, REAPER_INTERVAL_SECS, SESSION_RETENTION_HOURS};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Where merged files land
    pub upload_dir: PathBuf,
    /// Where chunks wait to be merged
    pub chunk_dir: PathBuf,
    pub max_file_size: u64,
    pub session_retention_hours: i64,
    pub reaper_interval_secs: u64,
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid value for {var}: {value:?}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            upload: UploadConfig {
                upload_dir: PathBuf::from("./uploads"),
                chunk_dir: PathBuf::from("./uploads/.chunks"),
                max_file_size: MAX_FILE_SIZE,
                session_retention_hours: SESSION_RETENTION_HOURS,
                reaper_interval_secs: REAPER_INTERVAL_SECS,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_var("SERVER_PORT", defaults.server.port)?,
            },
            upload: UploadConfig {
                upload_dir: env::var("UPLOAD_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.upload.upload_dir),
                chunk_dir: env::var("CHUNK_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.upload.chunk_dir),
                max_file_size: parse_var("MAX_FILE_SIZE", defaults.upload.max_file_size)?,
                session_retention_hours: parse_var(
                    "SESSION_RETENTION_HOURS",
                    defaults.upload.session_retention_hours,
                )?,
                reaper_interval_secs: parse_var(
                    "REAPER_INTERVAL_SECS",
                    defaults.upload.reaper_interval_secs,
                )?,
            },
        })
    }
}

fn parse_var<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError { var, value }),
        Err(_) => Ok(default),
    }
}
