//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::upload::UploadService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    uploads: UploadService,
}

impl AppState {
    /// Create application state with local chunk storage
    pub fn new(config: Config) -> Self {
        let uploads = UploadService::from_config(&config.upload);
        Self::with_uploads(config, uploads)
    }

    /// Create application state around an existing upload service
    pub fn with_uploads(config: Config, uploads: UploadService) -> Self {
        Self {
            inner: Arc::new(AppStateInner { config, uploads }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the upload service
    pub fn uploads(&self) -> &UploadService {
        &self.inner.uploads
    }
}
