//! Top-level error taxonomy for the tracker service.

use tracking_state::StorageError;

use crate::config::ConfigError;
use crate::http::ApiError;

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// A hosting service rejected the configured token. Nothing is
    /// scheduled until the configuration is fixed.
    #[error("credentials rejected by {service}: {source}")]
    CredentialInvalid { service: String, source: ApiError },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("api error: {0}")]
    Api(#[from] ApiError),

    #[error("scheduler already started")]
    AlreadyStarted,
}

/// Result type for tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;
