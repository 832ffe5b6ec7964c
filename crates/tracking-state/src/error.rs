//! Error types for tracking-state

use thiserror::Error;

/// Errors that can occur in the tracking persistence layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Backend query or write failure
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),

    /// No tracking exists for the given downstream repo/branch
    #[error("Tracking not found: {repo}:{branch}")]
    TrackingNotFound { repo: String, branch: String },

    /// Stored row could not be mapped back to a domain value
    #[error("Invalid stored value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
