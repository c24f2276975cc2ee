//! Error types for the store.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while reading or writing stored entities.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid variable key '{0}': must match [A-Za-z][A-Za-z0-9_-]{{0,63}}")]
    InvalidVariableKey(String),

    #[error("Variable key already in use: {0}")]
    DuplicateVariable(String),

    #[error("System variable '{0}' cannot be modified")]
    ImmutableVariable(String),

    #[error("Override target '{target}' does not match scope {scope} of variable '{key}'")]
    ScopeMismatch {
        key: String,
        scope: String,
        target: String,
    },

    #[error("Show version '{0}' has no earlier revision")]
    NoRevision(String),

    #[error("Invalid workspace at {path}: {message}")]
    InvalidWorkspace { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}
