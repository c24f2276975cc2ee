//! Error types for the compilation engine.

use kiln_store::{ResourceKind, StoreError};
use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised while compiling templates into manifests.
///
/// Resource-scoped errors are collected into the failure list of a
/// compilation; every other variant aborts the whole instantiation.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("Invalid variable name '{0}'")]
    InvalidVariableName(String),

    #[error("Template {kind}/{name} is corrupt: {message}")]
    TemplateCorrupt {
        kind: ResourceKind,
        name: String,
        message: String,
    },

    #[error("{kind}/{name}: field {field} must be a number or percentage, got '{value}'")]
    NumericCoercion {
        kind: ResourceKind,
        name: String,
        field: String,
        value: String,
    },

    #[error("Permission denied: {actor} may not instantiate {template_group}")]
    PermissionDenied {
        actor: String,
        template_group: String,
    },

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Compilation cancelled")]
    Cancelled,

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl EngineError {
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn corrupt(kind: ResourceKind, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TemplateCorrupt {
            kind,
            name: name.into(),
            message: message.into(),
        }
    }

    /// Whether the error belongs to a single resource and must not block its
    /// siblings.
    pub fn is_resource_scoped(&self) -> bool {
        matches!(self, Self::TemplateCorrupt { .. } | Self::NumericCoercion { .. })
    }

    /// Stable name of the error class, as reported in failure entries.
    pub fn class(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NotFound",
            Self::InvalidVariableName(_) => "InvalidVariableName",
            Self::TemplateCorrupt { .. } => "TemplateCorrupt",
            Self::NumericCoercion { .. } => "NumericCoercionError",
            Self::PermissionDenied { .. } => "PermissionDenied",
            Self::Collaborator(_) => "Collaborator",
            Self::Cancelled => "Cancelled",
            Self::Store(_) => "Store",
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound {
                entity: entity.to_string(),
                id,
            },
            other => Self::Store(other),
        }
    }
}
