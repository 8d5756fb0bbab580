//! Error types for invitation construction and ingestion.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InvitationError {
    /// A local resource the request depends on does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller-supplied construction input is malformed.
    #[error("Invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    /// A received invitation is malformed.
    #[error("Malformed invitation field {field}: {reason}")]
    Parse { field: String, reason: String },

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("Core error: {0}")]
    Core(#[from] oob_core::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl InvitationError {
    pub(crate) fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn parse(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Validation { .. } => "validation_error",
            Self::Parse { .. } => "parse_error",
            Self::Collaborator(_) => "collaborator_error",
            Self::Core(_) | Self::Serialization(_) => "internal_error",
        }
    }

    /// The offending field, for validation and parse failures.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Validation { field, .. } | Self::Parse { field, .. } => Some(field),
            _ => None,
        }
    }

    /// Whether the caller can fix the request and try again.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::Validation { .. } | Self::Parse { .. }
        )
    }
}

/// Failure reported by an injected collaborator (store, initiator, handler).
///
/// Opaque to this crate: it is never retried here, only passed on.
#[derive(Debug, Error)]
#[error("{collaborator} failed: {message}")]
pub struct CollaboratorError {
    pub collaborator: &'static str,
    pub message: String,
}

impl CollaboratorError {
    pub fn new(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self {
            collaborator,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, InvitationError>;
