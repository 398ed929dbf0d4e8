use crate::Field;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeskError {
    #[error("missing required field: {field}")]
    MissingRequiredField { field: Field },
    #[error("invalid {field}: {reason}")]
    InvalidField { field: Field, reason: String },
    #[error("unknown field: {0}")]
    UnknownField(String),
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("no authenticated session")]
    Unauthorized,
    #[error("administrator privilege required to {action}")]
    PermissionDenied { action: &'static str },
    #[error("record not found: {id}")]
    NotFound { id: String },
    #[error("operation failed: {0}")]
    OperationFailed(String),
    #[error("edit discarded: {0}")]
    StaleEdit(String),
}

impl DeskError {
    /// Input problems the user can fix by correcting what they submitted.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DeskError::MissingRequiredField { .. }
                | DeskError::InvalidField { .. }
                | DeskError::UnknownField(_)
                | DeskError::InvalidFilter(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, DeskError::OperationFailed(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            DeskError::MissingRequiredField { .. } => "missing_required_field",
            DeskError::InvalidField { .. } => "invalid_field",
            DeskError::UnknownField(_) => "unknown_field",
            DeskError::InvalidFilter(_) => "invalid_filter",
            DeskError::Unauthorized => "unauthorized",
            DeskError::PermissionDenied { .. } => "permission_denied",
            DeskError::NotFound { .. } => "not_found",
            DeskError::OperationFailed(_) => "operation_failed",
            DeskError::StaleEdit(_) => "stale_edit",
        }
    }
}
