//! Error taxonomy for invoice and payment operations.

use crate::models::InvalidTransition;
use crate::services::metrics::ERRORS_TOTAL;
use service_core::error::AppError;
use thiserror::Error;

/// Failure of an invoicing operation.
///
/// Validation and permission failures are raised before any mutation.
/// `DependencyFailure` (mailer, renderer) never implies that the invoice
/// itself failed to persist.
#[derive(Debug, Error)]
pub enum InvoicingError {
    #[error("Caller identity is missing")]
    Unauthorized,

    #[error("Missing capability '{0}' in this workspace")]
    PermissionDenied(String),

    #[error("{0}")]
    ValidationFailed(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("{0}")]
    Conflict(String),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(anyhow::Error),

    #[error("Dependency failure: {0}")]
    DependencyFailure(String),
}

impl InvoicingError {
    /// Label used for the error counter.
    pub fn kind(&self) -> &'static str {
        match self {
            InvoicingError::Unauthorized => "unauthorized",
            InvoicingError::PermissionDenied(_) => "permission_denied",
            InvoicingError::ValidationFailed(_) => "validation_failed",
            InvoicingError::NotFound(_) => "not_found",
            InvoicingError::InvalidTransition(_) => "invalid_transition",
            InvoicingError::Conflict(_) => "conflict",
            InvoicingError::PersistenceFailure(_) => "persistence_failure",
            InvoicingError::DependencyFailure(_) => "dependency_failure",
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        InvoicingError::ValidationFailed(message.into())
    }
}

impl From<validator::ValidationErrors> for InvoicingError {
    fn from(errors: validator::ValidationErrors) -> Self {
        InvoicingError::ValidationFailed(errors.to_string())
    }
}

impl From<sqlx::Error> for InvoicingError {
    fn from(err: sqlx::Error) -> Self {
        InvoicingError::PersistenceFailure(anyhow::Error::new(err))
    }
}

impl From<InvoicingError> for AppError {
    fn from(err: InvoicingError) -> Self {
        ERRORS_TOTAL.with_label_values(&[err.kind()]).inc();

        match err {
            InvoicingError::Unauthorized => {
                AppError::Unauthorized(anyhow::anyhow!("Missing X-User-ID header"))
            }
            InvoicingError::PermissionDenied(capability) => AppError::Forbidden(anyhow::anyhow!(
                "Missing capability '{}' in this workspace",
                capability
            )),
            InvoicingError::ValidationFailed(msg) => AppError::InvalidInput(anyhow::anyhow!(msg)),
            InvoicingError::NotFound(entity) => {
                AppError::NotFound(anyhow::anyhow!("{} not found", entity))
            }
            InvoicingError::InvalidTransition(t) => AppError::Conflict(anyhow::Error::new(t)),
            InvoicingError::Conflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            InvoicingError::PersistenceFailure(e) => AppError::DatabaseError(e),
            InvoicingError::DependencyFailure(msg) => AppError::BadGateway(msg),
        }
    }
}
