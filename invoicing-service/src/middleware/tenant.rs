//! Workspace context extracted from request headers.
//!
//! The gateway in front of this service authenticates the user and sets
//! `X-Workspace-ID` and `X-User-ID`. Membership is checked per operation.

use crate::error::InvoicingError;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

pub const WORKSPACE_HEADER: &str = "X-Workspace-ID";
pub const USER_HEADER: &str = "X-User-ID";

/// Caller context for every invoicing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantContext {
    pub workspace_id: Uuid,
    /// Absent when the gateway forwarded an anonymous request.
    pub user_id: Option<Uuid>,
}

impl TenantContext {
    pub fn new(workspace_id: Uuid, user_id: Option<Uuid>) -> Self {
        Self {
            workspace_id,
            user_id,
        }
    }

    /// Authenticated user, or `Unauthorized`.
    pub fn user(&self) -> Result<Uuid, InvoicingError> {
        self.user_id.ok_or(InvoicingError::Unauthorized)
    }
}

fn parse_header(parts: &Parts, name: &str) -> Result<Option<Uuid>, AppError> {
    let Some(value) = parts.headers.get(name) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| AppError::BadRequest(anyhow::anyhow!("{} is not valid text", name)))?;
    Uuid::parse_str(value.trim())
        .map(Some)
        .map_err(|_| AppError::BadRequest(anyhow::anyhow!("{} must be a UUID", name)))
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let workspace_id = parse_header(parts, WORKSPACE_HEADER)?.ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!("Missing {} header", WORKSPACE_HEADER))
        })?;
        let user_id = parse_header(parts, USER_HEADER)?;

        let span = tracing::Span::current();
        span.record("workspace_id", tracing::field::display(workspace_id));
        if let Some(uid) = user_id {
            span.record("user_id", tracing::field::display(uid));
        }

        Ok(TenantContext::new(workspace_id, user_id))
    }
}
