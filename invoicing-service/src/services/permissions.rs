//! Capability checks against workspace membership.

use crate::error::InvoicingError;
use crate::models::Role;
use crate::services::store::InvoiceStore;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Invoicing service capabilities.
pub mod capabilities {
    /// Create invoices.
    pub const INVOICE_CREATE: &str = "invoicing.invoice:create";

    /// Read invoices, their documents and the activity trail.
    pub const INVOICE_READ: &str = "invoicing.invoice:read";

    /// Update invoices, change their status and send them.
    pub const INVOICE_UPDATE: &str = "invoicing.invoice:update";

    /// Delete invoices.
    pub const INVOICE_DELETE: &str = "invoicing.invoice:delete";

    /// Read payments.
    pub const PAYMENT_READ: &str = "invoicing.payment:read";
}

use capabilities::*;

/// Capabilities granted to a role.
pub fn role_capabilities(role: Role) -> &'static [&'static str] {
    match role {
        Role::Owner | Role::Admin => &[
            INVOICE_CREATE,
            INVOICE_READ,
            INVOICE_UPDATE,
            INVOICE_DELETE,
            PAYMENT_READ,
        ],
        Role::Member => &[
            INVOICE_CREATE,
            INVOICE_READ,
            INVOICE_UPDATE,
            PAYMENT_READ,
        ],
        Role::Viewer => &[INVOICE_READ, PAYMENT_READ],
    }
}

/// Answer from the permission collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionDecision {
    pub is_allowed: bool,
    pub role: Option<Role>,
    /// First requested capability the caller lacks.
    pub missing: Option<String>,
}

/// Decides whether a user holds capabilities in a workspace.
#[async_trait]
pub trait PermissionChecker: Send + Sync {
    /// An empty capability list checks membership only.
    async fn check_permissions(
        &self,
        user_id: Uuid,
        workspace_id: Uuid,
        capabilities: &[&str],
    ) -> Result<PermissionDecision, InvoicingError>;
}

/// Resolves capabilities from the caller's workspace role.
pub struct MembershipPermissions {
    store: Arc<dyn InvoiceStore>,
}

impl MembershipPermissions {
    pub fn new(store: Arc<dyn InvoiceStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PermissionChecker for MembershipPermissions {
    async fn check_permissions(
        &self,
        user_id: Uuid,
        workspace_id: Uuid,
        capabilities: &[&str],
    ) -> Result<PermissionDecision, InvoicingError> {
        let role = self.store.member_role(workspace_id, user_id).await?;

        let Some(role) = role else {
            debug!(%user_id, %workspace_id, "Caller is not a workspace member");
            return Ok(PermissionDecision {
                is_allowed: false,
                role: None,
                missing: capabilities.first().map(|c| c.to_string()),
            });
        };

        let granted = role_capabilities(role);
        let missing = capabilities
            .iter()
            .copied()
            .find(|c| !granted.iter().any(|g| g == c))
            .map(str::to_string);

        Ok(PermissionDecision {
            is_allowed: missing.is_none(),
            role: Some(role),
            missing,
        })
    }
}

/// Fail with `PermissionDenied` unless the caller holds `capability`.
///
/// `None` checks membership only.
pub async fn require(
    checker: &dyn PermissionChecker,
    user_id: Uuid,
    workspace_id: Uuid,
    capability: Option<&str>,
) -> Result<Role, InvoicingError> {
    let requested: Vec<&str> = capability.into_iter().collect();
    let decision = checker
        .check_permissions(user_id, workspace_id, &requested)
        .await?;

    match (decision.is_allowed, decision.role) {
        (true, Some(role)) => Ok(role),
        _ => Err(InvoicingError::PermissionDenied(
            decision
                .missing
                .unwrap_or_else(|| "workspace membership".to_string()),
        )),
    }
}
