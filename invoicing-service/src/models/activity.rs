//! Audit trail and user notification records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audit action tags.
pub mod actions {
    pub const INVOICE_CREATED: &str = "invoice.created";
    pub const INVOICE_UPDATED: &str = "invoice.updated";
    pub const INVOICE_DELETED: &str = "invoice.deleted";
    pub const INVOICE_STATUS_CHANGED: &str = "invoice.status_changed";
    pub const INVOICE_SENT: &str = "invoice.sent";
    pub const PAYMENT_RECORDED: &str = "payment.recorded";
}

/// Append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub activity_id: Uuid,
    pub workspace_id: Uuid,
    pub project_id: Option<Uuid>,
    pub actor_id: Uuid,
    pub action: String,
    pub details: String,
    pub invoice_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
}

impl ActivityEntry {
    pub fn new(
        workspace_id: Uuid,
        project_id: Option<Uuid>,
        actor_id: Uuid,
        action: &str,
        details: impl Into<String>,
        invoice_id: Option<Uuid>,
    ) -> Self {
        Self {
            activity_id: Uuid::new_v4(),
            workspace_id,
            project_id,
            actor_id,
            action: action.to_string(),
            details: details.into(),
            invoice_id,
            created_utc: Utc::now(),
        }
    }
}

/// Message shown to one user of a workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub notification_id: Uuid,
    pub workspace_id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub message: String,
    pub invoice_id: Option<Uuid>,
    pub read: bool,
    pub created_utc: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        workspace_id: Uuid,
        user_id: Uuid,
        title: impl Into<String>,
        message: impl Into<String>,
        invoice_id: Option<Uuid>,
    ) -> Self {
        Self {
            notification_id: Uuid::new_v4(),
            workspace_id,
            user_id,
            title: title.into(),
            message: message.into(),
            invoice_id,
            read: false,
            created_utc: Utc::now(),
        }
    }
}
