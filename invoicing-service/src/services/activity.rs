//! Fire-and-forget audit trail and user notifications.

use crate::error::InvoicingError;
use crate::models::{ActivityEntry, Notification};
use crate::services::store::InvoiceStore;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Destination for audit entries and notifications.
#[async_trait]
pub trait ActivitySink: Send + Sync {
    async fn append(&self, entry: ActivityEntry) -> Result<(), InvoicingError>;

    async fn notify(&self, notification: Notification) -> Result<(), InvoicingError>;
}

/// Writes to the same store as the invoices.
pub struct StoreActivitySink {
    store: Arc<dyn InvoiceStore>,
}

impl StoreActivitySink {
    pub fn new(store: Arc<dyn InvoiceStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ActivitySink for StoreActivitySink {
    async fn append(&self, entry: ActivityEntry) -> Result<(), InvoicingError> {
        self.store.append_activity(&entry).await
    }

    async fn notify(&self, notification: Notification) -> Result<(), InvoicingError> {
        self.store.append_notification(&notification).await
    }
}

/// Append an audit entry, logging instead of failing.
///
/// The mutation it describes has already been committed.
pub async fn record(sink: &dyn ActivitySink, entry: ActivityEntry) {
    let action = entry.action.clone();
    let workspace_id = entry.workspace_id;
    if let Err(e) = sink.append(entry).await {
        warn!(%workspace_id, action = %action, error = %e, "Failed to append activity entry");
    }
}

/// Deliver a notification, logging instead of failing.
pub async fn notify(sink: &dyn ActivitySink, notification: Notification) {
    let user_id = notification.user_id;
    if let Err(e) = sink.notify(notification).await {
        warn!(%user_id, error = %e, "Failed to store notification");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    struct FailingSink;

    #[async_trait]
    impl ActivitySink for FailingSink {
        async fn append(&self, _entry: ActivityEntry) -> Result<(), InvoicingError> {
            Err(InvoicingError::PersistenceFailure(anyhow::anyhow!("down")))
        }

        async fn notify(&self, _notification: Notification) -> Result<(), InvoicingError> {
            Err(InvoicingError::PersistenceFailure(anyhow::anyhow!("down")))
        }
    }

    #[tokio::test]
    async fn sink_failures_are_swallowed() {
        let ws = Uuid::new_v4();
        record(
            &FailingSink,
            ActivityEntry::new(ws, None, Uuid::new_v4(), "invoice.created", "", None),
        )
        .await;
        notify(
            &FailingSink,
            Notification::new(ws, Uuid::new_v4(), "Invoice paid", "", None),
        )
        .await;
    }
}
