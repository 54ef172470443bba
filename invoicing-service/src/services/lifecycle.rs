//! Invoice lifecycle: create, edit, status changes, sending and reads.

use crate::error::InvoicingError;
use crate::middleware::TenantContext;
use crate::models::{
    actions, ActivityEntry, Invoice, InvoiceContent, InvoiceDetail, InvoiceInput, InvoiceStatus,
    ListInvoicesFilter, NewInvoice, Notification, SendInvoiceRequest, StatusChange, Transition,
};
use crate::services::activity::{self, ActivitySink};
use crate::services::document::{InvoiceRenderer, RenderedDocument};
use crate::services::mailer::{InvoiceEmail, InvoiceMailer};
use crate::services::metrics::{record_payment_metric, INVOICES_TOTAL};
use crate::services::permissions::{capabilities, require, PermissionChecker};
use crate::services::store::InvoiceStore;
use crate::services::totals::validate_invoice;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Default page size for audit and notification reads.
pub const FEED_LIMIT: i64 = 100;

/// Result of a successful send.
#[derive(Debug, Clone, Serialize)]
pub struct SendOutcome {
    pub invoice: Invoice,
    pub recipient: String,
    pub provider_id: Option<String>,
}

/// Coordinates invoice operations over the store and its collaborators.
pub struct InvoiceLifecycle {
    store: Arc<dyn InvoiceStore>,
    permissions: Arc<dyn PermissionChecker>,
    activity: Arc<dyn ActivitySink>,
    mailer: Arc<dyn InvoiceMailer>,
    renderer: Arc<dyn InvoiceRenderer>,
}

fn into_content(input: InvoiceInput, today: NaiveDate) -> Result<InvoiceContent, InvoicingError> {
    let totals = validate_invoice(&input, today)?;
    Ok(InvoiceContent {
        project_id: input.project_id,
        contractor_id: input.contractor_id,
        team_id: input.team_id,
        client_name: input.client_name.trim().to_string(),
        client_email: input.client_email,
        client_address: input.client_address,
        currency: input.currency,
        issue_date: input.issue_date.unwrap_or(today),
        due_date: input.due_date,
        tax_rate: input.tax_rate,
        totals,
        notes: input.notes,
        items: input.items,
    })
}

pub(crate) fn paid_notification(invoice: &Invoice) -> Notification {
    Notification::new(
        invoice.workspace_id,
        invoice.created_by,
        "Invoice paid",
        format!(
            "Invoice {} for {} has been paid in full.",
            invoice.invoice_number, invoice.client_name
        ),
        Some(invoice.invoice_id),
    )
}

impl InvoiceLifecycle {
    pub fn new(
        store: Arc<dyn InvoiceStore>,
        permissions: Arc<dyn PermissionChecker>,
        activity: Arc<dyn ActivitySink>,
        mailer: Arc<dyn InvoiceMailer>,
        renderer: Arc<dyn InvoiceRenderer>,
    ) -> Self {
        Self {
            store,
            permissions,
            activity,
            mailer,
            renderer,
        }
    }

    async fn authorize(
        &self,
        ctx: &TenantContext,
        capability: &str,
    ) -> Result<Uuid, InvoicingError> {
        let user_id = ctx.user()?;
        require(
            self.permissions.as_ref(),
            user_id,
            ctx.workspace_id,
            Some(capability),
        )
        .await?;
        Ok(user_id)
    }

    async fn audit(
        &self,
        invoice: &Invoice,
        actor_id: Uuid,
        action: &str,
        details: impl Into<String>,
    ) {
        activity::record(
            self.activity.as_ref(),
            ActivityEntry::new(
                invoice.workspace_id,
                invoice.project_id,
                actor_id,
                action,
                details,
                Some(invoice.invoice_id),
            ),
        )
        .await;
    }

    async fn detail(&self, invoice: Invoice) -> Result<InvoiceDetail, InvoicingError> {
        let items = self
            .store
            .line_items(invoice.workspace_id, invoice.invoice_id)
            .await?;
        let payments = self
            .store
            .payments(invoice.workspace_id, invoice.invoice_id)
            .await?;
        InvoiceDetail::new(invoice, items, payments)
    }

    async fn load(&self, ctx: &TenantContext, invoice_id: Uuid) -> Result<Invoice, InvoicingError> {
        self.store
            .get_invoice(ctx.workspace_id, invoice_id)
            .await?
            .ok_or(InvoicingError::NotFound("Invoice"))
    }

    /// Create a DRAFT invoice.
    #[instrument(skip(self, input), fields(workspace_id = %ctx.workspace_id))]
    pub async fn create_invoice(
        &self,
        ctx: &TenantContext,
        input: InvoiceInput,
    ) -> Result<InvoiceDetail, InvoicingError> {
        let user_id = self.authorize(ctx, capabilities::INVOICE_CREATE).await?;

        let now = Utc::now();
        let content = into_content(input, now.date_naive())?;
        let (invoice, items) = self
            .store
            .create_invoice(
                NewInvoice {
                    workspace_id: ctx.workspace_id,
                    created_by: user_id,
                    content,
                },
                now,
            )
            .await?;

        INVOICES_TOTAL.with_label_values(&["draft"]).inc();
        info!(
            invoice_id = %invoice.invoice_id,
            invoice_number = %invoice.invoice_number,
            grand_total = %invoice.grand_total,
            "Invoice created"
        );

        self.audit(
            &invoice,
            user_id,
            actions::INVOICE_CREATED,
            format!("Created invoice {}", invoice.invoice_number),
        )
        .await;

        InvoiceDetail::new(invoice, items, Vec::new())
    }

    /// Replace the editable fields and every line item of an invoice.
    #[instrument(skip(self, input), fields(workspace_id = %ctx.workspace_id, invoice_id = %invoice_id))]
    pub async fn update_invoice(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
        input: InvoiceInput,
    ) -> Result<InvoiceDetail, InvoicingError> {
        let user_id = self.authorize(ctx, capabilities::INVOICE_UPDATE).await?;

        let now = Utc::now();
        let content = into_content(input, now.date_naive())?;
        let (invoice, items) = self
            .store
            .replace_invoice(ctx.workspace_id, invoice_id, content, now)
            .await?
            .ok_or(InvoicingError::NotFound("Invoice"))?;

        info!(invoice_id = %invoice.invoice_id, items = items.len(), "Invoice updated");

        self.audit(
            &invoice,
            user_id,
            actions::INVOICE_UPDATED,
            format!("Updated invoice {}", invoice.invoice_number),
        )
        .await;

        let payments = self.store.payments(ctx.workspace_id, invoice_id).await?;
        InvoiceDetail::new(invoice, items, payments)
    }

    /// Move an invoice to `requested`, settling or un-settling its ledger.
    ///
    /// Repeating the current status is accepted and still audited.
    #[instrument(skip(self), fields(workspace_id = %ctx.workspace_id, invoice_id = %invoice_id))]
    pub async fn update_status(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
        requested: InvoiceStatus,
    ) -> Result<StatusChange, InvoicingError> {
        let user_id = self.authorize(ctx, capabilities::INVOICE_UPDATE).await?;

        let change = self
            .store
            .change_status(ctx.workspace_id, invoice_id, requested, user_id, Utc::now())
            .await?
            .ok_or(InvoicingError::NotFound("Invoice"))?;

        let invoice = &change.invoice;
        let previous = match change.transition {
            Transition::Changed { from, .. } => from,
            Transition::Unchanged { status } => status,
        };
        if change.transition.is_change() {
            let status = change.transition.status().as_str().to_ascii_lowercase();
            INVOICES_TOTAL.with_label_values(&[status.as_str()]).inc();
        }
        if let Some(payment) = &change.settlement {
            record_payment_metric(payment.source.as_str(), &invoice.currency, payment.amount);
        }

        info!(
            from = %previous,
            to = %change.transition.status(),
            settled = ?change.settlement.as_ref().map(|p| p.amount),
            removed_settlements = change.removed_settlements,
            "Invoice status updated"
        );

        self.audit(
            invoice,
            user_id,
            actions::INVOICE_STATUS_CHANGED,
            format!("{} -> {}", previous, change.transition.status()),
        )
        .await;

        if change.transition.became_paid() {
            activity::notify(self.activity.as_ref(), paid_notification(invoice)).await;
        }

        Ok(change)
    }

    /// Email the rendered invoice; a DRAFT becomes SENT once delivery succeeds.
    #[instrument(skip(self, request), fields(workspace_id = %ctx.workspace_id, invoice_id = %invoice_id))]
    pub async fn send_invoice(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
        request: SendInvoiceRequest,
    ) -> Result<SendOutcome, InvoicingError> {
        let user_id = self.authorize(ctx, capabilities::INVOICE_UPDATE).await?;
        request.validate()?;

        let invoice = self.load(ctx, invoice_id).await?;
        let recipient = request
            .recipient
            .or_else(|| invoice.client_email.clone())
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| {
                InvoicingError::validation("recipient is required when the invoice has no client_email")
            })?;

        let detail = self.detail(invoice).await?;
        let document = self
            .renderer
            .render(&detail)
            .await
            .map_err(|e| InvoicingError::DependencyFailure(e.to_string()))?;

        let inv = &detail.invoice;
        let email = InvoiceEmail {
            to: recipient.clone(),
            subject: format!("Invoice {}", inv.invoice_number),
            body_text: match inv.due_date {
                Some(due) => format!(
                    "Please find attached invoice {} for {:.2} {}, due {}.",
                    inv.invoice_number, inv.grand_total, inv.currency, due
                ),
                None => format!(
                    "Please find attached invoice {} for {:.2} {}.",
                    inv.invoice_number, inv.grand_total, inv.currency
                ),
            },
            attachment_name: document.file_name,
            attachment_type: document.content_type,
            attachment: document.bytes,
        };

        let receipt = self
            .mailer
            .send(email)
            .await
            .map_err(|e| InvoicingError::DependencyFailure(e.to_string()))?;

        let was_draft = inv.status == InvoiceStatus::Draft;
        let invoice = self
            .store
            .mark_sent(ctx.workspace_id, invoice_id, Utc::now())
            .await?
            .ok_or(InvoicingError::NotFound("Invoice"))?;
        if was_draft && invoice.status == InvoiceStatus::Sent {
            INVOICES_TOTAL.with_label_values(&["sent"]).inc();
        }

        info!(invoice_id = %invoice_id, recipient = %recipient, "Invoice sent");

        self.audit(
            &invoice,
            user_id,
            actions::INVOICE_SENT,
            format!("Sent invoice {} to {}", invoice.invoice_number, recipient),
        )
        .await;

        Ok(SendOutcome {
            invoice,
            recipient,
            provider_id: receipt.provider_id,
        })
    }

    /// Render the downloadable invoice document.
    #[instrument(skip(self), fields(workspace_id = %ctx.workspace_id, invoice_id = %invoice_id))]
    pub async fn render_invoice(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
    ) -> Result<RenderedDocument, InvoicingError> {
        self.authorize(ctx, capabilities::INVOICE_READ).await?;

        let invoice = self.load(ctx, invoice_id).await?;
        let detail = self.detail(invoice).await?;
        self.renderer
            .render(&detail)
            .await
            .map_err(|e| InvoicingError::DependencyFailure(e.to_string()))
    }

    #[instrument(skip(self), fields(workspace_id = %ctx.workspace_id, invoice_id = %invoice_id))]
    pub async fn get_invoice(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
    ) -> Result<InvoiceDetail, InvoicingError> {
        self.authorize(ctx, capabilities::INVOICE_READ).await?;
        let invoice = self.load(ctx, invoice_id).await?;
        self.detail(invoice).await
    }

    #[instrument(skip(self, filter), fields(workspace_id = %ctx.workspace_id))]
    pub async fn list_invoices(
        &self,
        ctx: &TenantContext,
        filter: ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, InvoicingError> {
        self.authorize(ctx, capabilities::INVOICE_READ).await?;
        self.store
            .list_invoices(ctx.workspace_id, &filter.normalized())
            .await
    }

    /// Delete an invoice with its items and payments.
    #[instrument(skip(self), fields(workspace_id = %ctx.workspace_id, invoice_id = %invoice_id))]
    pub async fn delete_invoice(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
    ) -> Result<(), InvoicingError> {
        let user_id = self.authorize(ctx, capabilities::INVOICE_DELETE).await?;

        let invoice = self.load(ctx, invoice_id).await?;
        if !self.store.delete_invoice(ctx.workspace_id, invoice_id).await? {
            return Err(InvoicingError::NotFound("Invoice"));
        }

        info!(invoice_id = %invoice_id, "Invoice deleted");

        self.audit(
            &invoice,
            user_id,
            actions::INVOICE_DELETED,
            format!("Deleted invoice {}", invoice.invoice_number),
        )
        .await;

        Ok(())
    }

    /// Audit trail for the workspace, newest first.
    pub async fn list_activity(
        &self,
        ctx: &TenantContext,
        invoice_id: Option<Uuid>,
        limit: Option<i64>,
    ) -> Result<Vec<ActivityEntry>, InvoicingError> {
        self.authorize(ctx, capabilities::INVOICE_READ).await?;
        let limit = limit.unwrap_or(FEED_LIMIT).clamp(1, FEED_LIMIT);
        self.store
            .list_activity(ctx.workspace_id, invoice_id, limit)
            .await
    }

    /// Caller's notifications, newest first. Membership is enough.
    pub async fn list_notifications(
        &self,
        ctx: &TenantContext,
        limit: Option<i64>,
    ) -> Result<Vec<Notification>, InvoicingError> {
        let user_id = ctx.user()?;
        require(self.permissions.as_ref(), user_id, ctx.workspace_id, None).await?;
        let limit = limit.unwrap_or(FEED_LIMIT).clamp(1, FEED_LIMIT);
        self.store
            .list_notifications(ctx.workspace_id, user_id, limit)
            .await
    }
}
