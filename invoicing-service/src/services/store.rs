//! Persistence seam for invoices, payments and their audit trail.

use crate::error::InvoicingError;
use crate::models::{
    ActivityEntry, Invoice, InvoiceContent, InvoiceStatus, LineItem, LineItemInput,
    ListInvoicesFilter, NewInvoice, NewPayment, Notification, Payment, PaymentOutcome, Role,
    StatusChange,
};
use crate::services::totals::line_amount;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Storage for the invoicing domain.
///
/// Every method is scoped by `workspace_id`; a record that exists in another
/// workspace is reported as absent. Methods that touch more than one record
/// (`create_invoice`, `replace_invoice`, `change_status`, `record_payment`)
/// are atomic: either every write lands or none does.
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn health_check(&self) -> Result<(), InvoicingError>;

    /// Role of `user_id` in `workspace_id`, `None` when not a member.
    async fn member_role(
        &self,
        workspace_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Role>, InvoicingError>;

    /// Insert a DRAFT invoice with the next workspace invoice number.
    async fn create_invoice(
        &self,
        input: NewInvoice,
        now: DateTime<Utc>,
    ) -> Result<(Invoice, Vec<LineItem>), InvoicingError>;

    /// Overwrite header fields and replace every line item.
    ///
    /// PAID invoices are locked: `Err(Conflict)` until reverted to SENT.
    async fn replace_invoice(
        &self,
        workspace_id: Uuid,
        invoice_id: Uuid,
        content: InvoiceContent,
        now: DateTime<Utc>,
    ) -> Result<Option<(Invoice, Vec<LineItem>)>, InvoicingError>;

    async fn get_invoice(
        &self,
        workspace_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, InvoicingError>;

    /// Newest first, paged by the normalized filter.
    async fn list_invoices(
        &self,
        workspace_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, InvoicingError>;

    /// Items in their submitted order.
    async fn line_items(
        &self,
        workspace_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<LineItem>, InvoicingError>;

    /// Payments oldest first.
    async fn payments(
        &self,
        workspace_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<Payment>, InvoicingError>;

    /// Remove an invoice with its items and payments. `false` if absent.
    async fn delete_invoice(
        &self,
        workspace_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<bool, InvoicingError>;

    /// Move a DRAFT invoice to SENT; other statuses are left as they are.
    async fn mark_sent(
        &self,
        workspace_id: Uuid,
        invoice_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Invoice>, InvoicingError>;

    /// Apply a requested status, settling or un-settling the payment ledger.
    ///
    /// Returns `Ok(None)` when the invoice does not exist and
    /// `Err(InvalidTransition)` when the edge is not allowed.
    async fn change_status(
        &self,
        workspace_id: Uuid,
        invoice_id: Uuid,
        requested: InvoiceStatus,
        actor_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<StatusChange>, InvoicingError>;

    /// Append a payment and re-derive the invoice status from the new total.
    async fn record_payment(
        &self,
        input: NewPayment,
        now: DateTime<Utc>,
    ) -> Result<Option<PaymentOutcome>, InvoicingError>;

    async fn append_activity(&self, entry: &ActivityEntry) -> Result<(), InvoicingError>;

    /// Newest first, optionally narrowed to one invoice.
    async fn list_activity(
        &self,
        workspace_id: Uuid,
        invoice_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<ActivityEntry>, InvoicingError>;

    async fn append_notification(
        &self,
        notification: &Notification,
    ) -> Result<(), InvoicingError>;

    /// Newest first.
    async fn list_notifications(
        &self,
        workspace_id: Uuid,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Notification>, InvoicingError>;
}

/// Build line item rows for an invoice, numbering them in submitted order.
pub fn materialize_items(
    workspace_id: Uuid,
    invoice_id: Uuid,
    items: &[LineItemInput],
    now: DateTime<Utc>,
) -> Result<Vec<LineItem>, InvoicingError> {
    items
        .iter()
        .enumerate()
        .map(|(position, item)| {
            Ok(LineItem {
                line_item_id: Uuid::new_v4(),
                invoice_id,
                workspace_id,
                description: item.description.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                amount: line_amount(item)?,
                position: position as i32,
                created_utc: now,
            })
        })
        .collect()
}

/// Build a fresh DRAFT invoice from validated content.
pub fn draft_invoice(
    invoice_id: Uuid,
    invoice_number: String,
    input: &NewInvoice,
    now: DateTime<Utc>,
) -> Invoice {
    let content = &input.content;
    Invoice {
        invoice_id,
        workspace_id: input.workspace_id,
        invoice_number,
        status: InvoiceStatus::Draft,
        project_id: content.project_id,
        contractor_id: content.contractor_id,
        team_id: content.team_id,
        client_name: content.client_name.clone(),
        client_email: content.client_email.clone(),
        client_address: content.client_address.clone(),
        currency: content.currency.clone(),
        issue_date: content.issue_date,
        due_date: content.due_date,
        tax_rate: content.tax_rate,
        subtotal: content.totals.subtotal,
        tax_amount: content.totals.tax_amount,
        grand_total: content.totals.grand_total,
        notes: content.notes.clone(),
        created_by: input.created_by,
        created_utc: now,
        updated_utc: now,
        sent_utc: None,
        paid_utc: None,
    }
}

/// Content of a PAID invoice cannot change while its payments cover the
/// old total.
pub fn ensure_editable(invoice: &Invoice) -> Result<(), InvoicingError> {
    if invoice.status == InvoiceStatus::Paid {
        return Err(InvoicingError::Conflict(format!(
            "Invoice {} is PAID; revert it to SENT before editing",
            invoice.invoice_number
        )));
    }
    Ok(())
}

/// Overwrite the editable fields of an invoice; status is untouched.
pub fn apply_content(invoice: &mut Invoice, content: &InvoiceContent, now: DateTime<Utc>) {
    invoice.project_id = content.project_id;
    invoice.contractor_id = content.contractor_id;
    invoice.team_id = content.team_id;
    invoice.client_name = content.client_name.clone();
    invoice.client_email = content.client_email.clone();
    invoice.client_address = content.client_address.clone();
    invoice.currency = content.currency.clone();
    invoice.issue_date = content.issue_date;
    invoice.due_date = content.due_date;
    invoice.tax_rate = content.tax_rate;
    invoice.subtotal = content.totals.subtotal;
    invoice.tax_amount = content.totals.tax_amount;
    invoice.grand_total = content.totals.grand_total;
    invoice.notes = content.notes.clone();
    invoice.updated_utc = now;
}
