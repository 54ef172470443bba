//! In-process store used for local runs and the test suite.

use crate::error::InvoicingError;
use crate::models::{
    format_invoice_number, ActivityEntry, Invoice, InvoiceContent, InvoiceStatus, LineItem,
    ListInvoicesFilter, NewInvoice, NewPayment, Notification, Payment, PaymentOutcome,
    PaymentSource, Role, StatusChange,
};
use crate::services::settlement::{plan_payment, plan_status_change, settlement_payment};
use crate::services::store::{
    apply_content, draft_invoice, ensure_editable, materialize_items, InvoiceStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    members: HashMap<(Uuid, Uuid), Role>,
    sequences: HashMap<Uuid, i64>,
    /// Insertion order; listings walk it backwards.
    invoices: Vec<Invoice>,
    items: HashMap<Uuid, Vec<LineItem>>,
    payments: Vec<Payment>,
    activity: Vec<ActivityEntry>,
    notifications: Vec<Notification>,
}

impl MemoryState {
    fn invoice_mut(&mut self, workspace_id: Uuid, invoice_id: Uuid) -> Option<&mut Invoice> {
        self.invoices
            .iter_mut()
            .find(|i| i.workspace_id == workspace_id && i.invoice_id == invoice_id)
    }

    fn paid_total(&self, invoice_id: Uuid) -> Result<rust_decimal::Decimal, InvoicingError> {
        let payments: Vec<Payment> = self
            .payments
            .iter()
            .filter(|p| p.invoice_id == invoice_id)
            .cloned()
            .collect();
        crate::models::total_incoming(&payments)
    }
}

/// Whole state behind one mutex, so every operation is atomic.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workspace member. Membership is otherwise managed elsewhere.
    pub async fn add_member(&self, workspace_id: Uuid, user_id: Uuid, role: Role) {
        let mut state = self.state.lock().await;
        state.members.insert((workspace_id, user_id), role);
    }
}

#[async_trait]
impl InvoiceStore for MemoryStore {
    async fn health_check(&self) -> Result<(), InvoicingError> {
        Ok(())
    }

    async fn member_role(
        &self,
        workspace_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Role>, InvoicingError> {
        let state = self.state.lock().await;
        Ok(state.members.get(&(workspace_id, user_id)).copied())
    }

    #[instrument(skip(self, input), fields(workspace_id = %input.workspace_id))]
    async fn create_invoice(
        &self,
        input: NewInvoice,
        now: DateTime<Utc>,
    ) -> Result<(Invoice, Vec<LineItem>), InvoicingError> {
        let invoice_id = Uuid::new_v4();
        let items = materialize_items(input.workspace_id, invoice_id, &input.content.items, now)?;

        let mut state = self.state.lock().await;
        let sequence = state.sequences.entry(input.workspace_id).or_insert(0);
        *sequence += 1;
        let invoice = draft_invoice(invoice_id, format_invoice_number(*sequence), &input, now);

        state.invoices.push(invoice.clone());
        state.items.insert(invoice_id, items.clone());

        info!(invoice_id = %invoice_id, invoice_number = %invoice.invoice_number, "Draft invoice created");

        Ok((invoice, items))
    }

    #[instrument(skip(self, content))]
    async fn replace_invoice(
        &self,
        workspace_id: Uuid,
        invoice_id: Uuid,
        content: InvoiceContent,
        now: DateTime<Utc>,
    ) -> Result<Option<(Invoice, Vec<LineItem>)>, InvoicingError> {
        let items = materialize_items(workspace_id, invoice_id, &content.items, now)?;

        let mut state = self.state.lock().await;
        let Some(invoice) = state.invoice_mut(workspace_id, invoice_id) else {
            return Ok(None);
        };
        ensure_editable(invoice)?;
        apply_content(invoice, &content, now);
        let invoice = invoice.clone();
        state.items.insert(invoice_id, items.clone());

        Ok(Some((invoice, items)))
    }

    async fn get_invoice(
        &self,
        workspace_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, InvoicingError> {
        let mut state = self.state.lock().await;
        Ok(state.invoice_mut(workspace_id, invoice_id).map(|i| i.clone()))
    }

    async fn list_invoices(
        &self,
        workspace_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, InvoicingError> {
        let filter = filter.normalized();
        let state = self.state.lock().await;
        Ok(state
            .invoices
            .iter()
            .rev()
            .filter(|i| i.workspace_id == workspace_id)
            .filter(|i| filter.status.map_or(true, |s| i.status == s))
            .filter(|i| filter.project_id.map_or(true, |p| i.project_id == Some(p)))
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .cloned()
            .collect())
    }

    async fn line_items(
        &self,
        workspace_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<LineItem>, InvoicingError> {
        let state = self.state.lock().await;
        Ok(state
            .items
            .get(&invoice_id)
            .map(|items| {
                items
                    .iter()
                    .filter(|i| i.workspace_id == workspace_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn payments(
        &self,
        workspace_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<Payment>, InvoicingError> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .iter()
            .filter(|p| p.workspace_id == workspace_id && p.invoice_id == invoice_id)
            .cloned()
            .collect())
    }

    async fn delete_invoice(
        &self,
        workspace_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<bool, InvoicingError> {
        let mut state = self.state.lock().await;
        let before = state.invoices.len();
        state
            .invoices
            .retain(|i| !(i.workspace_id == workspace_id && i.invoice_id == invoice_id));
        if state.invoices.len() == before {
            return Ok(false);
        }
        state.items.remove(&invoice_id);
        state.payments.retain(|p| p.invoice_id != invoice_id);
        Ok(true)
    }

    async fn mark_sent(
        &self,
        workspace_id: Uuid,
        invoice_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Invoice>, InvoicingError> {
        let mut state = self.state.lock().await;
        let Some(invoice) = state.invoice_mut(workspace_id, invoice_id) else {
            return Ok(None);
        };
        if invoice.status == InvoiceStatus::Draft {
            invoice.status = InvoiceStatus::Sent;
            invoice.sent_utc = Some(now);
            invoice.updated_utc = now;
        }
        Ok(Some(invoice.clone()))
    }

    #[instrument(skip(self, now))]
    async fn change_status(
        &self,
        workspace_id: Uuid,
        invoice_id: Uuid,
        requested: InvoiceStatus,
        actor_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<StatusChange>, InvoicingError> {
        let mut state = self.state.lock().await;
        let paid = state.paid_total(invoice_id)?;
        let Some(invoice) = state.invoice_mut(workspace_id, invoice_id) else {
            return Ok(None);
        };

        let plan = plan_status_change(invoice, paid, requested)?;
        plan.apply_to(invoice, now);
        let invoice = invoice.clone();

        let settlement = plan
            .settle
            .map(|amount| settlement_payment(&invoice, amount, actor_id, now));
        if let Some(payment) = &settlement {
            state.payments.push(payment.clone());
        }

        let mut removed_settlements = 0;
        if plan.clear_settlements {
            let before = state.payments.len();
            state
                .payments
                .retain(|p| !(p.invoice_id == invoice_id && p.source == PaymentSource::Settlement));
            removed_settlements = (before - state.payments.len()) as u64;
        }

        Ok(Some(StatusChange {
            invoice,
            transition: plan.transition,
            settlement,
            removed_settlements,
        }))
    }

    #[instrument(skip(self, input, now), fields(workspace_id = %input.workspace_id, invoice_id = %input.invoice_id))]
    async fn record_payment(
        &self,
        input: NewPayment,
        now: DateTime<Utc>,
    ) -> Result<Option<PaymentOutcome>, InvoicingError> {
        let mut state = self.state.lock().await;
        let prior = state.paid_total(input.invoice_id)?;
        let Some(invoice) = state.invoice_mut(input.workspace_id, input.invoice_id) else {
            return Ok(None);
        };

        let (plan, total_paid) = plan_payment(invoice, prior, input.amount)?;
        let payment = input.into_payment(invoice, PaymentSource::Manual, now);
        plan.apply_to(invoice, now);
        let invoice = invoice.clone();
        state.payments.push(payment.clone());

        Ok(Some(PaymentOutcome {
            payment,
            invoice,
            total_paid,
            transition: plan.transition,
        }))
    }

    async fn append_activity(&self, entry: &ActivityEntry) -> Result<(), InvoicingError> {
        let mut state = self.state.lock().await;
        state.activity.push(entry.clone());
        Ok(())
    }

    async fn list_activity(
        &self,
        workspace_id: Uuid,
        invoice_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<ActivityEntry>, InvoicingError> {
        let state = self.state.lock().await;
        Ok(state
            .activity
            .iter()
            .rev()
            .filter(|a| a.workspace_id == workspace_id)
            .filter(|a| invoice_id.map_or(true, |id| a.invoice_id == Some(id)))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn append_notification(
        &self,
        notification: &Notification,
    ) -> Result<(), InvoicingError> {
        let mut state = self.state.lock().await;
        state.notifications.push(notification.clone());
        Ok(())
    }

    async fn list_notifications(
        &self,
        workspace_id: Uuid,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Notification>, InvoicingError> {
        let state = self.state.lock().await;
        Ok(state
            .notifications
            .iter()
            .rev()
            .filter(|n| n.workspace_id == workspace_id && n.user_id == user_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}
