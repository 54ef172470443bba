//! Payment recording and status derivation.

use crate::error::InvoicingError;
use crate::middleware::TenantContext;
use crate::models::{actions, ActivityEntry, NewPayment, Payment, PaymentOutcome, RecordPaymentInput};
use crate::services::activity::{self, ActivitySink};
use crate::services::lifecycle::paid_notification;
use crate::services::metrics::{record_payment_metric, INVOICES_TOTAL};
use crate::services::permissions::{capabilities, require, PermissionChecker};
use crate::services::store::InvoiceStore;
use crate::services::totals::check_amount;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

const DEFAULT_METHOD: &str = "Manual";

pub struct PaymentRecorder {
    store: Arc<dyn InvoiceStore>,
    permissions: Arc<dyn PermissionChecker>,
    activity: Arc<dyn ActivitySink>,
}

impl PaymentRecorder {
    pub fn new(
        store: Arc<dyn InvoiceStore>,
        permissions: Arc<dyn PermissionChecker>,
        activity: Arc<dyn ActivitySink>,
    ) -> Self {
        Self {
            store,
            permissions,
            activity,
        }
    }

    /// Record an incoming payment against an invoice.
    ///
    /// Any workspace member may record. The invoice becomes PAID once payments
    /// reach its grand total, and a partial payment moves a DRAFT to SENT.
    #[instrument(skip(self, input), fields(workspace_id = %ctx.workspace_id, invoice_id = %invoice_id))]
    pub async fn record_payment(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
        input: RecordPaymentInput,
    ) -> Result<PaymentOutcome, InvoicingError> {
        let user_id = ctx.user()?;
        require(self.permissions.as_ref(), user_id, ctx.workspace_id, None).await?;

        if input.amount <= Decimal::ZERO {
            return Err(InvoicingError::validation("amount must be greater than zero"));
        }
        check_amount("amount", input.amount)?;

        let now = Utc::now();
        let method = input
            .method
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_METHOD.to_string());

        let outcome = self
            .store
            .record_payment(
                NewPayment {
                    workspace_id: ctx.workspace_id,
                    invoice_id,
                    amount: input.amount,
                    paid_on: input.paid_on.unwrap_or_else(|| now.date_naive()),
                    method,
                    reference: input.reference,
                    created_by: user_id,
                },
                now,
            )
            .await?
            .ok_or(InvoicingError::NotFound("Invoice"))?;

        let invoice = &outcome.invoice;
        record_payment_metric(
            outcome.payment.source.as_str(),
            &invoice.currency,
            outcome.payment.amount,
        );
        if outcome.transition.is_change() {
            let status = outcome.transition.status().as_str().to_ascii_lowercase();
            INVOICES_TOTAL.with_label_values(&[status.as_str()]).inc();
        }

        info!(
            payment_id = %outcome.payment.payment_id,
            amount = %outcome.payment.amount,
            total_paid = %outcome.total_paid,
            status = %invoice.status,
            "Payment recorded"
        );

        activity::record(
            self.activity.as_ref(),
            ActivityEntry::new(
                invoice.workspace_id,
                invoice.project_id,
                user_id,
                actions::PAYMENT_RECORDED,
                format!(
                    "Recorded payment of {} {} on {}",
                    outcome.payment.amount, invoice.currency, invoice.invoice_number
                ),
                Some(invoice.invoice_id),
            ),
        )
        .await;

        if outcome.transition.became_paid() {
            activity::notify(self.activity.as_ref(), paid_notification(invoice)).await;
        }

        Ok(outcome)
    }

    /// Payment ledger of one invoice, oldest first.
    #[instrument(skip(self), fields(workspace_id = %ctx.workspace_id, invoice_id = %invoice_id))]
    pub async fn list_payments(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
    ) -> Result<Vec<Payment>, InvoicingError> {
        let user_id = ctx.user()?;
        require(
            self.permissions.as_ref(),
            user_id,
            ctx.workspace_id,
            Some(capabilities::PAYMENT_READ),
        )
        .await?;

        self.store
            .get_invoice(ctx.workspace_id, invoice_id)
            .await?
            .ok_or(InvoicingError::NotFound("Invoice"))?;

        self.store.payments(ctx.workspace_id, invoice_id).await
    }
}
