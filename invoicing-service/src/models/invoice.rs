//! Invoice model for invoicing-service.

use super::{LineItem, LineItemInput, Payment};
use crate::error::InvoicingError;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
}

/// Rejected status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invoice status cannot change from {from} to {to}")]
pub struct InvalidTransition {
    pub from: InvoiceStatus,
    pub to: InvoiceStatus,
}

/// Outcome of an accepted status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transition {
    Unchanged { status: InvoiceStatus },
    Changed { from: InvoiceStatus, to: InvoiceStatus },
}

impl Transition {
    /// Status after the transition.
    pub fn status(&self) -> InvoiceStatus {
        match *self {
            Transition::Unchanged { status } => status,
            Transition::Changed { to, .. } => to,
        }
    }

    pub fn is_change(&self) -> bool {
        matches!(self, Transition::Changed { .. })
    }

    /// True when this transition moved the invoice into PAID.
    pub fn became_paid(&self) -> bool {
        matches!(
            self,
            Transition::Changed {
                to: InvoiceStatus::Paid,
                ..
            }
        )
    }
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "DRAFT",
            InvoiceStatus::Sent => "SENT",
            InvoiceStatus::Paid => "PAID",
        }
    }

    /// Whether the edge `self -> to` is in the transition table.
    ///
    /// DRAFT->SENT, DRAFT->PAID, SENT->PAID and the PAID->SENT reversal are
    /// the only edges; nothing goes back to DRAFT.
    pub fn can_transition_to(&self, to: InvoiceStatus) -> bool {
        matches!(
            (self, to),
            (InvoiceStatus::Draft, InvoiceStatus::Sent)
                | (InvoiceStatus::Draft, InvoiceStatus::Paid)
                | (InvoiceStatus::Sent, InvoiceStatus::Paid)
                | (InvoiceStatus::Paid, InvoiceStatus::Sent)
        )
    }

    /// Resolve a requested status against the current one.
    ///
    /// Requesting the current status is accepted as a no-op.
    pub fn transition(self, requested: InvoiceStatus) -> Result<Transition, InvalidTransition> {
        if self == requested {
            return Ok(Transition::Unchanged { status: self });
        }
        if self.can_transition_to(requested) {
            Ok(Transition::Changed {
                from: self,
                to: requested,
            })
        } else {
            Err(InvalidTransition {
                from: self,
                to: requested,
            })
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(InvoiceStatus::Draft),
            "SENT" => Ok(InvoiceStatus::Sent),
            "PAID" => Ok(InvoiceStatus::Paid),
            other => Err(format!("unknown invoice status '{}'", other)),
        }
    }
}

/// Invoice document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub workspace_id: Uuid,
    pub invoice_number: String,
    pub status: InvoiceStatus,
    pub project_id: Option<Uuid>,
    pub contractor_id: Option<Uuid>,
    pub team_id: Option<Uuid>,
    pub client_name: String,
    pub client_email: Option<String>,
    pub client_address: Option<String>,
    pub currency: String,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    /// Percentage, e.g. `10` for 10%.
    pub tax_rate: Decimal,
    /// Sum of line item amounts, before tax.
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    /// What the client owes: `subtotal + tax_amount`.
    pub grand_total: Decimal,
    pub notes: Option<String>,
    pub created_by: Uuid,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    pub sent_utc: Option<DateTime<Utc>>,
    pub paid_utc: Option<DateTime<Utc>>,
}

/// Monetary totals derived from line items and a tax rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InvoiceTotals {
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub grand_total: Decimal,
}

/// Invoice with its items and payment ledger.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceDetail {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub items: Vec<LineItem>,
    pub payments: Vec<Payment>,
    pub amount_paid: Decimal,
    pub balance_due: Decimal,
}

impl InvoiceDetail {
    pub fn new(
        invoice: Invoice,
        items: Vec<LineItem>,
        payments: Vec<Payment>,
    ) -> Result<Self, InvoicingError> {
        let amount_paid = super::payment::total_incoming(&payments)?;
        let balance_due = (invoice.grand_total - amount_paid).max(Decimal::ZERO);
        Ok(Self {
            invoice,
            items,
            payments,
            amount_paid,
            balance_due,
        })
    }
}

fn default_currency() -> String {
    "USD".to_string()
}

/// Caller-submitted invoice content, used for both create and update.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct InvoiceInput {
    #[validate(length(min = 1, max = 200, message = "client_name is required"))]
    pub client_name: String,
    #[validate(email(message = "client_email must be a valid email address"))]
    pub client_email: Option<String>,
    #[validate(length(max = 500))]
    pub client_address: Option<String>,
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3, message = "currency must be a three-letter ISO code"))]
    pub currency: String,
    #[serde(default)]
    pub tax_rate: Decimal,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub project_id: Option<Uuid>,
    pub contractor_id: Option<Uuid>,
    pub team_id: Option<Uuid>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
    #[validate(length(min = 1, message = "at least one line item is required"))]
    pub items: Vec<LineItemInput>,
}

/// Invoice header and items as handed to the store on create.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub workspace_id: Uuid,
    pub created_by: Uuid,
    pub content: InvoiceContent,
}

/// Everything a create or update writes, with totals already computed.
#[derive(Debug, Clone)]
pub struct InvoiceContent {
    pub project_id: Option<Uuid>,
    pub contractor_id: Option<Uuid>,
    pub team_id: Option<Uuid>,
    pub client_name: String,
    pub client_email: Option<String>,
    pub client_address: Option<String>,
    pub currency: String,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub tax_rate: Decimal,
    pub totals: InvoiceTotals,
    pub notes: Option<String>,
    pub items: Vec<LineItemInput>,
}

/// Filter parameters for listing invoices.
#[derive(Debug, Clone, Deserialize)]
pub struct ListInvoicesFilter {
    pub status: Option<InvoiceStatus>,
    pub project_id: Option<Uuid>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

impl Default for ListInvoicesFilter {
    fn default() -> Self {
        Self {
            status: None,
            project_id: None,
            limit: default_limit(),
            offset: 0,
        }
    }
}

impl ListInvoicesFilter {
    /// Limit clamped to 1..=100 and a non-negative offset.
    pub fn normalized(&self) -> Self {
        Self {
            status: self.status,
            project_id: self.project_id,
            limit: self.limit.clamp(1, 100),
            offset: self.offset.max(0),
        }
    }
}

/// Requested status change.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: InvoiceStatus,
}

/// Request to email an invoice.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct SendInvoiceRequest {
    /// Defaults to the invoice's `client_email`.
    #[validate(email(message = "recipient must be a valid email address"))]
    pub recipient: Option<String>,
}

/// Invoice number shown to clients, unique per workspace.
pub fn format_invoice_number(sequence: i64) -> String {
    format!("INV-{:06}", sequence)
}
