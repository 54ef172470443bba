//! Payment model for invoicing-service.

use super::{Invoice, Transition};
use crate::error::InvoicingError;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Money direction relative to the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentDirection {
    Incoming,
    Outgoing,
}

impl PaymentDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentDirection::Incoming => "INCOMING",
            PaymentDirection::Outgoing => "OUTGOING",
        }
    }
}

impl FromStr for PaymentDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INCOMING" => Ok(PaymentDirection::Incoming),
            "OUTGOING" => Ok(PaymentDirection::Outgoing),
            other => Err(format!("unknown payment direction '{}'", other)),
        }
    }
}

/// How a payment row came to exist.
///
/// `Settlement` rows are synthesized when an invoice is marked PAID by hand
/// and are the only rows removed when that status is reverted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentSource {
    Manual,
    Settlement,
}

impl PaymentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentSource::Manual => "MANUAL",
            PaymentSource::Settlement => "SETTLEMENT",
        }
    }
}

impl fmt::Display for PaymentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MANUAL" => Ok(PaymentSource::Manual),
            "SETTLEMENT" => Ok(PaymentSource::Settlement),
            other => Err(format!("unknown payment source '{}'", other)),
        }
    }
}

/// Payment recorded against an invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: Uuid,
    pub workspace_id: Uuid,
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub paid_on: NaiveDate,
    pub method: String,
    pub reference: Option<String>,
    pub direction: PaymentDirection,
    pub source: PaymentSource,
    pub project_id: Option<Uuid>,
    pub contractor_id: Option<Uuid>,
    pub team_id: Option<Uuid>,
    pub created_by: Uuid,
    pub created_utc: DateTime<Utc>,
}

/// Caller-submitted payment.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordPaymentInput {
    pub amount: Decimal,
    pub paid_on: Option<NaiveDate>,
    pub method: Option<String>,
    pub reference: Option<String>,
}

/// Payment as handed to the store.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub workspace_id: Uuid,
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub paid_on: NaiveDate,
    pub method: String,
    pub reference: Option<String>,
    pub created_by: Uuid,
}

impl NewPayment {
    /// Materialize the row, copying reporting associations from the invoice.
    pub fn into_payment(
        self,
        invoice: &Invoice,
        source: PaymentSource,
        now: DateTime<Utc>,
    ) -> Payment {
        Payment {
            payment_id: Uuid::new_v4(),
            workspace_id: self.workspace_id,
            invoice_id: self.invoice_id,
            amount: self.amount,
            paid_on: self.paid_on,
            method: self.method,
            reference: self.reference,
            direction: PaymentDirection::Incoming,
            source,
            project_id: invoice.project_id,
            contractor_id: invoice.contractor_id,
            team_id: invoice.team_id,
            created_by: self.created_by,
            created_utc: now,
        }
    }
}

/// Result of recording a payment.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentOutcome {
    pub payment: Payment,
    pub invoice: Invoice,
    pub total_paid: Decimal,
    pub transition: Transition,
}

/// Result of a status change.
#[derive(Debug, Clone, Serialize)]
pub struct StatusChange {
    pub invoice: Invoice,
    pub transition: Transition,
    /// Synthetic payment appended to settle the balance, if any.
    pub settlement: Option<Payment>,
    /// Synthetic payments removed by a reversal.
    pub removed_settlements: u64,
}

/// Sum of incoming payments.
pub fn total_incoming(payments: &[Payment]) -> Result<Decimal, InvoicingError> {
    payments
        .iter()
        .filter(|p| p.direction == PaymentDirection::Incoming)
        .try_fold(Decimal::ZERO, |total, p| total.checked_add(p.amount))
        .ok_or_else(|| InvoicingError::validation("payment total is too large"))
}
