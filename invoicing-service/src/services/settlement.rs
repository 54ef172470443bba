//! Ledger settlement rules shared by every store.
//!
//! Both the explicit payment path and the "mark as paid" status path end up
//! here, so an invoice is never settled twice: marking PAID only books the
//! outstanding balance, and reverting PAID only removes what it booked.

use crate::error::InvoicingError;
use crate::models::{
    InvalidTransition, Invoice, InvoiceStatus, NewPayment, Payment, PaymentSource, Transition,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Method recorded on synthetic settlement payments.
pub const SETTLEMENT_METHOD: &str = "Manual";

/// Amount still owed on an invoice given what has been paid.
pub fn outstanding(grand_total: Decimal, total_paid: Decimal) -> Decimal {
    (grand_total - total_paid).max(Decimal::ZERO)
}

/// Status an invoice should hold after its payments reach `total_paid`.
///
/// Fully paid invoices become PAID; a partial payment on a DRAFT marks it
/// SENT; anything else keeps its status. Overpayment is accepted.
pub fn status_after_payment(
    current: InvoiceStatus,
    grand_total: Decimal,
    total_paid: Decimal,
) -> InvoiceStatus {
    if total_paid >= grand_total {
        InvoiceStatus::Paid
    } else if total_paid > Decimal::ZERO && current == InvoiceStatus::Draft {
        InvoiceStatus::Sent
    } else {
        current
    }
}

/// What a store must do, inside one atomic unit, to apply a status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPlan {
    pub transition: Transition,
    /// Synthetic settlement payment to append.
    pub settle: Option<Decimal>,
    /// Remove synthetic settlement payments.
    pub clear_settlements: bool,
}

impl StatusPlan {
    /// Update status and lifecycle timestamps on the invoice.
    pub fn apply_to(&self, invoice: &mut Invoice, now: DateTime<Utc>) {
        let Transition::Changed { from, to } = self.transition else {
            return;
        };

        invoice.status = to;
        invoice.updated_utc = now;
        match (from, to) {
            (_, InvoiceStatus::Paid) => {
                invoice.paid_utc = Some(now);
            }
            (InvoiceStatus::Paid, InvoiceStatus::Sent) => {
                invoice.paid_utc = None;
            }
            (_, InvoiceStatus::Sent) => {
                if invoice.sent_utc.is_none() {
                    invoice.sent_utc = Some(now);
                }
            }
            _ => {}
        }
    }
}

/// Synthetic payment covering `amount` of the outstanding balance.
pub fn settlement_payment(
    invoice: &Invoice,
    amount: Decimal,
    actor_id: Uuid,
    now: DateTime<Utc>,
) -> Payment {
    NewPayment {
        workspace_id: invoice.workspace_id,
        invoice_id: invoice.invoice_id,
        amount,
        paid_on: now.date_naive(),
        method: SETTLEMENT_METHOD.to_string(),
        reference: None,
        created_by: actor_id,
    }
    .into_payment(invoice, PaymentSource::Settlement, now)
}

/// Plan an explicit status change requested by a user.
pub fn plan_status_change(
    invoice: &Invoice,
    total_paid: Decimal,
    requested: InvoiceStatus,
) -> Result<StatusPlan, InvalidTransition> {
    let transition = invoice.status.transition(requested)?;

    let plan = match transition {
        Transition::Changed {
            to: InvoiceStatus::Paid,
            ..
        } => {
            let balance = outstanding(invoice.grand_total, total_paid);
            StatusPlan {
                transition,
                settle: (balance > Decimal::ZERO).then_some(balance),
                clear_settlements: false,
            }
        }
        Transition::Changed {
            from: InvoiceStatus::Paid,
            ..
        } => StatusPlan {
            transition,
            settle: None,
            clear_settlements: true,
        },
        _ => StatusPlan {
            transition,
            settle: None,
            clear_settlements: false,
        },
    };

    Ok(plan)
}

/// Plan the status effect of a payment of `amount` on top of `prior_paid`.
///
/// `prior_paid` must be read before the new payment is written.
pub fn plan_payment(
    invoice: &Invoice,
    prior_paid: Decimal,
    amount: Decimal,
) -> Result<(StatusPlan, Decimal), InvoicingError> {
    let total_paid = prior_paid
        .checked_add(amount)
        .ok_or_else(|| InvoicingError::validation("payment total is too large"))?;
    let next = status_after_payment(invoice.status, invoice.grand_total, total_paid);
    let transition = invoice.status.transition(next)?;

    Ok((
        StatusPlan {
            transition,
            settle: None,
            clear_settlements: false,
        },
        total_paid,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn invoice(status: InvoiceStatus, grand_total: Decimal) -> Invoice {
        let now = Utc::now();
        Invoice {
            invoice_id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            invoice_number: "INV-000001".to_string(),
            status,
            project_id: None,
            contractor_id: None,
            team_id: None,
            client_name: "Acme Corp".to_string(),
            client_email: None,
            client_address: None,
            currency: "USD".to_string(),
            issue_date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            due_date: None,
            tax_rate: dec!(10),
            subtotal: grand_total,
            tax_amount: Decimal::ZERO,
            grand_total,
            notes: None,
            created_by: Uuid::new_v4(),
            created_utc: now,
            updated_utc: now,
            sent_utc: None,
            paid_utc: None,
        }
    }

    #[test]
    fn full_payment_settles_invoice() {
        assert_eq!(
            status_after_payment(InvoiceStatus::Sent, dec!(220), dec!(220)),
            InvoiceStatus::Paid
        );
        assert_eq!(
            status_after_payment(InvoiceStatus::Draft, dec!(220), dec!(300)),
            InvoiceStatus::Paid
        );
    }

    #[test]
    fn partial_payment_on_draft_marks_sent() {
        assert_eq!(
            status_after_payment(InvoiceStatus::Draft, dec!(220), dec!(100)),
            InvoiceStatus::Sent
        );
        assert_eq!(
            status_after_payment(InvoiceStatus::Sent, dec!(220), dec!(100)),
            InvoiceStatus::Sent
        );
    }

    #[test]
    fn further_payment_keeps_paid_invoice_paid() {
        assert_eq!(
            status_after_payment(InvoiceStatus::Paid, dec!(220), dec!(250)),
            InvoiceStatus::Paid
        );
    }

    #[test]
    fn marking_paid_books_only_the_outstanding_balance() {
        let inv = invoice(InvoiceStatus::Sent, dec!(220));
        let plan = plan_status_change(&inv, dec!(100), InvoiceStatus::Paid).unwrap();
        assert_eq!(plan.settle, Some(dec!(120)));
        assert!(!plan.clear_settlements);
    }

    #[test]
    fn marking_paid_when_already_covered_books_nothing() {
        let inv = invoice(InvoiceStatus::Sent, dec!(220));
        let plan = plan_status_change(&inv, dec!(220), InvoiceStatus::Paid).unwrap();
        assert_eq!(plan.settle, None);
        assert!(plan.transition.became_paid());
    }

    #[test]
    fn reverting_paid_clears_only_settlements() {
        let inv = invoice(InvoiceStatus::Paid, dec!(220));
        let plan = plan_status_change(&inv, dec!(220), InvoiceStatus::Sent).unwrap();
        assert!(plan.clear_settlements);
        assert_eq!(plan.settle, None);
    }

    #[test]
    fn repeating_current_status_does_nothing() {
        let inv = invoice(InvoiceStatus::Paid, dec!(220));
        let plan = plan_status_change(&inv, dec!(0), InvoiceStatus::Paid).unwrap();
        assert!(!plan.transition.is_change());
        assert_eq!(plan.settle, None);
        assert!(!plan.clear_settlements);
    }

    #[test]
    fn disallowed_status_change_is_rejected() {
        let inv = invoice(InvoiceStatus::Sent, dec!(220));
        assert!(plan_status_change(&inv, dec!(0), InvoiceStatus::Draft).is_err());
    }

    #[test]
    fn apply_sets_and_clears_timestamps() {
        let now = Utc::now();
        let mut inv = invoice(InvoiceStatus::Draft, dec!(220));

        let plan = plan_status_change(&inv, dec!(0), InvoiceStatus::Sent).unwrap();
        plan.apply_to(&mut inv, now);
        assert_eq!(inv.status, InvoiceStatus::Sent);
        assert_eq!(inv.sent_utc, Some(now));

        let plan = plan_status_change(&inv, dec!(0), InvoiceStatus::Paid).unwrap();
        plan.apply_to(&mut inv, now);
        assert_eq!(inv.paid_utc, Some(now));

        let plan = plan_status_change(&inv, dec!(220), InvoiceStatus::Sent).unwrap();
        plan.apply_to(&mut inv, now);
        assert_eq!(inv.status, InvoiceStatus::Sent);
        assert_eq!(inv.paid_utc, None);
        assert_eq!(inv.sent_utc, Some(now));
    }

    #[test]
    fn settlement_payment_copies_reporting_fields() {
        let mut inv = invoice(InvoiceStatus::Sent, dec!(220));
        inv.project_id = Some(Uuid::new_v4());
        let actor = Uuid::new_v4();

        let payment = settlement_payment(&inv, dec!(120), actor, Utc::now());
        assert_eq!(payment.source, PaymentSource::Settlement);
        assert_eq!(payment.amount, dec!(120));
        assert_eq!(payment.project_id, inv.project_id);
        assert_eq!(payment.created_by, actor);
        assert_eq!(payment.method, "Manual");
    }

    #[test]
    fn payment_plan_reports_running_total() {
        let inv = invoice(InvoiceStatus::Draft, dec!(200));
        let (plan, total) = plan_payment(&inv, dec!(50), dec!(50)).unwrap();
        assert_eq!(total, dec!(100));
        assert_eq!(plan.transition.status(), InvoiceStatus::Sent);
    }

    #[test]
    fn payment_total_overflow_is_a_validation_error() {
        let inv = invoice(InvoiceStatus::Sent, dec!(220));
        let err = plan_payment(
            &inv,
            dec!(50000000000000000000000000000),
            dec!(50000000000000000000000000000),
        )
        .unwrap_err();
        assert!(matches!(err, InvoicingError::ValidationFailed(_)));
    }
}
