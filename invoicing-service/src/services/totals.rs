//! Invoice validation and total computation.

use crate::error::InvoicingError;
use crate::models::{InvoiceInput, InvoiceTotals, LineItemInput};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use validator::Validate;

/// Decimal places stored for quantities, prices and money amounts.
pub const MONEY_SCALE: u32 = 6;

/// Decimal places stored for tax rates.
pub const TAX_RATE_SCALE: u32 = 4;

/// Exclusive upper bound (10^14) of every stored amount.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0x107A_4000, 0x5AF3, 0, false, 0);

/// Reject values the ledger columns cannot hold exactly.
pub fn check_amount(field: &str, value: Decimal) -> Result<(), InvoicingError> {
    if value >= MAX_AMOUNT {
        return Err(InvoicingError::validation(format!(
            "{} must be below {}",
            field, MAX_AMOUNT
        )));
    }
    if value.normalize().scale() > MONEY_SCALE {
        return Err(InvoicingError::validation(format!(
            "{} allows at most {} decimal places",
            field, MONEY_SCALE
        )));
    }
    Ok(())
}

/// `quantity * unit_price`, rounded to the stored scale.
pub fn line_amount(item: &LineItemInput) -> Result<Decimal, InvoicingError> {
    item.quantity
        .checked_mul(item.unit_price)
        .map(|amount| amount.round_dp(MONEY_SCALE))
        .ok_or_else(|| InvoicingError::validation("line item amount is too large"))
}

/// Subtotal, tax and grand total for a set of items.
///
/// `tax_amount = subtotal * tax_rate / 100`, rounded to the stored scale so
/// every store reports the same figures.
pub fn compute_totals(
    items: &[LineItemInput],
    tax_rate: Decimal,
) -> Result<InvoiceTotals, InvoicingError> {
    let mut subtotal = Decimal::ZERO;
    for item in items {
        subtotal = subtotal
            .checked_add(line_amount(item)?)
            .ok_or_else(|| InvoicingError::validation("invoice subtotal is too large"))?;
    }

    let tax_amount = subtotal
        .checked_mul(tax_rate)
        .and_then(|t| t.checked_div(Decimal::ONE_HUNDRED))
        .map(|t| t.round_dp(MONEY_SCALE))
        .ok_or_else(|| InvoicingError::validation("invoice tax is too large"))?;

    let grand_total = subtotal
        .checked_add(tax_amount)
        .ok_or_else(|| InvoicingError::validation("invoice total is too large"))?;
    check_amount("invoice total", grand_total)?;

    Ok(InvoiceTotals {
        subtotal,
        tax_amount,
        grand_total,
    })
}

/// Validate submitted invoice content and compute its totals.
///
/// Nothing is written before this returns `Ok`.
pub fn validate_invoice(
    input: &InvoiceInput,
    today: NaiveDate,
) -> Result<InvoiceTotals, InvoicingError> {
    input.validate()?;

    if input.client_name.trim().is_empty() {
        return Err(InvoicingError::validation("client_name is required"));
    }
    if !input.currency.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(InvoicingError::validation(
            "currency must be a three-letter ISO code",
        ));
    }
    if input.tax_rate < Decimal::ZERO || input.tax_rate > Decimal::ONE_HUNDRED {
        return Err(InvoicingError::validation(
            "tax_rate must be between 0 and 100",
        ));
    }
    if input.tax_rate.normalize().scale() > TAX_RATE_SCALE {
        return Err(InvoicingError::validation(format!(
            "tax_rate allows at most {} decimal places",
            TAX_RATE_SCALE
        )));
    }

    let issue_date = input.issue_date.unwrap_or(today);
    if let Some(due_date) = input.due_date {
        if due_date < issue_date {
            return Err(InvoicingError::validation(
                "due_date cannot be before issue_date",
            ));
        }
    }

    for (index, item) in input.items.iter().enumerate() {
        if item.description.trim().is_empty() {
            return Err(InvoicingError::validation(format!(
                "items[{}].description is required",
                index
            )));
        }
        if item.quantity < Decimal::ZERO {
            return Err(InvoicingError::validation(format!(
                "items[{}].quantity cannot be negative",
                index
            )));
        }
        if item.unit_price < Decimal::ZERO {
            return Err(InvoicingError::validation(format!(
                "items[{}].unit_price cannot be negative",
                index
            )));
        }
        check_amount(&format!("items[{}].quantity", index), item.quantity)?;
        check_amount(&format!("items[{}].unit_price", index), item.unit_price)?;
    }

    compute_totals(&input.items, input.tax_rate)
}
