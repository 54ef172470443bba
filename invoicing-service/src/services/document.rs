//! Invoice document rendering.

use crate::models::{InvoiceDetail, InvoiceStatus};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::fmt::Write;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Failed to render invoice: {0}")]
pub struct RenderError(pub String);

/// Downloadable invoice file.
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait InvoiceRenderer: Send + Sync {
    async fn render(&self, invoice: &InvoiceDetail) -> Result<RenderedDocument, RenderError>;
}

/// Self-contained HTML invoice. Print-to-PDF happens outside this service.
#[derive(Default)]
pub struct HtmlInvoiceRenderer;

fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn money(amount: Decimal, currency: &str) -> String {
    format!("{:.2} {}", amount, currency)
}

impl HtmlInvoiceRenderer {
    fn html(&self, detail: &InvoiceDetail) -> Result<String, std::fmt::Error> {
        let inv = &detail.invoice;
        let mut html = String::new();

        writeln!(html, "<!DOCTYPE html>")?;
        writeln!(html, "<html><head><meta charset=\"utf-8\">")?;
        writeln!(html, "<title>Invoice {}</title>", escape(&inv.invoice_number))?;
        writeln!(
            html,
            "<style>body{{font-family:sans-serif}}table{{border-collapse:collapse;width:100%}}\
             td,th{{border-bottom:1px solid #ddd;padding:4px;text-align:left}}\
             .num{{text-align:right}}</style>"
        )?;
        writeln!(html, "</head><body>")?;
        writeln!(html, "<h1>Invoice {}</h1>", escape(&inv.invoice_number))?;
        if inv.status == InvoiceStatus::Paid {
            writeln!(html, "<p class=\"stamp\">PAID</p>")?;
        }
        writeln!(html, "<p>Issued: {}</p>", inv.issue_date)?;
        if let Some(due) = inv.due_date {
            writeln!(html, "<p>Due: {}</p>", due)?;
        }

        writeln!(html, "<h2>Bill to</h2><p>{}", escape(&inv.client_name))?;
        if let Some(email) = &inv.client_email {
            writeln!(html, "<br>{}", escape(email))?;
        }
        if let Some(address) = &inv.client_address {
            writeln!(html, "<br>{}", escape(address))?;
        }
        writeln!(html, "</p>")?;

        writeln!(
            html,
            "<table><thead><tr><th>Description</th><th class=\"num\">Qty</th>\
             <th class=\"num\">Unit price</th><th class=\"num\">Amount</th></tr></thead><tbody>"
        )?;
        for item in &detail.items {
            writeln!(
                html,
                "<tr><td>{}</td><td class=\"num\">{}</td><td class=\"num\">{}</td><td class=\"num\">{}</td></tr>",
                escape(&item.description),
                item.quantity.normalize(),
                money(item.unit_price, &inv.currency),
                money(item.amount, &inv.currency),
            )?;
        }
        writeln!(html, "</tbody></table>")?;

        writeln!(html, "<table class=\"totals\">")?;
        writeln!(
            html,
            "<tr><td>Subtotal</td><td class=\"num\">{}</td></tr>",
            money(inv.subtotal, &inv.currency)
        )?;
        writeln!(
            html,
            "<tr><td>Tax ({}%)</td><td class=\"num\">{}</td></tr>",
            inv.tax_rate.normalize(),
            money(inv.tax_amount, &inv.currency)
        )?;
        writeln!(
            html,
            "<tr><th>Total</th><th class=\"num\">{}</th></tr>",
            money(inv.grand_total, &inv.currency)
        )?;
        writeln!(
            html,
            "<tr><td>Paid</td><td class=\"num\">{}</td></tr>",
            money(detail.amount_paid, &inv.currency)
        )?;
        writeln!(
            html,
            "<tr><th>Balance due</th><th class=\"num\">{}</th></tr>",
            money(detail.balance_due, &inv.currency)
        )?;
        writeln!(html, "</table>")?;

        if let Some(notes) = &inv.notes {
            writeln!(html, "<h2>Notes</h2><p>{}</p>", escape(notes))?;
        }
        writeln!(html, "</body></html>")?;

        Ok(html)
    }
}

#[async_trait]
impl InvoiceRenderer for HtmlInvoiceRenderer {
    async fn render(&self, invoice: &InvoiceDetail) -> Result<RenderedDocument, RenderError> {
        let html = self
            .html(invoice)
            .map_err(|e| RenderError(e.to_string()))?;

        Ok(RenderedDocument {
            file_name: format!("{}.html", invoice.invoice.invoice_number),
            content_type: "text/html; charset=utf-8".to_string(),
            bytes: html.into_bytes(),
        })
    }
}
