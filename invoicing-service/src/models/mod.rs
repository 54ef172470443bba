//! Domain models for invoicing-service.

mod activity;
mod invoice;
mod line_item;
mod membership;
mod payment;

pub use activity::{actions, ActivityEntry, Notification};
pub use invoice::{
    format_invoice_number, InvalidTransition, Invoice, InvoiceContent, InvoiceDetail,
    InvoiceInput, InvoiceStatus, InvoiceTotals, ListInvoicesFilter, NewInvoice, SendInvoiceRequest,
    Transition, UpdateStatusRequest,
};
pub use line_item::{LineItem, LineItemInput};
pub use membership::Role;
pub use payment::{
    total_incoming, NewPayment, Payment, PaymentDirection, PaymentOutcome, PaymentSource,
    RecordPaymentInput, StatusChange,
};
