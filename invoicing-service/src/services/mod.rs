//! Services module for invoicing-service.

pub mod activity;
pub mod database;
pub mod document;
pub mod lifecycle;
pub mod mailer;
pub mod memory;
pub mod metrics;
pub mod payments;
pub mod permissions;
pub mod settlement;
pub mod store;
pub mod totals;

pub use activity::{ActivitySink, StoreActivitySink};
pub use database::PgStore;
pub use document::{HtmlInvoiceRenderer, InvoiceRenderer, RenderedDocument};
pub use lifecycle::{InvoiceLifecycle, SendOutcome};
pub use mailer::{DeliveryError, DeliveryReceipt, InvoiceEmail, InvoiceMailer, LogMailer, SmtpMailer};
pub use memory::MemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use payments::PaymentRecorder;
pub use permissions::{MembershipPermissions, PermissionChecker, PermissionDecision};
pub use store::InvoiceStore;
