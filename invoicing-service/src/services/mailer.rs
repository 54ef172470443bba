//! Outbound invoice email.

use crate::config::SmtpConfig;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Attachment, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use secrecy::ExposeSecret;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Mailer not enabled")]
    NotEnabled,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Send error: {0}")]
    SendFailed(String),
}

/// Invoice email with the rendered document attached.
#[derive(Debug, Clone)]
pub struct InvoiceEmail {
    pub to: String,
    pub subject: String,
    pub body_text: String,
    pub attachment_name: String,
    pub attachment_type: String,
    pub attachment: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    pub provider_id: Option<String>,
}

#[async_trait]
pub trait InvoiceMailer: Send + Sync {
    /// Returns only once the message has been accepted for delivery.
    async fn send(&self, email: InvoiceEmail) -> Result<DeliveryReceipt, DeliveryError>;
}

/// Delivers through an SMTP relay with STARTTLS.
pub struct SmtpMailer {
    config: SmtpConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Result<Self, DeliveryError> {
        if !config.enabled {
            return Err(DeliveryError::NotEnabled);
        }

        let creds = Credentials::new(
            config.user.clone(),
            config.password.expose_secret().clone(),
        );

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| {
                DeliveryError::Configuration(format!("Failed to create SMTP relay: {}", e))
            })?
            .port(config.port)
            .credentials(creds)
            .build();

        Ok(Self { config, transport })
    }
}

#[async_trait]
impl InvoiceMailer for SmtpMailer {
    async fn send(&self, email: InvoiceEmail) -> Result<DeliveryReceipt, DeliveryError> {
        let from_mailbox: Mailbox = format!("{} <{}>", self.config.from_name, self.config.from_email)
            .parse()
            .map_err(|e| DeliveryError::Configuration(format!("Invalid from address: {}", e)))?;

        let to_mailbox: Mailbox = email
            .to
            .parse()
            .map_err(|e| DeliveryError::InvalidRecipient(format!("{}: {}", email.to, e)))?;

        let content_type = ContentType::parse(&email.attachment_type)
            .map_err(|e| DeliveryError::SendFailed(format!("Invalid attachment type: {}", e)))?;

        let message = Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(&email.subject)
            .multipart(
                MultiPart::mixed()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(email.body_text.clone()),
                    )
                    .singlepart(
                        Attachment::new(email.attachment_name.clone())
                            .body(email.attachment, content_type),
                    ),
            )
            .map_err(|e| DeliveryError::SendFailed(format!("Failed to build message: {}", e)))?;

        let response = self
            .transport
            .send(message)
            .await
            .map_err(|e| DeliveryError::SendFailed(format!("Failed to send email: {}", e)))?;

        let provider_id = response.message().next().map(|s| s.to_string());

        info!(to = %email.to, subject = %email.subject, "Invoice email sent");

        Ok(DeliveryReceipt { provider_id })
    }
}

/// Logs instead of sending. Used when SMTP is disabled.
#[derive(Default)]
pub struct LogMailer;

#[async_trait]
impl InvoiceMailer for LogMailer {
    async fn send(&self, email: InvoiceEmail) -> Result<DeliveryReceipt, DeliveryError> {
        info!(
            to = %email.to,
            subject = %email.subject,
            attachment = %email.attachment_name,
            bytes = email.attachment.len(),
            "[LOG] Invoice email would be sent"
        );
        Ok(DeliveryReceipt { provider_id: None })
    }
}
