//! Outbound mail transport.

use crate::config::SmtpConfig;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Attachment, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use secrecy::ExposeSecret;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Mail transport not enabled: {0}")]
    NotEnabled(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Send error: {0}")]
    SendFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailAttachment {
    pub filename: String,
    pub content: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    /// Display name for the sender; the address itself comes from config.
    pub from_name: Option<String>,
    pub reply_to: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub html_body: String,
    pub attachments: Vec<EmailAttachment>,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Hand the message to the transport and return its message id.
    async fn send(&self, email: &OutgoingEmail) -> Result<String, MailError>;
    fn is_enabled(&self) -> bool;
}

pub struct SmtpMailer {
    config: SmtpConfig,
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Result<Self, MailError> {
        if !config.enabled {
            return Ok(Self {
                config,
                transport: None,
            });
        }

        let creds = Credentials::new(
            config.user.clone(),
            config.password.expose_secret().clone(),
        );

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| MailError::Configuration(format!("Failed to create SMTP relay: {}", e)))?
            .port(config.port)
            .credentials(creds)
            .build();

        Ok(Self {
            config,
            transport: Some(transport),
        })
    }
}

fn mailbox(address: &str) -> Result<Mailbox, MailError> {
    address
        .parse()
        .map_err(|e| MailError::InvalidRecipient(format!("{}: {}", address, e)))
}

/// Build the MIME message: an HTML body followed by any attachments.
pub fn build_message(from: Mailbox, email: &OutgoingEmail) -> Result<Message, MailError> {
    let mut builder = Message::builder().from(from).subject(&email.subject);

    for to in &email.to {
        builder = builder.to(mailbox(to)?);
    }
    for cc in &email.cc {
        builder = builder.cc(mailbox(cc)?);
    }
    for bcc in &email.bcc {
        builder = builder.bcc(mailbox(bcc)?);
    }
    if let Some(reply_to) = &email.reply_to {
        let reply_mailbox: Mailbox = reply_to.parse().map_err(|e| {
            MailError::Configuration(format!("Invalid reply-to address: {}", e))
        })?;
        builder = builder.reply_to(reply_mailbox);
    }

    let mut body = MultiPart::mixed().singlepart(
        SinglePart::builder()
            .header(ContentType::TEXT_HTML)
            .body(email.html_body.clone()),
    );
    for attachment in &email.attachments {
        let content_type = ContentType::parse(&attachment.content_type).map_err(|e| {
            MailError::SendFailed(format!(
                "Invalid content type '{}': {}",
                attachment.content_type, e
            ))
        })?;
        body = body.singlepart(
            Attachment::new(attachment.filename.clone())
                .body(attachment.content.clone(), content_type),
        );
    }

    builder
        .multipart(body)
        .map_err(|e| MailError::SendFailed(format!("Failed to build message: {}", e)))
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<String, MailError> {
        if !self.config.enabled {
            return Err(MailError::NotEnabled(
                "SMTP mail transport is not enabled".to_string(),
            ));
        }

        let transport = self.transport.as_ref().ok_or_else(|| {
            MailError::Configuration("SMTP transport not initialized".to_string())
        })?;

        let from_name = email.from_name.as_ref().unwrap_or(&self.config.from_name);
        let from: Mailbox = format!("{} <{}>", from_name, self.config.from_email)
            .parse()
            .map_err(|e| MailError::Configuration(format!("Invalid from address: {}", e)))?;

        let message = build_message(from, email)?;

        let response = transport
            .send(message)
            .await
            .map_err(|e| MailError::SendFailed(format!("Failed to send email: {}", e)))?;

        let message_id = response
            .message()
            .next()
            .map(|s| s.to_string())
            .unwrap_or_default();

        tracing::info!(
            recipients = email.to.len(),
            subject = %email.subject,
            attachments = email.attachments.len(),
            "Email sent successfully"
        );

        Ok(message_id)
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

/// Records messages instead of sending them.
pub struct MockMailer {
    enabled: bool,
    send_count: AtomicU64,
    sent: Mutex<Vec<OutgoingEmail>>,
}

impl MockMailer {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            send_count: AtomicU64::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn send_count(&self) -> u64 {
        self.send_count.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<String, MailError> {
        if !self.enabled {
            return Err(MailError::NotEnabled(
                "Mock mail transport is not enabled".to_string(),
            ));
        }

        let count = self.send_count.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(email.clone());
        }

        tracing::info!(
            recipients = email.to.len(),
            subject = %email.subject,
            "[MOCK] Email would be sent"
        );

        Ok(format!("mock-email-{}", count))
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email() -> OutgoingEmail {
        OutgoingEmail {
            from_name: Some("Seller Ltd".to_string()),
            reply_to: Some("office@seller.test".to_string()),
            to: vec!["billing@acme.test".to_string()],
            cc: vec!["cfo@acme.test".to_string()],
            bcc: vec![],
            subject: "Invoice INV-000001".to_string(),
            html_body: "<p>Please find attached.</p>".to_string(),
            attachments: vec![EmailAttachment {
                filename: "INV-000001.pdf".to_string(),
                content: b"%PDF-1.7".to_vec(),
                content_type: "application/pdf".to_string(),
            }],
        }
    }

    #[test]
    fn builds_message_with_attachment() {
        let from: Mailbox = "Seller Ltd <invoices@seller.test>".parse().unwrap();
        let message = build_message(from, &email()).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("Subject: Invoice INV-000001"));
        assert!(raw.contains("INV-000001.pdf"));
        assert!(raw.contains("Cc: cfo@acme.test"));
    }

    #[test]
    fn rejects_invalid_recipient() {
        let from: Mailbox = "invoices@seller.test".parse().unwrap();
        let mut email = email();
        email.to = vec!["not-an-address".to_string()];
        assert!(matches!(
            build_message(from, &email),
            Err(MailError::InvalidRecipient(_))
        ));
    }

    #[tokio::test]
    async fn mock_mailer_records_messages() {
        let mailer = MockMailer::new(true);
        let id = mailer.send(&email()).await.unwrap();
        assert_eq!(id, "mock-email-1");
        assert_eq!(mailer.send_count(), 1);
        assert_eq!(mailer.sent()[0].attachments.len(), 1);
    }

    #[tokio::test]
    async fn disabled_smtp_refuses_to_send() {
        let mailer = SmtpMailer::new(SmtpConfig {
            host: "smtp.test.local".to_string(),
            port: 587,
            user: "test".to_string(),
            password: secrecy::Secret::new("test".to_string()),
            from_email: "invoices@seller.test".to_string(),
            from_name: "Invoicing".to_string(),
            enabled: false,
        })
        .unwrap();
        assert!(!mailer.is_enabled());
        assert!(matches!(
            mailer.send(&email()).await,
            Err(MailError::NotEnabled(_))
        ));
    }
}
