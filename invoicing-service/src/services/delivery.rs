//! Delivery of validated invoices to the client.
//!
//! Email is the only channel with a real transport. SFTP and portal delivery
//! are accepted but do nothing yet; their receipts say `delivered: false`.

use crate::models::{Business, Invoice};
use crate::services::mailer::{EmailAttachment, MailError, Mailer, OutgoingEmail};
use crate::services::metrics::DELIVERIES_TOTAL;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryChannel {
    Email,
    Sftp,
    Portal,
}

impl DeliveryChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryChannel::Email => "email",
            DeliveryChannel::Sftp => "sftp",
            DeliveryChannel::Portal => "portal",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EmailOptions {
    pub recipients: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub message: String,
    pub attach_pdf: bool,
    pub attach_xml: bool,
}

impl EmailOptions {
    /// Reject before any transport call when a required part is blank.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.recipients.iter().all(|r| r.trim().is_empty()) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "At least one recipient is required"
            )));
        }
        if self.subject.trim().is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!("Subject is required")));
        }
        if self.message.trim().is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!("Message is required")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    pub channel: DeliveryChannel,
    pub message_id: Option<String>,
    pub recipients: Vec<String>,
    /// False for placeholder channels that accept but do not deliver.
    pub delivered: bool,
}

impl From<MailError> for AppError {
    fn from(err: MailError) -> Self {
        match err {
            MailError::NotEnabled(_) => AppError::ServiceUnavailable,
            MailError::InvalidRecipient(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            MailError::Configuration(msg) => AppError::EmailError(msg),
            MailError::SendFailed(msg) => AppError::BadGateway(msg),
        }
    }
}

#[derive(Clone)]
pub struct DeliveryDispatcher {
    mailer: Arc<dyn Mailer>,
}

impl DeliveryDispatcher {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }

    #[tracing::instrument(skip_all, fields(invoice_number = %invoice.invoice_number))]
    pub async fn send_email(
        &self,
        invoice: &Invoice,
        business: Option<&Business>,
        options: &EmailOptions,
    ) -> Result<DeliveryReceipt, AppError> {
        options.validate()?;

        let recipients: Vec<String> = non_blank(&options.recipients);
        let email = OutgoingEmail {
            from_name: business.map(|b| b.name.clone()),
            reply_to: business.and_then(|b| b.email.clone()),
            to: recipients.clone(),
            cc: non_blank(&options.cc),
            bcc: non_blank(&options.bcc),
            subject: options.subject.clone(),
            html_body: html_body(&options.message),
            attachments: attachments(invoice, options),
        };

        match self.mailer.send(&email).await {
            Ok(message_id) => {
                DELIVERIES_TOTAL
                    .with_label_values(&["email", "success"])
                    .inc();
                Ok(DeliveryReceipt {
                    channel: DeliveryChannel::Email,
                    message_id: Some(message_id),
                    recipients,
                    delivered: true,
                })
            }
            Err(e) => {
                DELIVERIES_TOTAL
                    .with_label_values(&["email", "failure"])
                    .inc();
                tracing::error!(error = %e, "Invoice email delivery failed");
                Err(e.into())
            }
        }
    }

    pub fn send_placeholder(
        &self,
        invoice: &Invoice,
        channel: DeliveryChannel,
    ) -> DeliveryReceipt {
        DELIVERIES_TOTAL
            .with_label_values(&[channel.as_str(), "stub"])
            .inc();
        tracing::warn!(
            invoice_number = %invoice.invoice_number,
            channel = channel.as_str(),
            "Delivery channel not implemented; invoice accepted without delivery"
        );
        DeliveryReceipt {
            channel,
            message_id: None,
            recipients: Vec::new(),
            delivered: false,
        }
    }
}

fn non_blank(addresses: &[String]) -> Vec<String> {
    addresses
        .iter()
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect()
}

fn attachments(invoice: &Invoice, options: &EmailOptions) -> Vec<EmailAttachment> {
    let mut attachments = Vec::new();

    if options.attach_pdf {
        if let Some(encoded) = &invoice.pdf_content {
            match STANDARD.decode(encoded) {
                Ok(content) => attachments.push(EmailAttachment {
                    filename: format!("{}.pdf", invoice.invoice_number),
                    content,
                    content_type: "application/pdf".to_string(),
                }),
                Err(e) => tracing::warn!(error = %e, "Stored PDF content is not valid base64"),
            }
        }
    }
    if options.attach_xml {
        if let Some(xml) = &invoice.xml_content {
            attachments.push(EmailAttachment {
                filename: format!("{}.xml", invoice.invoice_number),
                content: xml.as_bytes().to_vec(),
                content_type: "application/xml".to_string(),
            });
        }
    }

    attachments
}

fn html_body(message: &str) -> String {
    let escaped = message
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");
    escaped
        .split("\n\n")
        .map(|p| format!("<p>{}</p>", p.replace('\n', "<br>")))
        .collect()
}
