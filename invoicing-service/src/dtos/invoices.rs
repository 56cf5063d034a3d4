use crate::models::{
    numeric_limit, ClientSnapshot, CreateInvoiceItem, Invoice, InvoiceDraft, InvoiceItem,
    ValidationCheck,
};
use crate::services::{DeliveryChannel, DeliveryReceipt, EmailOptions, RenderWarning, SendRequest};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceItemRequest {
    #[validate(length(min = 1, message = "Item description is required"))]
    #[serde(default)]
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    #[serde(default)]
    pub tax_rate: Decimal,
}

/// Body of create, and of edit together with the invoice id.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceRequest {
    pub business_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,

    #[validate(length(min = 1, message = "Client name is required"))]
    #[serde(default)]
    pub client_name: String,
    #[validate(email(message = "Invalid client email"))]
    #[serde(default, deserialize_with = "blank_as_none")]
    pub client_email: Option<String>,
    #[validate(length(min = 1, message = "Client street is required"))]
    #[serde(default)]
    pub client_street: String,
    #[validate(length(min = 1, message = "Client city is required"))]
    #[serde(default)]
    pub client_city: String,
    #[validate(length(min = 1, message = "Client postcode is required"))]
    #[serde(default)]
    pub client_postcode: String,
    pub client_tax_number: Option<String>,

    #[validate(length(equal = 3, message = "Currency must be a 3-letter ISO code"))]
    #[serde(default, deserialize_with = "blank_as_none")]
    pub currency: Option<String>,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,

    pub subtotal: Option<Decimal>,
    pub tax: Option<Decimal>,
    pub total: Option<Decimal>,

    pub notes: Option<String>,
    pub terms: Option<String>,

    #[validate(nested)]
    #[serde(default)]
    pub items: Vec<InvoiceItemRequest>,
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Blank strings count as absent, so field rules only see real values.
fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(blank_to_none(Option::<String>::deserialize(deserializer)?))
}

impl InvoiceRequest {
    /// Checks the derive cannot express, then conversion into a draft.
    pub fn into_draft(self) -> Result<InvoiceDraft, AppError> {
        for (name, value) in [
            ("subtotal", self.subtotal),
            ("tax", self.tax),
            ("total", self.total),
        ] {
            if value.is_some_and(|v| v < Decimal::ZERO) {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "{} must not be negative",
                    name
                )));
            }
        }

        let required = [
            ("Client name", &self.client_name),
            ("Client street", &self.client_street),
            ("Client city", &self.client_city),
            ("Client postcode", &self.client_postcode),
        ];
        if let Some((name, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(AppError::BadRequest(anyhow::anyhow!("{} is required", name)));
        }

        let mut items = Vec::with_capacity(self.items.len());
        for (index, item) in self.items.into_iter().enumerate() {
            let line = index + 1;
            if item.description.trim().is_empty() {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Item {}: description is required",
                    line
                )));
            }
            if item.quantity <= Decimal::ZERO {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Item {}: quantity must be greater than zero",
                    line
                )));
            }
            if item.unit_price < Decimal::ZERO {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Item {}: unit price must not be negative",
                    line
                )));
            }
            if item.tax_rate < Decimal::ZERO {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Item {}: tax rate must not be negative",
                    line
                )));
            }
            // quantity and unit_price are NUMERIC(18, 4), tax_rate NUMERIC(7, 4)
            let amount_limit = numeric_limit(18, 4);
            if item.quantity >= amount_limit || item.unit_price >= amount_limit {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Item {}: quantity and unit price must be below {}",
                    line,
                    amount_limit
                )));
            }
            if item.tax_rate >= numeric_limit(7, 4) {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Item {}: tax rate is out of range",
                    line
                )));
            }
            items.push(CreateInvoiceItem {
                description: item.description.trim().to_string(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                tax_rate: item.tax_rate,
            });
        }
        if items.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "At least one line item is required"
            )));
        }

        Ok(InvoiceDraft {
            business_id: self.business_id,
            contact_id: self.contact_id,
            client: ClientSnapshot {
                name: self.client_name.trim().to_string(),
                email: blank_to_none(self.client_email),
                street: self.client_street.trim().to_string(),
                city: self.client_city.trim().to_string(),
                postcode: self.client_postcode.trim().to_string(),
                tax_number: blank_to_none(self.client_tax_number),
            },
            currency: blank_to_none(self.currency).map(|c| c.to_uppercase()),
            issue_date: self.issue_date,
            due_date: self.due_date,
            subtotal: self.subtotal,
            tax: self.tax,
            total: self.total,
            notes: blank_to_none(self.notes),
            terms: blank_to_none(self.terms),
            items,
        })
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct EditInvoiceRequest {
    pub id: Uuid,
    #[serde(flatten)]
    #[validate(nested)]
    pub invoice: InvoiceRequest,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SendInvoiceRequest {
    #[serde(alias = "channel")]
    pub method: DeliveryChannel,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub message: String,
    #[serde(default = "default_true")]
    pub attach_pdf: bool,
    #[serde(default = "default_true")]
    pub attach_xml: bool,
}

impl From<SendInvoiceRequest> for SendRequest {
    fn from(req: SendInvoiceRequest) -> Self {
        match req.method {
            DeliveryChannel::Email => SendRequest::Email(EmailOptions {
                recipients: req.recipients,
                cc: req.cc,
                bcc: req.bcc,
                subject: req.subject,
                message: req.message,
                attach_pdf: req.attach_pdf,
                attach_xml: req.attach_xml,
            }),
            DeliveryChannel::Sftp => SendRequest::Sftp,
            DeliveryChannel::Portal => SendRequest::Portal,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceItemResponse {
    pub id: Uuid,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub tax_rate: Decimal,
    pub position: i32,
    pub net_amount: Option<Decimal>,
}

impl From<InvoiceItem> for InvoiceItemResponse {
    fn from(item: InvoiceItem) -> Self {
        Self {
            net_amount: item.net_amount().map(|net| net.round_dp(2)),
            id: item.item_id,
            description: item.description,
            quantity: item.quantity,
            unit_price: item.unit_price,
            tax_rate: item.tax_rate,
            position: item.position,
        }
    }
}

/// Invoice as returned to clients. Document payloads are served by the
/// pdf and xml endpoints, not inlined.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceResponse {
    pub id: Uuid,
    pub business_id: Uuid,
    pub contact_id: Option<Uuid>,
    pub invoice_number: String,
    pub status: String,
    pub client_name: String,
    pub client_email: Option<String>,
    pub client_street: String,
    pub client_city: String,
    pub client_postcode: String,
    pub client_tax_number: Option<String>,
    pub currency: String,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub notes: Option<String>,
    pub terms: Option<String>,
    pub pdf_url: Option<String>,
    pub xml_url: Option<String>,
    pub has_pdf: bool,
    pub has_xml: bool,
    pub sent_at: Option<DateTime<Utc>>,
    pub sent_method: Option<String>,
    pub sent_to: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<InvoiceItemResponse>>,
}

impl InvoiceResponse {
    pub fn with_items(invoice: Invoice, items: Vec<InvoiceItem>) -> Self {
        let mut response = Self::from(invoice);
        response.items = Some(items.into_iter().map(Into::into).collect());
        response
    }
}

impl From<Invoice> for InvoiceResponse {
    fn from(invoice: Invoice) -> Self {
        Self {
            has_pdf: invoice.pdf_content.is_some() || invoice.pdf_url.is_some(),
            has_xml: invoice.xml_content.is_some() || invoice.xml_url.is_some(),
            id: invoice.invoice_id,
            business_id: invoice.business_id,
            contact_id: invoice.contact_id,
            invoice_number: invoice.invoice_number,
            status: invoice.status,
            client_name: invoice.client_name,
            client_email: invoice.client_email,
            client_street: invoice.client_street,
            client_city: invoice.client_city,
            client_postcode: invoice.client_postcode,
            client_tax_number: invoice.client_tax_number,
            currency: invoice.currency,
            issue_date: invoice.issue_date,
            due_date: invoice.due_date,
            subtotal: invoice.subtotal,
            tax: invoice.tax,
            total: invoice.total,
            notes: invoice.notes,
            terms: invoice.terms,
            pdf_url: invoice.pdf_url,
            xml_url: invoice.xml_url,
            sent_at: invoice.sent_at,
            sent_method: invoice.sent_method,
            sent_to: invoice.sent_to,
            created_at: invoice.created_at,
            updated_at: invoice.updated_at,
            items: None,
        }
    }
}

/// Create and edit reply. `warning` is present when the local write
/// succeeded but document rendering did not.
#[derive(Debug, Serialize)]
pub struct InvoiceMutationResponse {
    pub success: bool,
    pub invoice: InvoiceResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<RenderWarning>,
}

#[derive(Debug, Serialize)]
pub struct InvoiceDetailResponse {
    pub success: bool,
    pub invoice: InvoiceResponse,
}

#[derive(Debug, Serialize)]
pub struct InvoiceListResponse {
    pub success: bool,
    pub count: usize,
    pub invoices: Vec<InvoiceResponse>,
}

#[derive(Debug, Serialize)]
pub struct ValidateInvoiceResponse {
    pub success: bool,
    pub valid: bool,
    pub status: String,
    pub checks: Vec<ValidationCheck>,
}

#[derive(Debug, Serialize)]
pub struct SendInvoiceResponse {
    pub success: bool,
    pub invoice: InvoiceResponse,
    pub delivery: DeliveryReceipt,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteInvoiceResponse {
    pub success: bool,
    pub id: Uuid,
    pub invoice_number: String,
}
