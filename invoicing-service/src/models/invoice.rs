//! Invoice model for invoicing-service.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use sqlx::FromRow;
use uuid::Uuid;

/// Invoice status.
///
/// `draft -> validated -> sent`. Only an edit moves an invoice back to draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Validated,
    Sent,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Validated => "validated",
            InvoiceStatus::Sent => "sent",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "validated" => InvoiceStatus::Validated,
            "sent" => InvoiceStatus::Sent,
            _ => InvoiceStatus::Draft,
        }
    }

    /// Whether the invoice may be handed to a delivery channel.
    pub fn can_send(&self) -> bool {
        matches!(self, InvoiceStatus::Validated | InvoiceStatus::Sent)
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invoice record.
///
/// Client fields are a snapshot taken when the invoice was written, not a
/// live view of the contact.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
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
    pub pdf_content: Option<String>,
    pub xml_content: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub sent_method: Option<String>,
    pub sent_to: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Invoice {
    pub fn status(&self) -> InvoiceStatus {
        InvoiceStatus::from_string(&self.status)
    }
}

/// Client snapshot copied onto an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSnapshot {
    pub name: String,
    pub email: Option<String>,
    pub street: String,
    pub city: String,
    pub postcode: String,
    pub tax_number: Option<String>,
}

/// Editable invoice content shared by create and edit.
#[derive(Debug, Clone)]
pub struct InvoiceDetails {
    pub contact_id: Option<Uuid>,
    pub client: ClientSnapshot,
    pub currency: String,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub notes: Option<String>,
    pub terms: Option<String>,
}

/// Input for creating an invoice.
#[derive(Debug, Clone)]
pub struct CreateInvoice {
    pub business_id: Uuid,
    pub invoice_number: String,
    pub details: InvoiceDetails,
}

/// Result of replacing an invoice's content and items in one transaction.
#[derive(Debug, Clone)]
pub struct ReplacedInvoice {
    /// Row as it was before the edit, read under the row lock.
    pub previous: Invoice,
    pub invoice: Invoice,
    pub items: Vec<super::InvoiceItem>,
}

/// Create or edit input that passed request validation.
///
/// Optional totals are derived from the items; snapshot fields the caller
/// left empty are filled from the linked contact.
#[derive(Debug, Clone)]
pub struct InvoiceDraft {
    pub business_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
    pub client: ClientSnapshot,
    pub currency: Option<String>,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub subtotal: Option<Decimal>,
    pub tax: Option<Decimal>,
    pub total: Option<Decimal>,
    pub notes: Option<String>,
    pub terms: Option<String>,
    pub items: Vec<super::CreateInvoiceItem>,
}

impl InvoiceDraft {
    /// Fails with 400 when the totals do not fit the `NUMERIC(18, 2)`
    /// money columns.
    pub fn into_details(
        self,
        default_currency: &str,
        contact: Option<&super::Contact>,
    ) -> Result<(InvoiceDetails, Vec<super::CreateInvoiceItem>), AppError> {
        let out_of_range =
            || AppError::BadRequest(anyhow::anyhow!("Invoice amounts exceed the supported range"));

        let computed = super::InvoiceTotals::from_items(&self.items).ok_or_else(out_of_range)?;
        let subtotal = self.subtotal.unwrap_or(computed.subtotal);
        let tax = self.tax.unwrap_or(computed.tax);
        let total = match self.total {
            Some(total) => total,
            None => subtotal.checked_add(tax).ok_or_else(out_of_range)?,
        };

        let limit = super::numeric_limit(18, 2);
        if [subtotal, tax, total].iter().any(|amount| amount.abs() >= limit) {
            return Err(out_of_range());
        }

        let mut client = self.client;
        if let Some(contact) = contact {
            if client.email.is_none() {
                client.email = contact.email.clone();
            }
            if client.tax_number.is_none() {
                client.tax_number = contact.tax_number.clone();
            }
        }

        let details = InvoiceDetails {
            contact_id: self.contact_id,
            client,
            currency: self
                .currency
                .unwrap_or_else(|| default_currency.to_string()),
            issue_date: self.issue_date,
            due_date: self.due_date,
            subtotal,
            tax,
            total,
            notes: self.notes,
            terms: self.terms,
        };
        Ok((details, self.items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Contact, CreateInvoiceItem};

    fn draft() -> InvoiceDraft {
        InvoiceDraft {
            business_id: None,
            contact_id: None,
            client: ClientSnapshot {
                name: "Acme GmbH".to_string(),
                email: None,
                street: "Main Street 1".to_string(),
                city: "Berlin".to_string(),
                postcode: "10115".to_string(),
                tax_number: None,
            },
            currency: None,
            issue_date: None,
            due_date: None,
            subtotal: None,
            tax: None,
            total: None,
            notes: None,
            terms: None,
            items: vec![CreateInvoiceItem {
                description: "Widget".to_string(),
                quantity: Decimal::from(2),
                unit_price: Decimal::from(50),
                tax_rate: Decimal::from(10),
            }],
        }
    }

    #[test]
    fn totals_default_to_item_sums() {
        let (details, items) = draft().into_details("EUR", None).unwrap();
        assert_eq!(details.subtotal, Decimal::from(100));
        assert_eq!(details.tax, Decimal::from(10));
        assert_eq!(details.total, Decimal::from(110));
        assert_eq!(details.currency, "EUR");
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn explicit_totals_are_kept() {
        let mut draft = draft();
        draft.total = Some(Decimal::from(120));
        let (details, _) = draft.into_details("EUR", None).unwrap();
        assert_eq!(details.total, Decimal::from(120));
    }

    #[test]
    fn totals_beyond_money_columns_are_rejected() {
        let mut draft = draft();
        draft.items[0].quantity = Decimal::from(10_000_000_000_000i64);
        draft.items[0].unit_price = Decimal::from(10_000);

        let result = draft.into_details("EUR", None);

        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[test]
    fn snapshot_gaps_filled_from_contact() {
        let contact = Contact {
            contact_id: Uuid::new_v4(),
            business_id: Uuid::new_v4(),
            name: "Acme".to_string(),
            email: Some("billing@acme.test".to_string()),
            street: None,
            city: None,
            postcode: None,
            tax_number: Some("DE999".to_string()),
            invoice_count: 0,
            total_value: Decimal::ZERO,
            created_at: Utc::now(),
        };
        let (details, _) = draft().into_details("EUR", Some(&contact)).unwrap();
        assert_eq!(details.client.email.as_deref(), Some("billing@acme.test"));
        assert_eq!(details.client.tax_number.as_deref(), Some("DE999"));
        assert_eq!(details.client.name, "Acme GmbH");
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [InvoiceStatus::Draft, InvoiceStatus::Validated, InvoiceStatus::Sent] {
            assert_eq!(InvoiceStatus::from_string(status.as_str()), status);
        }
        assert!(!InvoiceStatus::Draft.can_send());
        assert!(InvoiceStatus::Validated.can_send());
        assert!(InvoiceStatus::Sent.can_send());
    }
}
