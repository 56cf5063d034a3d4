//! Contact and business records read by invoicing-service.
//!
//! Both are owned by other parts of the back-office; this service only reads
//! them, apart from the contact's running invoice aggregates.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Contact with its denormalized invoice aggregates.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Contact {
    pub contact_id: Uuid,
    pub business_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub postcode: Option<String>,
    pub tax_number: Option<String>,
    pub invoice_count: i32,
    pub total_value: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Business issuing invoices; the seller on rendered documents.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Business {
    pub business_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub postcode: Option<String>,
    pub tax_number: Option<String>,
    pub iban: Option<String>,
}
