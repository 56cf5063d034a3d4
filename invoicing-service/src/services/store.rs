//! Storage abstraction for invoices, their line items and the collaborator
//! records the invoice pipeline reads or updates.

use crate::models::{
    Business, Contact, CreateInvoice, CreateInvoiceItem, DocumentArtifacts, Invoice,
    InvoiceDetails, InvoiceItem, InvoiceStatus, ReplacedInvoice,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;

/// Transactional store backing the invoice pipeline.
///
/// `scope` arguments list the business ids the caller belongs to; scoped
/// reads and writes treat an invoice outside that set as missing.
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;

    /// Atomically advance the durable invoice counter and return the new value.
    async fn next_invoice_sequence(&self) -> Result<i64, AppError>;

    async fn business_ids_for_user(&self, user_id: &str) -> Result<Vec<Uuid>, AppError>;

    async fn get_business(&self, business_id: Uuid) -> Result<Option<Business>, AppError>;

    async fn get_contact(
        &self,
        business_id: Uuid,
        contact_id: Uuid,
    ) -> Result<Option<Contact>, AppError>;

    /// Add the deltas to a contact's aggregates, clamping both at zero.
    async fn apply_contact_delta(
        &self,
        contact_id: Uuid,
        count_delta: i32,
        value_delta: Decimal,
    ) -> Result<Option<Contact>, AppError>;

    /// Insert a draft invoice and its items in one transaction.
    async fn create_invoice(
        &self,
        input: &CreateInvoice,
        items: &[CreateInvoiceItem],
    ) -> Result<(Invoice, Vec<InvoiceItem>), AppError>;

    async fn get_invoice(
        &self,
        scope: &[Uuid],
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError>;

    async fn list_invoices(&self, scope: &[Uuid]) -> Result<Vec<Invoice>, AppError>;

    async fn get_items(&self, invoice_id: Uuid) -> Result<Vec<InvoiceItem>, AppError>;

    /// Overwrite an invoice's content and replace all of its items in one
    /// transaction. The invoice returns to draft and loses its rendered
    /// documents; its number is kept.
    async fn replace_invoice(
        &self,
        scope: &[Uuid],
        invoice_id: Uuid,
        details: &InvoiceDetails,
        items: &[CreateInvoiceItem],
    ) -> Result<Option<ReplacedInvoice>, AppError>;

    async fn set_status(
        &self,
        invoice_id: Uuid,
        status: InvoiceStatus,
    ) -> Result<Option<Invoice>, AppError>;

    /// Mark the invoice sent and record how and to whom.
    async fn record_sent(
        &self,
        invoice_id: Uuid,
        method: &str,
        recipients: &str,
    ) -> Result<Option<Invoice>, AppError>;

    async fn save_documents(
        &self,
        invoice_id: Uuid,
        artifacts: &DocumentArtifacts,
    ) -> Result<Option<Invoice>, AppError>;

    /// Delete the items and then the invoice in one transaction, returning
    /// the deleted invoice.
    async fn delete_invoice(
        &self,
        scope: &[Uuid],
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError>;
}
