//! In-process store used for local runs without PostgreSQL and in tests.

use crate::models::{
    Business, Contact, CreateInvoice, CreateInvoiceItem, DocumentArtifacts, Invoice,
    InvoiceDetails, InvoiceItem, InvoiceStatus, ReplacedInvoice,
};
use crate::services::store::InvoiceStore;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    businesses: HashMap<Uuid, Business>,
    members: HashMap<String, HashSet<Uuid>>,
    contacts: HashMap<Uuid, Contact>,
    invoices: HashMap<Uuid, Invoice>,
    items: HashMap<Uuid, Vec<InvoiceItem>>,
}

/// Mutex-guarded maps standing in for the relational store.
///
/// A single lock covers every table, so each trait method is atomic.
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
    sequence: AtomicI64,
    fail_contact_updates: AtomicBool,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            sequence: AtomicI64::new(0),
            fail_contact_updates: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, AppError> {
        self.state.lock().map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("In-memory store mutex poisoned: {}", e))
        })
    }

    pub fn insert_business(&self, business: Business) -> Result<(), AppError> {
        self.lock()?
            .businesses
            .insert(business.business_id, business);
        Ok(())
    }

    pub fn add_member(&self, user_id: &str, business_id: Uuid) -> Result<(), AppError> {
        self.lock()?
            .members
            .entry(user_id.to_string())
            .or_default()
            .insert(business_id);
        Ok(())
    }

    pub fn insert_contact(&self, contact: Contact) -> Result<(), AppError> {
        self.lock()?.contacts.insert(contact.contact_id, contact);
        Ok(())
    }

    pub fn contact(&self, contact_id: Uuid) -> Result<Option<Contact>, AppError> {
        Ok(self.lock()?.contacts.get(&contact_id).cloned())
    }

    /// Make every contact aggregate update fail, as an unavailable contacts
    /// table would.
    pub fn fail_contact_updates(&self, fail: bool) {
        self.fail_contact_updates.store(fail, Ordering::SeqCst);
    }

    fn build_items(invoice_id: Uuid, items: &[CreateInvoiceItem]) -> Vec<InvoiceItem> {
        let now = Utc::now();
        items
            .iter()
            .enumerate()
            .map(|(position, item)| InvoiceItem {
                item_id: Uuid::new_v4(),
                invoice_id,
                description: item.description.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                tax_rate: item.tax_rate,
                position: position as i32,
                created_at: now,
            })
            .collect()
    }

    fn update_invoice<F>(&self, invoice_id: Uuid, apply: F) -> Result<Option<Invoice>, AppError>
    where
        F: FnOnce(&mut Invoice),
    {
        let mut state = self.lock()?;
        Ok(state.invoices.get_mut(&invoice_id).map(|invoice| {
            apply(invoice);
            invoice.updated_at = Some(Utc::now());
            invoice.clone()
        }))
    }
}

#[async_trait]
impl InvoiceStore for InMemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        self.lock().map(|_| ())
    }

    async fn next_invoice_sequence(&self) -> Result<i64, AppError> {
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn business_ids_for_user(&self, user_id: &str) -> Result<Vec<Uuid>, AppError> {
        let state = self.lock()?;
        let mut ids: Vec<Uuid> = state
            .members
            .get(user_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        ids.sort();
        Ok(ids)
    }

    async fn get_business(&self, business_id: Uuid) -> Result<Option<Business>, AppError> {
        Ok(self.lock()?.businesses.get(&business_id).cloned())
    }

    async fn get_contact(
        &self,
        business_id: Uuid,
        contact_id: Uuid,
    ) -> Result<Option<Contact>, AppError> {
        Ok(self
            .lock()?
            .contacts
            .get(&contact_id)
            .filter(|c| c.business_id == business_id)
            .cloned())
    }

    async fn apply_contact_delta(
        &self,
        contact_id: Uuid,
        count_delta: i32,
        value_delta: Decimal,
    ) -> Result<Option<Contact>, AppError> {
        if self.fail_contact_updates.load(Ordering::SeqCst) {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "contacts table unavailable"
            )));
        }

        let mut state = self.lock()?;
        Ok(state.contacts.get_mut(&contact_id).map(|contact| {
            contact.invoice_count = (contact.invoice_count + count_delta).max(0);
            contact.total_value = (contact.total_value + value_delta).max(Decimal::ZERO);
            contact.clone()
        }))
    }

    async fn create_invoice(
        &self,
        input: &CreateInvoice,
        items: &[CreateInvoiceItem],
    ) -> Result<(Invoice, Vec<InvoiceItem>), AppError> {
        let mut state = self.lock()?;

        if state
            .invoices
            .values()
            .any(|i| i.invoice_number == input.invoice_number)
        {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Invoice number '{}' already exists",
                input.invoice_number
            )));
        }

        let details = &input.details;
        let invoice = Invoice {
            invoice_id: Uuid::new_v4(),
            business_id: input.business_id,
            contact_id: details.contact_id,
            invoice_number: input.invoice_number.clone(),
            status: InvoiceStatus::Draft.as_str().to_string(),
            client_name: details.client.name.clone(),
            client_email: details.client.email.clone(),
            client_street: details.client.street.clone(),
            client_city: details.client.city.clone(),
            client_postcode: details.client.postcode.clone(),
            client_tax_number: details.client.tax_number.clone(),
            currency: details.currency.clone(),
            issue_date: details.issue_date,
            due_date: details.due_date,
            subtotal: details.subtotal,
            tax: details.tax,
            total: details.total,
            notes: details.notes.clone(),
            terms: details.terms.clone(),
            pdf_url: None,
            xml_url: None,
            pdf_content: None,
            xml_content: None,
            sent_at: None,
            sent_method: None,
            sent_to: None,
            created_at: Utc::now(),
            updated_at: None,
        };
        let items = Self::build_items(invoice.invoice_id, items);

        state.invoices.insert(invoice.invoice_id, invoice.clone());
        state.items.insert(invoice.invoice_id, items.clone());

        Ok((invoice, items))
    }

    async fn get_invoice(
        &self,
        scope: &[Uuid],
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        Ok(self
            .lock()?
            .invoices
            .get(&invoice_id)
            .filter(|i| scope.contains(&i.business_id))
            .cloned())
    }

    async fn list_invoices(&self, scope: &[Uuid]) -> Result<Vec<Invoice>, AppError> {
        let state = self.lock()?;
        let mut invoices: Vec<Invoice> = state
            .invoices
            .values()
            .filter(|i| scope.contains(&i.business_id))
            .cloned()
            .collect();
        invoices.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.invoice_number.cmp(&a.invoice_number))
        });
        Ok(invoices)
    }

    async fn get_items(&self, invoice_id: Uuid) -> Result<Vec<InvoiceItem>, AppError> {
        Ok(self
            .lock()?
            .items
            .get(&invoice_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn replace_invoice(
        &self,
        scope: &[Uuid],
        invoice_id: Uuid,
        details: &InvoiceDetails,
        items: &[CreateInvoiceItem],
    ) -> Result<Option<ReplacedInvoice>, AppError> {
        let mut state = self.lock()?;

        let Some(invoice) = state
            .invoices
            .get_mut(&invoice_id)
            .filter(|i| scope.contains(&i.business_id))
        else {
            return Ok(None);
        };

        let previous = invoice.clone();
        invoice.contact_id = details.contact_id;
        invoice.status = InvoiceStatus::Draft.as_str().to_string();
        invoice.client_name = details.client.name.clone();
        invoice.client_email = details.client.email.clone();
        invoice.client_street = details.client.street.clone();
        invoice.client_city = details.client.city.clone();
        invoice.client_postcode = details.client.postcode.clone();
        invoice.client_tax_number = details.client.tax_number.clone();
        invoice.currency = details.currency.clone();
        invoice.issue_date = details.issue_date;
        invoice.due_date = details.due_date;
        invoice.subtotal = details.subtotal;
        invoice.tax = details.tax;
        invoice.total = details.total;
        invoice.notes = details.notes.clone();
        invoice.terms = details.terms.clone();
        invoice.pdf_url = None;
        invoice.xml_url = None;
        invoice.pdf_content = None;
        invoice.xml_content = None;
        invoice.updated_at = Some(Utc::now());
        let invoice = invoice.clone();

        let items = Self::build_items(invoice_id, items);
        state.items.insert(invoice_id, items.clone());

        Ok(Some(ReplacedInvoice {
            previous,
            invoice,
            items,
        }))
    }

    async fn set_status(
        &self,
        invoice_id: Uuid,
        status: InvoiceStatus,
    ) -> Result<Option<Invoice>, AppError> {
        self.update_invoice(invoice_id, |invoice| {
            invoice.status = status.as_str().to_string();
        })
    }

    async fn record_sent(
        &self,
        invoice_id: Uuid,
        method: &str,
        recipients: &str,
    ) -> Result<Option<Invoice>, AppError> {
        self.update_invoice(invoice_id, |invoice| {
            invoice.status = InvoiceStatus::Sent.as_str().to_string();
            invoice.sent_at = Some(Utc::now());
            invoice.sent_method = Some(method.to_string());
            invoice.sent_to = Some(recipients.to_string());
        })
    }

    async fn save_documents(
        &self,
        invoice_id: Uuid,
        artifacts: &DocumentArtifacts,
    ) -> Result<Option<Invoice>, AppError> {
        self.update_invoice(invoice_id, |invoice| {
            invoice.pdf_url = Some(artifacts.pdf_url.clone());
            invoice.xml_url = Some(artifacts.xml_url.clone());
            invoice.pdf_content = artifacts.pdf_content.clone();
            invoice.xml_content = artifacts.xml_content.clone();
        })
    }

    async fn delete_invoice(
        &self,
        scope: &[Uuid],
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        let mut state = self.lock()?;

        let in_scope = state
            .invoices
            .get(&invoice_id)
            .is_some_and(|i| scope.contains(&i.business_id));
        if !in_scope {
            return Ok(None);
        }

        state.items.remove(&invoice_id);
        Ok(state.invoices.remove(&invoice_id))
    }
}
