//! Invoice lifecycle: `draft -> validated -> sent`.
//!
//! Every operation commits its local write first and only then talks to the
//! compliance renderer. A renderer failure never undoes the local write; it is
//! reported back as a [`RenderWarning`] next to the stored invoice. Contact
//! aggregate updates and document persistence are best-effort.
//!
//! Mutations of one invoice are serialized through [`InvoiceLocks`]. The
//! render-and-persist step runs in a spawned task that owns the lock guard,
//! so a client disconnect does not abandon it half way.

use crate::models::{
    Business, CreateInvoice, Invoice, InvoiceDraft, InvoiceItem, InvoiceStatus, ValidationReport,
};
use crate::services::contacts::ContactAggregates;
use crate::services::delivery::{DeliveryChannel, DeliveryDispatcher, DeliveryReceipt, EmailOptions};
use crate::services::locks::{InvoiceLockGuard, InvoiceLocks};
use crate::services::mailer::Mailer;
use crate::services::metrics::{INVOICES_TOTAL, SECONDARY_WRITE_FAILURES_TOTAL};
use crate::services::renderer::{DocumentRenderer, RenderPhase, RenderRequest};
use crate::services::sequence::SequenceAllocator;
use crate::services::store::InvoiceStore;
use crate::services::validation::validate_invoice;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;
use uuid::Uuid;

/// Renderer failure attached to an otherwise successful create or edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderWarning {
    pub phase: RenderPhase,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct InvoiceOutcome {
    pub invoice: Invoice,
    pub items: Vec<InvoiceItem>,
    pub warning: Option<RenderWarning>,
}

#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub report: ValidationReport,
    pub status: InvoiceStatus,
}

#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub invoice: Invoice,
    pub receipt: DeliveryReceipt,
}

/// Channel plus the options that channel needs.
#[derive(Debug, Clone)]
pub enum SendRequest {
    Email(EmailOptions),
    Sftp,
    Portal,
}

impl SendRequest {
    pub fn channel(&self) -> DeliveryChannel {
        match self {
            SendRequest::Email(_) => DeliveryChannel::Email,
            SendRequest::Sftp => DeliveryChannel::Sftp,
            SendRequest::Portal => DeliveryChannel::Portal,
        }
    }
}

#[derive(Clone)]
pub struct InvoiceOrchestrator {
    store: Arc<dyn InvoiceStore>,
    sequence: SequenceAllocator,
    contacts: ContactAggregates,
    renderer: Arc<dyn DocumentRenderer>,
    dispatcher: DeliveryDispatcher,
    locks: InvoiceLocks,
    default_currency: String,
}

impl InvoiceOrchestrator {
    pub fn new(
        store: Arc<dyn InvoiceStore>,
        renderer: Arc<dyn DocumentRenderer>,
        mailer: Arc<dyn Mailer>,
        number_prefix: &str,
        default_currency: &str,
    ) -> Self {
        Self {
            sequence: SequenceAllocator::new(store.clone(), number_prefix),
            contacts: ContactAggregates::new(store.clone()),
            dispatcher: DeliveryDispatcher::new(mailer),
            locks: InvoiceLocks::new(),
            default_currency: default_currency.to_string(),
            store,
            renderer,
        }
    }

    /// Business ids the caller may act on.
    pub async fn caller_scope(&self, user_id: &str) -> Result<Vec<Uuid>, AppError> {
        self.store.business_ids_for_user(user_id).await
    }

    #[tracing::instrument(skip(self, scope, draft))]
    pub async fn create(
        &self,
        scope: &[Uuid],
        draft: InvoiceDraft,
    ) -> Result<InvoiceOutcome, AppError> {
        let business_id = match (draft.business_id, scope) {
            (Some(id), _) => id,
            (None, [only]) => *only,
            (None, _) => {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "businessId is required"
                )));
            }
        };
        if !scope.contains(&business_id) {
            return Err(AppError::NotFound(anyhow::anyhow!("Business not found")));
        }

        let contact = match draft.contact_id {
            Some(contact_id) => Some(
                self.store
                    .get_contact(business_id, contact_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Contact not found")))?,
            ),
            None => None,
        };
        let (details, items) = draft.into_details(&self.default_currency, contact.as_ref())?;

        let invoice_number = self.sequence.next_invoice_number().await?;
        let (invoice, items) = self
            .store
            .create_invoice(
                &CreateInvoice {
                    business_id,
                    invoice_number,
                    details,
                },
                &items,
            )
            .await?;

        INVOICES_TOTAL.with_label_values(&["created"]).inc();
        tracing::info!(
            invoice_id = %invoice.invoice_id,
            invoice_number = %invoice.invoice_number,
            total = %invoice.total,
            "Invoice created"
        );

        self.contacts.on_created(invoice.contact_id, invoice.total).await;

        let guard = self.locks.acquire(invoice.invoice_id).await;
        let (invoice, warning) = self.render_in_background(guard, invoice, items.clone()).await;

        Ok(InvoiceOutcome {
            invoice,
            items,
            warning,
        })
    }

    #[tracing::instrument(skip(self, scope, draft))]
    pub async fn edit(
        &self,
        scope: &[Uuid],
        invoice_id: Uuid,
        draft: InvoiceDraft,
    ) -> Result<InvoiceOutcome, AppError> {
        let guard = self.locks.acquire(invoice_id).await;

        let existing = self.find(scope, invoice_id).await?;
        if draft.business_id.is_some_and(|id| id != existing.business_id) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "An invoice cannot be moved to another business"
            )));
        }

        let contact = match draft.contact_id {
            Some(contact_id) => Some(
                self.store
                    .get_contact(existing.business_id, contact_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Contact not found")))?,
            ),
            None => None,
        };
        let (details, items) = draft.into_details(&self.default_currency, contact.as_ref())?;

        let replaced = self
            .store
            .replace_invoice(scope, invoice_id, &details, &items)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        INVOICES_TOTAL.with_label_values(&["edited"]).inc();
        tracing::info!(
            invoice_id = %invoice_id,
            previous_total = %replaced.previous.total,
            total = %replaced.invoice.total,
            "Invoice edited"
        );

        self.contacts
            .on_edited(
                replaced.previous.contact_id,
                replaced.previous.total,
                replaced.invoice.contact_id,
                replaced.invoice.total,
            )
            .await;

        let items = replaced.items;
        let (invoice, warning) = self
            .render_in_background(guard, replaced.invoice, items.clone())
            .await;

        Ok(InvoiceOutcome {
            invoice,
            items,
            warning,
        })
    }

    /// Run the checklist. Only a passing invoice that is not already sent
    /// becomes `validated`.
    #[tracing::instrument(skip(self, scope))]
    pub async fn validate(
        &self,
        scope: &[Uuid],
        invoice_id: Uuid,
    ) -> Result<ValidationOutcome, AppError> {
        let _guard = self.locks.acquire(invoice_id).await;

        let invoice = self.find(scope, invoice_id).await?;
        let items = self.store.get_items(invoice_id).await?;
        let report = validate_invoice(&invoice, &items);

        let mut status = invoice.status();
        if report.valid {
            INVOICES_TOTAL.with_label_values(&["validated"]).inc();
            if status == InvoiceStatus::Draft {
                self.store
                    .set_status(invoice_id, InvoiceStatus::Validated)
                    .await?;
                status = InvoiceStatus::Validated;
            }
        } else {
            INVOICES_TOTAL.with_label_values(&["rejected"]).inc();
            let failed: Vec<&str> = report.failed().map(|c| c.name.as_str()).collect();
            tracing::info!(invoice_id = %invoice_id, failed = ?failed, "Invoice failed validation");
        }

        Ok(ValidationOutcome { report, status })
    }

    #[tracing::instrument(skip(self, scope, request), fields(channel = request.channel().as_str()))]
    pub async fn send(
        &self,
        scope: &[Uuid],
        invoice_id: Uuid,
        request: SendRequest,
    ) -> Result<SendOutcome, AppError> {
        let _guard = self.locks.acquire(invoice_id).await;

        let invoice = self.find(scope, invoice_id).await?;
        if !invoice.status().can_send() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Invoice must be validated first"
            )));
        }

        let receipt = match &request {
            SendRequest::Email(options) => {
                options.validate()?;
                let business = self.business_for(&invoice).await;
                self.dispatcher
                    .send_email(&invoice, business.as_ref(), options)
                    .await?
            }
            SendRequest::Sftp | SendRequest::Portal => {
                self.dispatcher.send_placeholder(&invoice, request.channel())
            }
        };

        let invoice = self
            .store
            .record_sent(
                invoice_id,
                receipt.channel.as_str(),
                &receipt.recipients.join(", "),
            )
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        INVOICES_TOTAL.with_label_values(&["sent"]).inc();
        tracing::info!(
            invoice_id = %invoice_id,
            delivered = receipt.delivered,
            "Invoice sent"
        );

        Ok(SendOutcome { invoice, receipt })
    }

    #[tracing::instrument(skip(self, scope))]
    pub async fn delete(&self, scope: &[Uuid], invoice_id: Uuid) -> Result<Invoice, AppError> {
        let _guard = self.locks.acquire(invoice_id).await;

        let deleted = self
            .store
            .delete_invoice(scope, invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        INVOICES_TOTAL.with_label_values(&["deleted"]).inc();
        tracing::info!(
            invoice_id = %invoice_id,
            invoice_number = %deleted.invoice_number,
            "Invoice deleted"
        );

        self.contacts.on_deleted(deleted.contact_id, deleted.total).await;

        Ok(deleted)
    }

    pub async fn get(
        &self,
        scope: &[Uuid],
        invoice_id: Uuid,
    ) -> Result<(Invoice, Vec<InvoiceItem>), AppError> {
        let invoice = self.find(scope, invoice_id).await?;
        let items = self.store.get_items(invoice_id).await?;
        Ok((invoice, items))
    }

    pub async fn list(&self, scope: &[Uuid]) -> Result<Vec<Invoice>, AppError> {
        self.store.list_invoices(scope).await
    }

    /// PDF bytes: stored content first, otherwise downloaded from the stored
    /// URL without persisting it.
    pub async fn pdf(&self, scope: &[Uuid], invoice_id: Uuid) -> Result<(Invoice, Vec<u8>), AppError> {
        let invoice = self.find(scope, invoice_id).await?;

        if let Some(encoded) = &invoice.pdf_content {
            let bytes = STANDARD.decode(encoded).map_err(|e| {
                AppError::InternalError(anyhow::anyhow!("Stored PDF is not valid base64: {}", e))
            })?;
            return Ok((invoice, bytes));
        }

        let url = invoice
            .pdf_url
            .clone()
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("PDF not available")))?;
        let bytes = self.renderer.fetch_pdf(&url).await.map_err(|e| {
            tracing::warn!(invoice_id = %invoice_id, error = %e, "On-demand PDF download failed");
            AppError::BadGateway(e.to_string())
        })?;
        Ok((invoice, bytes))
    }

    pub async fn xml(&self, scope: &[Uuid], invoice_id: Uuid) -> Result<(Invoice, String), AppError> {
        let invoice = self.find(scope, invoice_id).await?;

        if let Some(xml) = invoice.xml_content.clone() {
            return Ok((invoice, xml));
        }

        let url = invoice
            .xml_url
            .clone()
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("XML not available")))?;
        let xml = self.renderer.fetch_xml(&url).await.map_err(|e| {
            tracing::warn!(invoice_id = %invoice_id, error = %e, "On-demand XML download failed");
            AppError::BadGateway(e.to_string())
        })?;
        Ok((invoice, xml))
    }

    async fn find(&self, scope: &[Uuid], invoice_id: Uuid) -> Result<Invoice, AppError> {
        self.store
            .get_invoice(scope, invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))
    }

    async fn business_for(&self, invoice: &Invoice) -> Option<Business> {
        match self.store.get_business(invoice.business_id).await {
            Ok(business) => business,
            Err(e) => {
                tracing::warn!(business_id = %invoice.business_id, error = %e, "Failed to load business");
                None
            }
        }
    }

    async fn render_in_background(
        &self,
        guard: InvoiceLockGuard,
        invoice: Invoice,
        items: Vec<InvoiceItem>,
    ) -> (Invoice, Option<RenderWarning>) {
        let this = self.clone();
        let local = invoice.clone();

        let task = tokio::spawn(async move {
            let _guard = guard;
            this.render_and_persist(invoice, items).await
        });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(invoice_id = %local.invoice_id, error = %e, "Render task failed");
                let warning = RenderWarning {
                    phase: RenderPhase::Skeleton,
                    message: "Document rendering did not complete".to_string(),
                };
                (local, Some(warning))
            }
        }
    }

    async fn render_and_persist(
        &self,
        invoice: Invoice,
        items: Vec<InvoiceItem>,
    ) -> (Invoice, Option<RenderWarning>) {
        let business = self.business_for(&invoice).await;
        let request = RenderRequest {
            invoice,
            items,
            business,
        };

        let artifacts = match self.renderer.render(&request).await {
            Ok(artifacts) => artifacts,
            Err(e) => {
                let warning = RenderWarning {
                    phase: e.phase(),
                    message: e.to_string(),
                };
                return (request.invoice, Some(warning));
            }
        };

        let invoice_id = request.invoice.invoice_id;
        match self.store.save_documents(invoice_id, &artifacts).await {
            Ok(Some(updated)) => (updated, None),
            Ok(None) => (request.invoice, None),
            Err(e) => {
                SECONDARY_WRITE_FAILURES_TOTAL
                    .with_label_values(&["document_content"])
                    .inc();
                tracing::warn!(
                    invoice_id = %invoice_id,
                    error = %e,
                    "Failed to store rendered documents"
                );
                (request.invoice, None)
            }
        }
    }
}
