//! Invoice number allocation.

use crate::services::store::InvoiceStore;
use service_core::error::AppError;
use std::sync::Arc;

/// Issues invoice numbers from the store's durable counter.
#[derive(Clone)]
pub struct SequenceAllocator {
    store: Arc<dyn InvoiceStore>,
    prefix: String,
}

impl SequenceAllocator {
    pub fn new(store: Arc<dyn InvoiceStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    /// Allocate the next number, e.g. `INV-000042`.
    ///
    /// A failure here aborts invoice creation before anything is written.
    #[tracing::instrument(skip(self))]
    pub async fn next_invoice_number(&self) -> Result<String, AppError> {
        let value = self.store.next_invoice_sequence().await?;
        Ok(format_invoice_number(&self.prefix, value))
    }
}

pub fn format_invoice_number(prefix: &str, value: i64) -> String {
    format!("{}{:06}", prefix, value)
}
