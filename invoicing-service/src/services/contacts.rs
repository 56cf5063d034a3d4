//! Running invoice aggregates kept on each contact.
//!
//! Updates here are secondary writes: the invoice change has already
//! committed, so a failure is logged and counted but never surfaced.

use crate::services::metrics::SECONDARY_WRITE_FAILURES_TOTAL;
use crate::services::store::InvoiceStore;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Outcome of a best-effort write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BestEffort {
    Applied,
    /// Nothing to do: no contact linked, or the contact no longer exists.
    Skipped,
    Failed(String),
}

#[derive(Clone)]
pub struct ContactAggregates {
    store: Arc<dyn InvoiceStore>,
}

impl ContactAggregates {
    pub fn new(store: Arc<dyn InvoiceStore>) -> Self {
        Self { store }
    }

    #[tracing::instrument(skip(self))]
    pub async fn apply_delta(
        &self,
        contact_id: Uuid,
        count_delta: i32,
        value_delta: Decimal,
    ) -> BestEffort {
        match self
            .store
            .apply_contact_delta(contact_id, count_delta, value_delta)
            .await
        {
            Ok(Some(contact)) => {
                tracing::debug!(
                    contact_id = %contact_id,
                    invoice_count = contact.invoice_count,
                    total_value = %contact.total_value,
                    "Contact aggregates updated"
                );
                BestEffort::Applied
            }
            Ok(None) => {
                tracing::warn!(contact_id = %contact_id, "Contact not found for aggregate update");
                BestEffort::Skipped
            }
            Err(e) => {
                SECONDARY_WRITE_FAILURES_TOTAL
                    .with_label_values(&["contact_aggregate"])
                    .inc();
                tracing::warn!(
                    contact_id = %contact_id,
                    error = %e,
                    "Failed to update contact aggregates"
                );
                BestEffort::Failed(e.to_string())
            }
        }
    }

    pub async fn on_created(&self, contact_id: Option<Uuid>, total: Decimal) -> BestEffort {
        match contact_id {
            Some(id) => self.apply_delta(id, 1, total).await,
            None => BestEffort::Skipped,
        }
    }

    /// Apply an edit. Moving the invoice to another contact takes it off the
    /// old contact's totals and adds it to the new one's.
    pub async fn on_edited(
        &self,
        old_contact: Option<Uuid>,
        old_total: Decimal,
        new_contact: Option<Uuid>,
        new_total: Decimal,
    ) -> BestEffort {
        if old_contact == new_contact {
            return match new_contact {
                Some(id) => self.apply_delta(id, 0, new_total - old_total).await,
                None => BestEffort::Skipped,
            };
        }

        let removed = match old_contact {
            Some(id) => self.apply_delta(id, -1, -old_total).await,
            None => BestEffort::Skipped,
        };
        let added = match new_contact {
            Some(id) => self.apply_delta(id, 1, new_total).await,
            None => BestEffort::Skipped,
        };

        match (removed, added) {
            (BestEffort::Failed(e), _) | (_, BestEffort::Failed(e)) => BestEffort::Failed(e),
            (BestEffort::Applied, _) | (_, BestEffort::Applied) => BestEffort::Applied,
            _ => BestEffort::Skipped,
        }
    }

    pub async fn on_deleted(&self, contact_id: Option<Uuid>, total: Decimal) -> BestEffort {
        match contact_id {
            Some(id) => self.apply_delta(id, -1, -total).await,
            None => BestEffort::Skipped,
        }
    }
}
