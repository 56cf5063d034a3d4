//! Per-invoice mutual exclusion within this process.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Keyed async locks; one mutex per invoice id with live holders or waiters.
#[derive(Clone, Default)]
pub struct InvoiceLocks {
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

/// Held while an invoice is being mutated. Owned, so it can move into a
/// spawned task.
pub struct InvoiceLockGuard {
    invoice_id: Uuid,
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl InvoiceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, invoice_id: Uuid) -> InvoiceLockGuard {
        let mutex = self
            .locks
            .entry(invoice_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;

        InvoiceLockGuard {
            invoice_id,
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for InvoiceLockGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Entry clone plus the map's own reference means nobody else waits.
        self.locks
            .remove_if(&self.invoice_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
