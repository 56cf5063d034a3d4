//! Domain models for invoicing-service.

mod contact;
mod document;
mod invoice;
mod line_item;
mod validation;

pub use contact::{Business, Contact};
pub use document::DocumentArtifacts;
pub use invoice::{
    ClientSnapshot, CreateInvoice, Invoice, InvoiceDetails, InvoiceDraft, InvoiceStatus,
    ReplacedInvoice,
};
pub use line_item::{numeric_limit, CreateInvoiceItem, InvoiceItem, InvoiceTotals};
pub use validation::{ValidationCheck, ValidationReport};
