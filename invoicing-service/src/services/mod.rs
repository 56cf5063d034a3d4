//! Services module for invoicing-service.

pub mod contacts;
pub mod database;
pub mod delivery;
pub mod locks;
pub mod mailer;
pub mod memory;
pub mod metrics;
pub mod orchestrator;
pub mod renderer;
pub mod sequence;
pub mod store;
pub mod validation;

pub use contacts::{BestEffort, ContactAggregates};
pub use database::Database;
pub use delivery::{DeliveryChannel, DeliveryDispatcher, DeliveryReceipt, EmailOptions};
pub use locks::InvoiceLocks;
pub use mailer::{Mailer, MockMailer, SmtpMailer};
pub use memory::InMemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use orchestrator::{
    InvoiceOrchestrator, InvoiceOutcome, RenderWarning, SendOutcome, SendRequest,
    ValidationOutcome,
};
pub use renderer::{ComplianceRenderer, DocumentRenderer, RenderError, RenderPhase};
pub use sequence::SequenceAllocator;
pub use store::InvoiceStore;
