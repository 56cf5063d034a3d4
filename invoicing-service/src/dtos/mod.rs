//! Request and response bodies of the invoice HTTP API.

pub mod invoices;

pub use invoices::*;
