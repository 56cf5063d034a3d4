//! Line item model for invoicing-service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Line item on an invoice.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceItem {
    pub item_id: Uuid,
    pub invoice_id: Uuid,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    /// Percentage, e.g. `10` for 10%.
    pub tax_rate: Decimal,
    pub position: i32,
    pub created_at: DateTime<Utc>,
}

impl InvoiceItem {
    /// `None` when the product overflows.
    pub fn net_amount(&self) -> Option<Decimal> {
        self.quantity.checked_mul(self.unit_price)
    }

    pub fn tax_amount(&self) -> Option<Decimal> {
        line_tax(self.net_amount()?, self.tax_rate)
    }
}

fn line_tax(net: Decimal, tax_rate: Decimal) -> Option<Decimal> {
    net.checked_mul(tax_rate)?.checked_div(Decimal::ONE_HUNDRED)
}

/// Largest magnitude a `NUMERIC(precision, scale)` column accepts, exclusive.
pub fn numeric_limit(precision: u32, scale: u32) -> Decimal {
    Decimal::from(10i64.pow(precision - scale))
}

/// Input for creating a line item.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateInvoiceItem {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub tax_rate: Decimal,
}

impl CreateInvoiceItem {
    pub fn net_amount(&self) -> Option<Decimal> {
        self.quantity.checked_mul(self.unit_price)
    }

    pub fn tax_amount(&self) -> Option<Decimal> {
        line_tax(self.net_amount()?, self.tax_rate)
    }
}

/// Invoice totals derived from line items, rounded to cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvoiceTotals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

impl InvoiceTotals {
    /// `None` when any line or sum overflows `Decimal`.
    pub fn from_items(items: &[CreateInvoiceItem]) -> Option<Self> {
        let mut subtotal = Decimal::ZERO;
        let mut tax = Decimal::ZERO;
        for item in items {
            subtotal = subtotal.checked_add(item.net_amount()?)?;
            tax = tax.checked_add(item.tax_amount()?)?;
        }
        let subtotal = subtotal.round_dp(2);
        let tax = tax.round_dp(2);
        Some(Self {
            subtotal,
            tax,
            total: subtotal.checked_add(tax)?,
        })
    }
}
