//! Pre-send validation checklist.

use crate::models::{Invoice, InvoiceItem, ValidationCheck, ValidationReport};
use rust_decimal::Decimal;

/// Largest accepted gap between the stored tax and the tax recomputed from
/// the items.
pub const TAX_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Run all eight checks. Pure; the caller decides whether to promote the
/// invoice to `validated`.
pub fn validate_invoice(invoice: &Invoice, items: &[InvoiceItem]) -> ValidationReport {
    let has_number = !invoice.invoice_number.trim().is_empty();
    let has_client = !invoice.client_name.trim().is_empty();
    let has_issue_date = invoice.issue_date.is_some();
    let has_due_date = invoice.due_date.is_some();
    let has_items = !items.is_empty();

    let expected_tax = items
        .iter()
        .try_fold(Decimal::ZERO, |sum, item| sum.checked_add(item.tax_amount()?));
    let tax_matches = expected_tax
        .and_then(|expected| expected.checked_sub(invoice.tax))
        .is_some_and(|gap| gap.abs() <= TAX_TOLERANCE);

    let items_well_formed = items.iter().all(|i| {
        !i.description.trim().is_empty() && i.quantity > Decimal::ZERO && i.unit_price >= Decimal::ZERO
    });
    let required =
        has_number && has_client && has_issue_date && has_due_date && items_well_formed;

    let tax_failed = match expected_tax {
        Some(expected) => format!(
            "Tax amount {} does not match {} computed from the line items",
            invoice.tax,
            expected.round_dp(2)
        ),
        None => "Tax could not be computed from the line items".to_string(),
    };

    ValidationReport::from_checks(vec![
        ValidationCheck::new(
            "Invoice Number",
            has_number,
            "Invoice number is set",
            "Invoice number is missing",
        ),
        ValidationCheck::new(
            "Client Information",
            has_client,
            "Client is identified",
            "Client name is missing",
        ),
        ValidationCheck::new(
            "Issue Date",
            has_issue_date,
            "Issue date is set",
            "Issue date is missing",
        ),
        ValidationCheck::new(
            "Due Date",
            has_due_date,
            "Due date is set",
            "Due date is missing",
        ),
        ValidationCheck::new(
            "Line Items",
            has_items,
            "Invoice has line items",
            "Add at least one line item",
        ),
        ValidationCheck::new(
            "Tax Calculation",
            tax_matches,
            "Tax matches the line items",
            &tax_failed,
        ),
        ValidationCheck::new(
            "Total Amount",
            invoice.total > Decimal::ZERO,
            "Total is greater than zero",
            "Total must be greater than zero",
        ),
        ValidationCheck::new(
            "Required Fields",
            required,
            "All required fields are complete",
            "Complete the invoice number, client, dates and every line item \
             (description, quantity above zero, unit price not negative)",
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use uuid::Uuid;

    fn widget_invoice() -> (Invoice, Vec<InvoiceItem>) {
        let invoice_id = Uuid::new_v4();
        let invoice = Invoice {
            invoice_id,
            business_id: Uuid::new_v4(),
            contact_id: None,
            invoice_number: "INV-000001".to_string(),
            status: "draft".to_string(),
            client_name: "Acme GmbH".to_string(),
            client_email: Some("billing@acme.test".to_string()),
            client_street: "Main Street 1".to_string(),
            client_city: "Berlin".to_string(),
            client_postcode: "10115".to_string(),
            client_tax_number: None,
            currency: "EUR".to_string(),
            issue_date: NaiveDate::from_ymd_opt(2025, 1, 1),
            due_date: NaiveDate::from_ymd_opt(2025, 1, 31),
            subtotal: Decimal::from(100),
            tax: Decimal::from(10),
            total: Decimal::from(110),
            notes: None,
            terms: None,
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
        let items = vec![InvoiceItem {
            item_id: Uuid::new_v4(),
            invoice_id,
            description: "Widget".to_string(),
            quantity: Decimal::from(2),
            unit_price: Decimal::from(50),
            tax_rate: Decimal::from(10),
            position: 0,
            created_at: Utc::now(),
        }];
        (invoice, items)
    }

    #[test]
    fn widget_invoice_passes_all_checks() {
        let (invoice, items) = widget_invoice();
        let report = validate_invoice(&invoice, &items);
        assert!(report.valid);
        assert_eq!(report.checks.len(), 8);
        assert_eq!(report.failed().count(), 0);
    }

    #[test]
    fn missing_items_and_due_date_fail() {
        let (mut invoice, _) = widget_invoice();
        invoice.due_date = None;
        invoice.tax = Decimal::ZERO;
        let report = validate_invoice(&invoice, &[]);

        assert!(!report.valid);
        let failed: Vec<&str> = report.failed().map(|c| c.name.as_str()).collect();
        assert_eq!(failed, vec!["Due Date", "Line Items", "Required Fields"]);
    }

    #[test]
    fn tax_mismatch_is_reported() {
        let (mut invoice, items) = widget_invoice();
        invoice.tax = Decimal::from(12);
        let report = validate_invoice(&invoice, &items);

        assert!(!report.valid);
        let tax = report
            .checks
            .iter()
            .find(|c| c.name == "Tax Calculation")
            .unwrap();
        assert!(!tax.passed);
    }

    #[test]
    fn tax_within_a_cent_passes() {
        let (mut invoice, items) = widget_invoice();
        invoice.tax = Decimal::new(1001, 2);
        assert!(validate_invoice(&invoice, &items).valid);
    }

    #[test]
    fn overflowing_item_fails_tax_check() {
        let (invoice, mut items) = widget_invoice();
        items[0].quantity = Decimal::MAX;
        let report = validate_invoice(&invoice, &items);

        let failed: Vec<&str> = report.failed().map(|c| c.name.as_str()).collect();
        assert_eq!(failed, vec!["Tax Calculation"]);
    }

    #[test]
    fn zero_total_fails() {
        let (mut invoice, items) = widget_invoice();
        invoice.total = Decimal::ZERO;
        let report = validate_invoice(&invoice, &items);
        let failed: Vec<&str> = report.failed().map(|c| c.name.as_str()).collect();
        assert_eq!(failed, vec!["Total Amount"]);
    }

    #[test]
    fn same_input_gives_same_report() {
        let (invoice, items) = widget_invoice();
        assert_eq!(
            validate_invoice(&invoice, &items),
            validate_invoice(&invoice, &items)
        );
    }
}
