//! PostgreSQL store for invoicing-service.

use crate::models::{
    Business, Contact, CreateInvoice, CreateInvoiceItem, DocumentArtifacts, Invoice,
    InvoiceDetails, InvoiceItem, InvoiceStatus, ReplacedInvoice,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::InvoiceStore;
use async_trait::async_trait;
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const INVOICE_COLUMNS: &str = r#"
    invoice_id, business_id, contact_id, invoice_number, status,
    client_name, client_email, client_street, client_city, client_postcode, client_tax_number,
    currency, issue_date, due_date, subtotal, tax, total, notes, terms,
    pdf_url, xml_url, pdf_content, xml_content, sent_at, sent_method, sent_to,
    created_at, updated_at
"#;

const ITEM_COLUMNS: &str =
    "item_id, invoice_id, description, quantity, unit_price, tax_rate, position, created_at";

const CONTACT_COLUMNS: &str = r#"
    contact_id, business_id, name, email, street, city, postcode, tax_number,
    invoice_count, total_value, created_at
"#;

fn db_error(context: &str, e: sqlx::Error) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!("{}: {}", context, e))
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "invoicing-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| db_error("Failed to connect", e))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'_, Postgres>, AppError> {
        self.pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))
    }

    async fn insert_items(
        tx: &mut Transaction<'_, Postgres>,
        invoice_id: Uuid,
        items: &[CreateInvoiceItem],
    ) -> Result<Vec<InvoiceItem>, AppError> {
        let mut inserted = Vec::with_capacity(items.len());
        for (position, item) in items.iter().enumerate() {
            let row = sqlx::query_as::<_, InvoiceItem>(&format!(
                r#"
                INSERT INTO invoice_items (item_id, invoice_id, description, quantity, unit_price, tax_rate, position)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING {ITEM_COLUMNS}
                "#
            ))
            .bind(Uuid::new_v4())
            .bind(invoice_id)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.tax_rate)
            .bind(position as i32)
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| db_error("Failed to insert invoice item", e))?;
            inserted.push(row);
        }
        Ok(inserted)
    }
}

#[async_trait]
impl InvoiceStore for Database {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Health check failed", e))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn next_invoice_sequence(&self) -> Result<i64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["next_invoice_sequence"])
            .start_timer();

        let value: i64 = sqlx::query_scalar("SELECT nextval('invoice_number_seq')")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("Failed to allocate invoice number", e))?;

        timer.observe_duration();

        Ok(value)
    }

    #[instrument(skip(self))]
    async fn business_ids_for_user(&self, user_id: &str) -> Result<Vec<Uuid>, AppError> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT business_id FROM business_members WHERE user_id = $1 ORDER BY business_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to resolve business membership", e))
    }

    #[instrument(skip(self), fields(business_id = %business_id))]
    async fn get_business(&self, business_id: Uuid) -> Result<Option<Business>, AppError> {
        sqlx::query_as::<_, Business>(
            r#"
            SELECT business_id, name, email, street, city, postcode, tax_number, iban
            FROM businesses
            WHERE business_id = $1
            "#,
        )
        .bind(business_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get business", e))
    }

    #[instrument(skip(self), fields(business_id = %business_id, contact_id = %contact_id))]
    async fn get_contact(
        &self,
        business_id: Uuid,
        contact_id: Uuid,
    ) -> Result<Option<Contact>, AppError> {
        sqlx::query_as::<_, Contact>(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE business_id = $1 AND contact_id = $2"
        ))
        .bind(business_id)
        .bind(contact_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get contact", e))
    }

    #[instrument(skip(self), fields(contact_id = %contact_id))]
    async fn apply_contact_delta(
        &self,
        contact_id: Uuid,
        count_delta: i32,
        value_delta: Decimal,
    ) -> Result<Option<Contact>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["apply_contact_delta"])
            .start_timer();

        let contact = sqlx::query_as::<_, Contact>(&format!(
            r#"
            UPDATE contacts
            SET invoice_count = GREATEST(invoice_count + $2, 0),
                total_value = GREATEST(total_value + $3, 0),
                updated_at = NOW()
            WHERE contact_id = $1
            RETURNING {CONTACT_COLUMNS}
            "#
        ))
        .bind(contact_id)
        .bind(count_delta)
        .bind(value_delta)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to update contact aggregates", e))?;

        timer.observe_duration();

        Ok(contact)
    }

    #[instrument(skip(self, input, items), fields(business_id = %input.business_id, invoice_number = %input.invoice_number))]
    async fn create_invoice(
        &self,
        input: &CreateInvoice,
        items: &[CreateInvoiceItem],
    ) -> Result<(Invoice, Vec<InvoiceItem>), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_invoice"])
            .start_timer();

        let details = &input.details;
        let mut tx = self.begin().await?;

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            INSERT INTO invoices (
                invoice_id, business_id, contact_id, invoice_number, status,
                client_name, client_email, client_street, client_city, client_postcode, client_tax_number,
                currency, issue_date, due_date, subtotal, tax, total, notes, terms
            )
            VALUES ($1, $2, $3, $4, 'draft', $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(input.business_id)
        .bind(details.contact_id)
        .bind(&input.invoice_number)
        .bind(&details.client.name)
        .bind(&details.client.email)
        .bind(&details.client.street)
        .bind(&details.client.city)
        .bind(&details.client.postcode)
        .bind(&details.client.tax_number)
        .bind(&details.currency)
        .bind(details.issue_date)
        .bind(details.due_date)
        .bind(details.subtotal)
        .bind(details.tax)
        .bind(details.total)
        .bind(&details.notes)
        .bind(&details.terms)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Invoice number '{}' already exists",
                    input.invoice_number
                ))
            }
            _ => db_error("Failed to create invoice", e),
        })?;

        let items = Self::insert_items(&mut tx, invoice.invoice_id, items).await?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit invoice", e))?;

        timer.observe_duration();

        info!(invoice_id = %invoice.invoice_id, items = items.len(), "Draft invoice created");

        Ok((invoice, items))
    }

    #[instrument(skip(self, scope), fields(invoice_id = %invoice_id))]
    async fn get_invoice(
        &self,
        scope: &[Uuid],
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE invoice_id = $1 AND business_id = ANY($2)"
        ))
        .bind(invoice_id)
        .bind(scope)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get invoice", e))?;

        timer.observe_duration();

        Ok(invoice)
    }

    #[instrument(skip(self, scope))]
    async fn list_invoices(&self, scope: &[Uuid]) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE business_id = ANY($1)
            ORDER BY created_at DESC, invoice_number DESC
            "#
        ))
        .bind(scope)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list invoices", e))?;

        timer.observe_duration();

        Ok(invoices)
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn get_items(&self, invoice_id: Uuid) -> Result<Vec<InvoiceItem>, AppError> {
        sqlx::query_as::<_, InvoiceItem>(&format!(
            "SELECT {ITEM_COLUMNS} FROM invoice_items WHERE invoice_id = $1 ORDER BY position"
        ))
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get invoice items", e))
    }

    #[instrument(skip(self, scope, details, items), fields(invoice_id = %invoice_id))]
    async fn replace_invoice(
        &self,
        scope: &[Uuid],
        invoice_id: Uuid,
        details: &InvoiceDetails,
        items: &[CreateInvoiceItem],
    ) -> Result<Option<ReplacedInvoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["replace_invoice"])
            .start_timer();

        let mut tx = self.begin().await?;

        // Row lock keeps the old total stable until the contact delta is known.
        let previous = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {INVOICE_COLUMNS} FROM invoices
            WHERE invoice_id = $1 AND business_id = ANY($2)
            FOR UPDATE
            "#
        ))
        .bind(invoice_id)
        .bind(scope)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to lock invoice", e))?;

        let Some(previous) = previous else {
            return Ok(None);
        };

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET contact_id = $2,
                status = 'draft',
                client_name = $3,
                client_email = $4,
                client_street = $5,
                client_city = $6,
                client_postcode = $7,
                client_tax_number = $8,
                currency = $9,
                issue_date = $10,
                due_date = $11,
                subtotal = $12,
                tax = $13,
                total = $14,
                notes = $15,
                terms = $16,
                pdf_url = NULL,
                xml_url = NULL,
                pdf_content = NULL,
                xml_content = NULL,
                updated_at = NOW()
            WHERE invoice_id = $1
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(invoice_id)
        .bind(details.contact_id)
        .bind(&details.client.name)
        .bind(&details.client.email)
        .bind(&details.client.street)
        .bind(&details.client.city)
        .bind(&details.client.postcode)
        .bind(&details.client.tax_number)
        .bind(&details.currency)
        .bind(details.issue_date)
        .bind(details.due_date)
        .bind(details.subtotal)
        .bind(details.tax)
        .bind(details.total)
        .bind(&details.notes)
        .bind(&details.terms)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to update invoice", e))?;

        sqlx::query("DELETE FROM invoice_items WHERE invoice_id = $1")
            .bind(invoice_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to delete invoice items", e))?;

        let items = Self::insert_items(&mut tx, invoice_id, items).await?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit invoice edit", e))?;

        timer.observe_duration();

        info!(invoice_id = %invoice_id, items = items.len(), "Invoice replaced");

        Ok(Some(ReplacedInvoice {
            previous,
            invoice,
            items,
        }))
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id, status = %status))]
    async fn set_status(
        &self,
        invoice_id: Uuid,
        status: InvoiceStatus,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_status"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices SET status = $2, updated_at = NOW()
            WHERE invoice_id = $1
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(invoice_id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to set invoice status", e))?;

        timer.observe_duration();

        Ok(invoice)
    }

    #[instrument(skip(self, recipients), fields(invoice_id = %invoice_id, method = %method))]
    async fn record_sent(
        &self,
        invoice_id: Uuid,
        method: &str,
        recipients: &str,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_sent"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET status = 'sent', sent_at = NOW(), sent_method = $2, sent_to = $3, updated_at = NOW()
            WHERE invoice_id = $1
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(invoice_id)
        .bind(method)
        .bind(recipients)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to record invoice delivery", e))?;

        timer.observe_duration();

        Ok(invoice)
    }

    #[instrument(skip(self, artifacts), fields(invoice_id = %invoice_id))]
    async fn save_documents(
        &self,
        invoice_id: Uuid,
        artifacts: &DocumentArtifacts,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["save_documents"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET pdf_url = $2, xml_url = $3, pdf_content = $4, xml_content = $5, updated_at = NOW()
            WHERE invoice_id = $1
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(invoice_id)
        .bind(&artifacts.pdf_url)
        .bind(&artifacts.xml_url)
        .bind(&artifacts.pdf_content)
        .bind(&artifacts.xml_content)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to save rendered documents", e))?;

        timer.observe_duration();

        Ok(invoice)
    }

    #[instrument(skip(self, scope), fields(invoice_id = %invoice_id))]
    async fn delete_invoice(
        &self,
        scope: &[Uuid],
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_invoice"])
            .start_timer();

        let mut tx = self.begin().await?;

        let exists: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT invoice_id FROM invoices
            WHERE invoice_id = $1 AND business_id = ANY($2)
            FOR UPDATE
            "#,
        )
        .bind(invoice_id)
        .bind(scope)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to lock invoice", e))?;

        if exists.is_none() {
            return Ok(None);
        }

        sqlx::query("DELETE FROM invoice_items WHERE invoice_id = $1")
            .bind(invoice_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to delete invoice items", e))?;

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "DELETE FROM invoices WHERE invoice_id = $1 RETURNING {INVOICE_COLUMNS}"
        ))
        .bind(invoice_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to delete invoice", e))?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit invoice deletion", e))?;

        timer.observe_duration();

        info!(invoice_id = %invoice_id, "Invoice deleted");

        Ok(Some(invoice))
    }
}
