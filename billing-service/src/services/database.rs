//! Database service for billing-service: connection pool plus the
//! PostgreSQL adapter for the invoice repository and audit sink ports.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::billing;
use crate::models::{
    AuditEntry, Invoice, InvoiceDetail, InvoiceFilter, InvoiceItem, InvoiceStatus, NewInvoice,
    NewPayment, Payment, UpdateInvoice,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::repository::{InvoiceRepository, PaymentOutcome};
use crate::services::AuditSink;

const INVOICE_COLUMNS: &str = "invoice_id, clinic_id, patient_id, issued_by, invoice_number, \
     status, issue_date, due_date, subtotal, discount, tax, total, notes, created_utc";

const ITEM_COLUMNS: &str = "item_id, invoice_id, clinic_id, service_id, description, quantity, \
     unit_price, discount, total, sort_order, created_utc";

const PAYMENT_COLUMNS: &str = "payment_id, invoice_id, clinic_id, amount, method, reference, \
     notes, payment_date, created_utc";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "billing-service"))]
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
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
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

    /// Load items and payments for a batch of invoices, preserving the
    /// invoice order given.
    async fn hydrate(&self, invoices: Vec<Invoice>) -> Result<Vec<InvoiceDetail>, AppError> {
        let ids: Vec<Uuid> = invoices.iter().map(|i| i.invoice_id).collect();

        let items = sqlx::query_as::<_, InvoiceItem>(&format!(
            "SELECT {ITEM_COLUMNS} FROM invoice_items WHERE invoice_id = ANY($1) \
             ORDER BY sort_order, created_utc"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get items: {}", e)))?;

        let payments = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE invoice_id = ANY($1) \
             ORDER BY payment_date, created_utc"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get payments: {}", e)))?;

        let mut items_by_invoice: HashMap<Uuid, Vec<InvoiceItem>> = HashMap::new();
        for item in items {
            items_by_invoice.entry(item.invoice_id).or_default().push(item);
        }
        let mut payments_by_invoice: HashMap<Uuid, Vec<Payment>> = HashMap::new();
        for payment in payments {
            payments_by_invoice
                .entry(payment.invoice_id)
                .or_default()
                .push(payment);
        }

        Ok(invoices
            .into_iter()
            .map(|invoice| {
                let items = items_by_invoice.remove(&invoice.invoice_id).unwrap_or_default();
                let payments = payments_by_invoice
                    .remove(&invoice.invoice_id)
                    .unwrap_or_default();
                InvoiceDetail {
                    invoice,
                    items,
                    payments,
                }
            })
            .collect())
    }
}

#[async_trait]
impl InvoiceRepository for Database {
    #[instrument(skip(self), fields(clinic_id = %clinic_id, invoice_id = %invoice_id))]
    async fn find_by_id(
        &self,
        clinic_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<InvoiceDetail>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_by_id"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE clinic_id = $1 AND invoice_id = $2"
        ))
        .bind(clinic_id)
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))?;

        let detail = match invoice {
            Some(invoice) => self.hydrate(vec![invoice]).await?.pop(),
            None => None,
        };

        timer.observe_duration();

        Ok(detail)
    }

    #[instrument(skip(self, filter), fields(clinic_id = %clinic_id))]
    async fn find_many(
        &self,
        clinic_id: Uuid,
        filter: &InvoiceFilter,
        page: i64,
        limit: i64,
    ) -> Result<(Vec<InvoiceDetail>, i64), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_many"])
            .start_timer();

        let limit = limit.clamp(1, 100);
        let offset = (page.max(1) - 1) * limit;
        let status_str = filter.status.map(|s| s.as_str().to_string());

        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices \
             WHERE clinic_id = $1 \
               AND ($2::uuid IS NULL OR patient_id = $2) \
               AND ($3::varchar IS NULL OR status = $3) \
               AND ($4::date IS NULL OR issue_date::date >= $4) \
               AND ($5::date IS NULL OR issue_date::date <= $5) \
             ORDER BY issue_date DESC, created_utc DESC \
             LIMIT $6 OFFSET $7"
        ))
        .bind(clinic_id)
        .bind(filter.patient_id)
        .bind(&status_str)
        .bind(filter.start_date)
        .bind(filter.end_date)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list invoices: {}", e)))?;

        // Count reflects the filter, not the page.
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM invoices \
             WHERE clinic_id = $1 \
               AND ($2::uuid IS NULL OR patient_id = $2) \
               AND ($3::varchar IS NULL OR status = $3) \
               AND ($4::date IS NULL OR issue_date::date >= $4) \
               AND ($5::date IS NULL OR issue_date::date <= $5)",
        )
        .bind(clinic_id)
        .bind(filter.patient_id)
        .bind(&status_str)
        .bind(filter.start_date)
        .bind(filter.end_date)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to count invoices: {}", e)))?;

        let details = self.hydrate(invoices).await?;

        timer.observe_duration();

        Ok((details, total))
    }

    #[instrument(skip(self), fields(clinic_id = %clinic_id))]
    async fn last_invoice_number(&self, clinic_id: Uuid) -> Result<Option<String>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["last_invoice_number"])
            .start_timer();

        let number: Option<String> = sqlx::query_scalar(
            "SELECT invoice_number FROM invoices WHERE clinic_id = $1 \
             ORDER BY created_utc DESC LIMIT 1",
        )
        .bind(clinic_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get last invoice number: {}", e))
        })?;

        timer.observe_duration();

        Ok(number)
    }

    #[instrument(skip(self, input), fields(clinic_id = %input.clinic_id))]
    async fn create(&self, input: &NewInvoice) -> Result<InvoiceDetail, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_invoice"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let invoice_id = Uuid::new_v4();
        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "INSERT INTO invoices ( \
                invoice_id, clinic_id, patient_id, issued_by, invoice_number, status, \
                due_date, subtotal, discount, tax, total, notes \
             ) \
             VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7, $8, $9, $10, $11) \
             RETURNING {INVOICE_COLUMNS}"
        ))
        .bind(invoice_id)
        .bind(input.clinic_id)
        .bind(input.patient_id)
        .bind(input.issued_by)
        .bind(&input.invoice_number)
        .bind(input.due_date)
        .bind(input.subtotal)
        .bind(input.discount)
        .bind(input.tax)
        .bind(input.total)
        .bind(&input.notes)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Invoice number {} already exists for this clinic",
                    input.invoice_number
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create invoice: {}", e)),
        })?;

        let mut items = Vec::with_capacity(input.items.len());
        for item in &input.items {
            let stored = sqlx::query_as::<_, InvoiceItem>(&format!(
                "INSERT INTO invoice_items ( \
                    item_id, invoice_id, clinic_id, service_id, description, quantity, \
                    unit_price, discount, total, sort_order \
                 ) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
                 RETURNING {ITEM_COLUMNS}"
            ))
            .bind(Uuid::new_v4())
            .bind(invoice_id)
            .bind(input.clinic_id)
            .bind(item.service_id)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.discount)
            .bind(item.total)
            .bind(item.sort_order)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to create invoice item: {}", e))
            })?;
            items.push(stored);
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit invoice: {}", e))
        })?;

        timer.observe_duration();

        info!(
            invoice_id = %invoice.invoice_id,
            invoice_number = %invoice.invoice_number,
            "Invoice created"
        );

        Ok(InvoiceDetail {
            invoice,
            items,
            payments: Vec::new(),
        })
    }

    #[instrument(skip(self, input), fields(clinic_id = %clinic_id, invoice_id = %invoice_id))]
    async fn update(
        &self,
        clinic_id: Uuid,
        invoice_id: Uuid,
        input: &UpdateInvoice,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_invoice"])
            .start_timer();

        let status_str = input.status.map(|s| s.as_str().to_string());

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "UPDATE invoices \
             SET status = COALESCE($3, status), \
                 due_date = COALESCE($4, due_date), \
                 notes = COALESCE($5, notes) \
             WHERE clinic_id = $1 AND invoice_id = $2 \
             RETURNING {INVOICE_COLUMNS}"
        ))
        .bind(clinic_id)
        .bind(invoice_id)
        .bind(&status_str)
        .bind(input.due_date)
        .bind(&input.notes)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update invoice: {}", e)))?;

        timer.observe_duration();

        if let Some(ref inv) = invoice {
            info!(invoice_id = %inv.invoice_id, "Invoice updated");
        }

        Ok(invoice)
    }

    #[instrument(skip(self), fields(clinic_id = %clinic_id, invoice_id = %invoice_id))]
    async fn update_status(
        &self,
        clinic_id: Uuid,
        invoice_id: Uuid,
        status: InvoiceStatus,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_status"])
            .start_timer();

        let result = sqlx::query(
            "UPDATE invoices SET status = $3 WHERE clinic_id = $1 AND invoice_id = $2",
        )
        .bind(clinic_id)
        .bind(invoice_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update status: {}", e)))?;

        timer.observe_duration();

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(clinic_id = %clinic_id, invoice_id = %invoice_id))]
    async fn delete_if_unpaid(&self, clinic_id: Uuid, invoice_id: Uuid) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_invoice"])
            .start_timer();

        // Conditioned delete: the payment existence check happens in the
        // same statement, so a concurrently recorded payment blocks the
        // delete even after the policy gate passed.
        let result = sqlx::query(
            "DELETE FROM invoices \
             WHERE clinic_id = $1 AND invoice_id = $2 \
               AND NOT EXISTS (SELECT 1 FROM payments WHERE invoice_id = $2)",
        )
        .bind(clinic_id)
        .bind(invoice_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to delete invoice: {}", e)))?;

        timer.observe_duration();

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(invoice_id = %invoice_id, "Invoice deleted");
        }

        Ok(deleted)
    }

    #[instrument(skip(self), fields(clinic_id = %clinic_id, invoice_id = %invoice_id))]
    async fn has_payments(&self, clinic_id: Uuid, invoice_id: Uuid) -> Result<bool, AppError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM payments WHERE clinic_id = $1 AND invoice_id = $2)",
        )
        .bind(clinic_id)
        .bind(invoice_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to check payments: {}", e)))?;

        Ok(exists)
    }

    #[instrument(skip(self, input), fields(clinic_id = %input.clinic_id, invoice_id = %input.invoice_id))]
    async fn add_payment(
        &self,
        input: &NewPayment,
        invoice_total: Decimal,
    ) -> Result<PaymentOutcome, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["add_payment"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let payment = sqlx::query_as::<_, Payment>(&format!(
            "INSERT INTO payments ( \
                payment_id, invoice_id, clinic_id, amount, method, reference, notes, payment_date \
             ) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(input.invoice_id)
        .bind(input.clinic_id)
        .bind(input.amount)
        .bind(input.method.as_str())
        .bind(&input.reference)
        .bind(&input.notes)
        .bind(input.payment_date.unwrap_or_else(Utc::now))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to record payment: {}", e)))?;

        // Re-read the paid amount inside the transaction so two concurrent
        // payments cannot both derive a status from a stale sum.
        let total_paid: Option<Decimal> = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM payments \
             WHERE clinic_id = $1 AND invoice_id = $2",
        )
        .bind(input.clinic_id)
        .bind(input.invoice_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to sum payments: {}", e)))?;
        let total_paid = total_paid.unwrap_or(Decimal::ZERO);

        let status = billing::payment_status(invoice_total, total_paid);

        sqlx::query(
            "UPDATE invoices SET status = $3 \
             WHERE clinic_id = $1 AND invoice_id = $2 \
               AND status <> $3 AND status <> 'cancelled'",
        )
        .bind(input.clinic_id)
        .bind(input.invoice_id)
        .bind(status.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update status: {}", e)))?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit payment: {}", e))
        })?;

        timer.observe_duration();

        info!(
            payment_id = %payment.payment_id,
            amount = %payment.amount,
            status = status.as_str(),
            "Payment recorded"
        );

        Ok(PaymentOutcome {
            payment,
            total_paid,
            status,
        })
    }

    #[instrument(skip(self), fields(clinic_id = %clinic_id, invoice_id = %invoice_id))]
    async fn total_paid(&self, clinic_id: Uuid, invoice_id: Uuid) -> Result<Decimal, AppError> {
        let total: Option<Decimal> = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM payments \
             WHERE clinic_id = $1 AND invoice_id = $2",
        )
        .bind(clinic_id)
        .bind(invoice_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to sum payments: {}", e)))?;

        Ok(total.unwrap_or(Decimal::ZERO))
    }
}

#[async_trait]
impl AuditSink for Database {
    async fn record(&self, entry: AuditEntry) {
        let result = sqlx::query(
            "INSERT INTO audit_log ( \
                audit_id, user_id, action, entity_type, entity_id, entity_name, detail \
             ) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(Uuid::new_v4())
        .bind(entry.user_id)
        .bind(entry.action.as_str())
        .bind(&entry.entity_type)
        .bind(entry.entity_id)
        .bind(&entry.entity_name)
        .bind(&entry.detail)
        .execute(&self.pool)
        .await;

        // Audit is a compliance side effect; it never blocks the business
        // operation.
        if let Err(e) = result {
            warn!(
                entity_id = %entry.entity_id,
                action = entry.action.as_str(),
                "Failed to write audit entry: {}", e
            );
        }
    }
}
