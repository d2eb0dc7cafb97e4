//! Persistence port for invoices.
//!
//! The service depends on this trait, never on a concrete database; the
//! PostgreSQL adapter lives in [`crate::services::database`] and tests run
//! against in-memory fakes.

use async_trait::async_trait;
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::{
    Invoice, InvoiceDetail, InvoiceFilter, InvoiceStatus, NewInvoice, NewPayment, Payment,
    UpdateInvoice,
};

/// Result of recording a payment transactionally.
#[derive(Debug, Clone)]
pub struct PaymentOutcome {
    pub payment: Payment,
    /// Cumulative paid amount including this payment, summed inside the
    /// recording transaction.
    pub total_paid: Decimal,
    /// Status derived from the in-transaction paid amount.
    pub status: InvoiceStatus,
}

/// Storage operations for invoices, items and payments.
///
/// Every operation is clinic-scoped: an invoice belonging to another clinic
/// behaves exactly like a missing one, so existence never leaks across
/// tenants.
#[async_trait]
pub trait InvoiceRepository: Send + Sync {
    /// Fetch an invoice with its items and payments.
    async fn find_by_id(
        &self,
        clinic_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<InvoiceDetail>, AppError>;

    /// Fetch a page of invoices ordered by issue date descending, plus the
    /// total count matching the filter (not the page).
    async fn find_many(
        &self,
        clinic_id: Uuid,
        filter: &InvoiceFilter,
        page: i64,
        limit: i64,
    ) -> Result<(Vec<InvoiceDetail>, i64), AppError>;

    /// The most recently created invoice's number for the clinic, if any.
    /// Ordering is by creation time, not lexical.
    async fn last_invoice_number(&self, clinic_id: Uuid) -> Result<Option<String>, AppError>;

    /// Persist an invoice and its items in one transaction, with status
    /// forced to pending. A duplicate invoice number for the clinic
    /// surfaces as [`AppError::Conflict`]; the caller retries.
    async fn create(&self, input: &NewInvoice) -> Result<InvoiceDetail, AppError>;

    /// Partial update of status/due date/notes only.
    async fn update(
        &self,
        clinic_id: Uuid,
        invoice_id: Uuid,
        input: &UpdateInvoice,
    ) -> Result<Option<Invoice>, AppError>;

    /// Narrow status-only update.
    async fn update_status(
        &self,
        clinic_id: Uuid,
        invoice_id: Uuid,
        status: InvoiceStatus,
    ) -> Result<bool, AppError>;

    /// Delete the invoice (items cascade) only if no payment rows exist,
    /// checked within the delete itself so a concurrent payment cannot
    /// slip past the policy gate. Returns whether a row was removed.
    async fn delete_if_unpaid(&self, clinic_id: Uuid, invoice_id: Uuid) -> Result<bool, AppError>;

    /// Whether any payment rows exist for the invoice.
    async fn has_payments(&self, clinic_id: Uuid, invoice_id: Uuid) -> Result<bool, AppError>;

    /// Insert a payment and re-derive the invoice status from the payment
    /// sum re-read inside the same transaction (lost-update guard). The
    /// status derivation itself is the pure policy function; a cancelled
    /// invoice's status is never overwritten.
    async fn add_payment(
        &self,
        input: &NewPayment,
        invoice_total: Decimal,
    ) -> Result<PaymentOutcome, AppError>;

    /// Storage-side payment sum, for callers that don't need the full
    /// invoice loaded.
    async fn total_paid(&self, clinic_id: Uuid, invoice_id: Uuid) -> Result<Decimal, AppError>;
}
