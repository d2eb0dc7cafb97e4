//! Invoice service: orchestrates the repository, the pure billing core and
//! the audit collaborator into the invoicing use cases.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::billing::{self, LineAmounts, PolicyViolation};
use crate::models::{
    AuditAction, AuditEntry, InvoiceDetail, InvoiceFilter, InvoiceStatus, NewInvoice,
    NewInvoiceItem, NewPayment, Payment, PaymentMethod, UpdateInvoice,
};
use crate::services::metrics::{ERRORS_TOTAL, INVOICES_TOTAL, PAYMENTS_TOTAL};
use crate::services::repository::InvoiceRepository;
use crate::services::AuditSink;

/// Attempts at allocating a unique invoice number before giving up. Two
/// concurrent creations can compute the same next number; the loser of the
/// unique constraint re-fetches and retries.
const MAX_CREATE_ATTEMPTS: u32 = 3;

/// A failed invoice operation.
///
/// Business failures are data, not exceptions: handlers map each kind to a
/// status code, and callers can branch on the kind without parsing message
/// text. Infrastructure failures pass through as [`ServiceError::Storage`].
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invoice not found")]
    NotFound,

    #[error(transparent)]
    Policy(#[from] PolicyViolation),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Storage(#[from] AppError),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound => AppError::NotFound(anyhow::anyhow!("Invoice not found")),
            ServiceError::Policy(v) => AppError::Conflict(anyhow::anyhow!("{} ({})", v, v.code())),
            ServiceError::Validation(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            ServiceError::Storage(e) => e,
        }
    }
}

/// Input for creating an invoice with its items.
#[derive(Debug, Clone)]
pub struct CreateInvoiceInput {
    pub patient_id: Uuid,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub items: Vec<CreateItemInput>,
}

/// One requested invoice line. The line total is computed by the
/// calculator, never accepted from the caller.
#[derive(Debug, Clone)]
pub struct CreateItemInput {
    pub service_id: Option<Uuid>,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount: Decimal,
}

/// Input for recording a payment.
#[derive(Debug, Clone)]
pub struct RecordPaymentInput {
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub payment_date: Option<DateTime<Utc>>,
}

/// Monetary summary over the returned page only, not the whole filtered
/// set; callers needing whole-set aggregates must paginate through
/// everything.
#[derive(Debug, Clone, Serialize)]
pub struct PageSummary {
    pub total_amount: Decimal,
    pub total_paid: Decimal,
    pub total_pending: Decimal,
}

/// A page of invoices with pagination metadata and the page summary.
#[derive(Debug, Serialize)]
pub struct ListResult {
    pub invoices: Vec<InvoiceDetail>,
    pub total: i64,
    pub summary: PageSummary,
}

/// Result of recording a payment.
#[derive(Debug, Serialize)]
pub struct PaymentRecorded {
    pub payment: Payment,
    pub status: InvoiceStatus,
    pub total_paid: Decimal,
    pub balance: Decimal,
}

/// Paid amount and outstanding balance of an invoice, for display.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct InvoiceBalance {
    pub total_paid: Decimal,
    pub balance: Decimal,
}

/// The invoicing use cases. Every mutating operation and every successful
/// read-by-id emits an audit entry.
#[derive(Clone)]
pub struct InvoiceService {
    repo: Arc<dyn InvoiceRepository>,
    audit: Arc<dyn AuditSink>,
}

impl InvoiceService {
    pub fn new(repo: Arc<dyn InvoiceRepository>, audit: Arc<dyn AuditSink>) -> Self {
        Self { repo, audit }
    }

    /// Create an invoice with its items. Item totals and the aggregate
    /// totals come from the calculator; status is always pending; the
    /// invoice number is allocated from the clinic's sequence, retrying on
    /// a duplicate-number conflict.
    #[instrument(skip(self, input), fields(clinic_id = %clinic_id, user_id = %user_id))]
    pub async fn create(
        &self,
        clinic_id: Uuid,
        user_id: Uuid,
        input: CreateInvoiceInput,
    ) -> Result<InvoiceDetail, ServiceError> {
        if input.items.is_empty() {
            return Err(ServiceError::Validation(
                "invoice requires at least one item".to_string(),
            ));
        }
        for item in &input.items {
            validate_item(item)?;
        }

        let lines: Vec<LineAmounts> = input
            .items
            .iter()
            .map(|i| LineAmounts {
                quantity: i.quantity,
                unit_price: i.unit_price,
                discount: i.discount,
            })
            .collect();
        let totals = billing::invoice_totals(&lines);

        let items: Vec<NewInvoiceItem> = input
            .items
            .iter()
            .enumerate()
            .map(|(idx, i)| NewInvoiceItem {
                service_id: i.service_id,
                description: i.description.clone(),
                quantity: i.quantity,
                unit_price: i.unit_price,
                discount: i.discount,
                total: billing::item_total(i.quantity, i.unit_price, i.discount),
                sort_order: idx as i32,
            })
            .collect();

        let mut attempt = 0;
        loop {
            attempt += 1;

            let last = self.repo.last_invoice_number(clinic_id).await?;
            let invoice_number = billing::next_invoice_number(last.as_deref());

            let new_invoice = NewInvoice {
                clinic_id,
                patient_id: input.patient_id,
                issued_by: user_id,
                invoice_number: invoice_number.clone(),
                due_date: input.due_date,
                subtotal: totals.subtotal,
                discount: totals.total_discount,
                tax: totals.tax,
                total: totals.total,
                notes: input.notes.clone(),
                items: items.clone(),
            };

            match self.repo.create(&new_invoice).await {
                Ok(detail) => {
                    INVOICES_TOTAL
                        .with_label_values(&[InvoiceStatus::Pending.as_str()])
                        .inc();
                    self.audit
                        .record(AuditEntry::invoice(
                            user_id,
                            AuditAction::Create,
                            detail.invoice.invoice_id,
                            &detail.invoice.invoice_number,
                        ))
                        .await;
                    return Ok(detail);
                }
                Err(AppError::Conflict(e)) if attempt < MAX_CREATE_ATTEMPTS => {
                    warn!(
                        invoice_number = %invoice_number,
                        attempt = attempt,
                        "Invoice number taken, retrying: {}", e
                    );
                }
                Err(e) => {
                    ERRORS_TOTAL.with_label_values(&["create_invoice"]).inc();
                    return Err(e.into());
                }
            }
        }
    }

    /// Fetch an invoice with items and payments. A hit is audited as a
    /// read: access to financial records is part of the compliance trail.
    #[instrument(skip(self), fields(clinic_id = %clinic_id, invoice_id = %invoice_id))]
    pub async fn get_by_id(
        &self,
        clinic_id: Uuid,
        user_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<InvoiceDetail>, ServiceError> {
        let detail = self.repo.find_by_id(clinic_id, invoice_id).await?;

        if let Some(ref detail) = detail {
            self.audit
                .record(AuditEntry::invoice(
                    user_id,
                    AuditAction::Read,
                    detail.invoice.invoice_id,
                    &detail.invoice.invoice_number,
                ))
                .await;
        }

        Ok(detail)
    }

    /// Fetch a page of invoices plus the filtered total count and the
    /// page-scoped monetary summary.
    #[instrument(skip(self, filter), fields(clinic_id = %clinic_id))]
    pub async fn get_many(
        &self,
        clinic_id: Uuid,
        filter: &InvoiceFilter,
        page: i64,
        limit: i64,
    ) -> Result<ListResult, ServiceError> {
        let (invoices, total) = self.repo.find_many(clinic_id, filter, page, limit).await?;

        let total_amount: Decimal = invoices.iter().map(|d| d.invoice.total).sum();
        let total_paid: Decimal = invoices
            .iter()
            .map(|d| billing::total_paid(d.payments.iter().map(|p| p.amount)))
            .sum();

        Ok(ListResult {
            invoices,
            total,
            summary: PageSummary {
                total_amount,
                total_paid,
                total_pending: total_amount - total_paid,
            },
        })
    }

    /// Partial administrative update of status, due date and notes. A
    /// cancelled invoice cannot be moved back to another status.
    #[instrument(skip(self, input), fields(clinic_id = %clinic_id, invoice_id = %invoice_id))]
    pub async fn update(
        &self,
        clinic_id: Uuid,
        user_id: Uuid,
        invoice_id: Uuid,
        input: UpdateInvoice,
    ) -> Result<InvoiceDetail, ServiceError> {
        let existing = self
            .repo
            .find_by_id(clinic_id, invoice_id)
            .await?
            .ok_or(ServiceError::NotFound)?;

        if let Some(new_status) = input.status {
            billing::check_status_change(existing.invoice.status(), new_status)?;
        }

        let updated = self
            .repo
            .update(clinic_id, invoice_id, &input)
            .await?
            .ok_or(ServiceError::NotFound)?;

        self.audit
            .record(AuditEntry::invoice(
                user_id,
                AuditAction::Update,
                updated.invoice_id,
                &updated.invoice_number,
            ))
            .await;

        Ok(InvoiceDetail {
            invoice: updated,
            items: existing.items,
            payments: existing.payments,
        })
    }

    /// Delete an invoice if policy allows: no recorded payments and not
    /// paid. The repository delete re-checks payment absence in the same
    /// statement, closing the delete/add-payment race.
    #[instrument(skip(self), fields(clinic_id = %clinic_id, invoice_id = %invoice_id))]
    pub async fn delete(
        &self,
        clinic_id: Uuid,
        user_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<(), ServiceError> {
        let existing = self
            .repo
            .find_by_id(clinic_id, invoice_id)
            .await?
            .ok_or(ServiceError::NotFound)?;

        let has_payments = self.repo.has_payments(clinic_id, invoice_id).await?;
        billing::check_delete(existing.invoice.status(), has_payments)?;

        let deleted = self.repo.delete_if_unpaid(clinic_id, invoice_id).await?;
        if !deleted {
            // A payment landed between the policy gate and the delete.
            return Err(PolicyViolation::HasPayments.into());
        }

        self.audit
            .record(AuditEntry::invoice(
                user_id,
                AuditAction::Delete,
                existing.invoice.invoice_id,
                &existing.invoice.invoice_number,
            ))
            .await;

        Ok(())
    }

    /// Record a payment against an invoice and re-derive its status from
    /// the cumulative paid amount. Only a cancelled invoice rejects
    /// payments; an amount above the outstanding balance is accepted and
    /// simply drives the status to paid.
    #[instrument(skip(self, input), fields(clinic_id = %clinic_id, invoice_id = %invoice_id))]
    pub async fn add_payment(
        &self,
        clinic_id: Uuid,
        user_id: Uuid,
        invoice_id: Uuid,
        input: RecordPaymentInput,
    ) -> Result<PaymentRecorded, ServiceError> {
        if input.amount <= Decimal::ZERO {
            return Err(ServiceError::Validation(
                "payment amount must be positive".to_string(),
            ));
        }

        let existing = self
            .repo
            .find_by_id(clinic_id, invoice_id)
            .await?
            .ok_or(ServiceError::NotFound)?;
        let previous_status = existing.invoice.status();
        billing::check_add_payment(previous_status)?;

        let outcome = self
            .repo
            .add_payment(
                &NewPayment {
                    clinic_id,
                    invoice_id,
                    amount: input.amount,
                    method: input.method,
                    reference: input.reference,
                    notes: input.notes,
                    payment_date: input.payment_date,
                },
                existing.invoice.total,
            )
            .await?;

        PAYMENTS_TOTAL
            .with_label_values(&[input.method.as_str()])
            .inc();
        if outcome.status != previous_status {
            INVOICES_TOTAL
                .with_label_values(&[outcome.status.as_str()])
                .inc();
        }

        info!(
            payment_id = %outcome.payment.payment_id,
            amount = %outcome.payment.amount,
            status = outcome.status.as_str(),
            "Payment applied"
        );

        self.audit
            .record(
                AuditEntry::invoice(
                    user_id,
                    AuditAction::Update,
                    existing.invoice.invoice_id,
                    &existing.invoice.invoice_number,
                )
                .with_detail(format!(
                    "payment of {} recorded via {}; status {} -> {}",
                    outcome.payment.amount,
                    input.method.as_str(),
                    previous_status.as_str(),
                    outcome.status.as_str()
                )),
            )
            .await;

        let balance = billing::balance(existing.invoice.total, outcome.total_paid);

        Ok(PaymentRecorded {
            payment: outcome.payment,
            status: outcome.status,
            total_paid: outcome.total_paid,
            balance,
        })
    }

    /// Paid amount and balance of an already-loaded invoice; pure, for
    /// display purposes.
    pub fn totals_of(detail: &InvoiceDetail) -> InvoiceBalance {
        let total_paid = billing::total_paid(detail.payments.iter().map(|p| p.amount));
        InvoiceBalance {
            total_paid,
            balance: billing::balance(detail.invoice.total, total_paid),
        }
    }
}

fn validate_item(item: &CreateItemInput) -> Result<(), ServiceError> {
    if item.quantity <= Decimal::ZERO {
        return Err(ServiceError::Validation(format!(
            "item '{}': quantity must be positive",
            item.description
        )));
    }
    if item.unit_price < Decimal::ZERO {
        return Err(ServiceError::Validation(format!(
            "item '{}': unit price must not be negative",
            item.description
        )));
    }
    if item.discount < Decimal::ZERO {
        return Err(ServiceError::Validation(format!(
            "item '{}': discount must not be negative",
            item.description
        )));
    }
    if item.discount > item.quantity * item.unit_price {
        return Err(ServiceError::Validation(format!(
            "item '{}': discount exceeds the line amount",
            item.description
        )));
    }
    Ok(())
}
