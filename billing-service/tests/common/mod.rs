//! In-memory test doubles for the invoice repository and audit sink.

use std::sync::Mutex;

use async_trait::async_trait;
use billing_service::billing;
use billing_service::models::{
    AuditEntry, Invoice, InvoiceDetail, InvoiceFilter, InvoiceItem, InvoiceStatus, NewInvoice,
    NewPayment, Payment, UpdateInvoice,
};
use billing_service::services::{AuditSink, InvoiceRepository, PaymentOutcome};
use chrono::Utc;
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;

#[derive(Default)]
struct Store {
    invoices: Vec<Invoice>,
    items: Vec<InvoiceItem>,
    payments: Vec<Payment>,
    /// One-shot override of `last_invoice_number`, to replay the race where
    /// two creations read the same sequence tail.
    stale_last_number: Option<Option<String>>,
}

/// Faithful in-memory stand-in for the PostgreSQL adapter: unique invoice
/// numbers per clinic, clinic scoping on every lookup, transactional
/// payment/status semantics.
#[derive(Default)]
pub struct InMemoryRepository {
    store: Mutex<Store>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `last_invoice_number` call return `number` instead of
    /// the truth, simulating a concurrent creation racing this one.
    pub fn set_stale_last_number(&self, number: Option<String>) {
        self.store
            .lock()
            .unwrap()
            .stale_last_number = Some(number);
    }

    pub fn invoice_count(&self) -> usize {
        self.store.lock().unwrap().invoices.len()
    }

    fn detail_of(store: &Store, invoice: Invoice) -> InvoiceDetail {
        let invoice_id = invoice.invoice_id;
        let mut items: Vec<InvoiceItem> = store
            .items
            .iter()
            .filter(|i| i.invoice_id == invoice_id)
            .cloned()
            .collect();
        items.sort_by_key(|i| i.sort_order);
        let payments: Vec<Payment> = store
            .payments
            .iter()
            .filter(|p| p.invoice_id == invoice_id)
            .cloned()
            .collect();
        InvoiceDetail {
            invoice,
            items,
            payments,
        }
    }
}

#[async_trait]
impl InvoiceRepository for InMemoryRepository {
    async fn find_by_id(
        &self,
        clinic_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<InvoiceDetail>, AppError> {
        let store = self.store.lock().unwrap();
        let invoice = store
            .invoices
            .iter()
            .find(|i| i.clinic_id == clinic_id && i.invoice_id == invoice_id)
            .cloned();
        Ok(invoice.map(|i| Self::detail_of(&store, i)))
    }

    async fn find_many(
        &self,
        clinic_id: Uuid,
        filter: &InvoiceFilter,
        page: i64,
        limit: i64,
    ) -> Result<(Vec<InvoiceDetail>, i64), AppError> {
        let store = self.store.lock().unwrap();
        let mut matching: Vec<Invoice> = store
            .invoices
            .iter()
            .filter(|i| i.clinic_id == clinic_id)
            .filter(|i| filter.patient_id.map_or(true, |p| i.patient_id == p))
            .filter(|i| filter.status.map_or(true, |s| i.status() == s))
            .filter(|i| {
                filter
                    .start_date
                    .map_or(true, |d| i.issue_date.date_naive() >= d)
            })
            .filter(|i| {
                filter
                    .end_date
                    .map_or(true, |d| i.issue_date.date_naive() <= d)
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.issue_date
                .cmp(&a.issue_date)
                .then(b.created_utc.cmp(&a.created_utc))
        });

        let total = matching.len() as i64;
        let limit = limit.clamp(1, 100);
        let offset = ((page.max(1) - 1) * limit) as usize;
        let details = matching
            .into_iter()
            .skip(offset)
            .take(limit as usize)
            .map(|i| Self::detail_of(&store, i))
            .collect();

        Ok((details, total))
    }

    async fn last_invoice_number(&self, clinic_id: Uuid) -> Result<Option<String>, AppError> {
        let mut store = self.store.lock().unwrap();
        if let Some(stale) = store.stale_last_number.take() {
            return Ok(stale);
        }
        let number = store
            .invoices
            .iter()
            .filter(|i| i.clinic_id == clinic_id)
            .max_by_key(|i| i.created_utc)
            .map(|i| i.invoice_number.clone());
        Ok(number)
    }

    async fn create(&self, input: &NewInvoice) -> Result<InvoiceDetail, AppError> {
        let mut store = self.store.lock().unwrap();

        if store
            .invoices
            .iter()
            .any(|i| i.clinic_id == input.clinic_id && i.invoice_number == input.invoice_number)
        {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Invoice number {} already exists for this clinic",
                input.invoice_number
            )));
        }

        let now = Utc::now();
        let invoice = Invoice {
            invoice_id: Uuid::new_v4(),
            clinic_id: input.clinic_id,
            patient_id: input.patient_id,
            issued_by: input.issued_by,
            invoice_number: input.invoice_number.clone(),
            status: InvoiceStatus::Pending.as_str().to_string(),
            issue_date: now,
            due_date: input.due_date,
            subtotal: input.subtotal,
            discount: input.discount,
            tax: input.tax,
            total: input.total,
            notes: input.notes.clone(),
            created_utc: now,
        };

        for item in &input.items {
            store.items.push(InvoiceItem {
                item_id: Uuid::new_v4(),
                invoice_id: invoice.invoice_id,
                clinic_id: input.clinic_id,
                service_id: item.service_id,
                description: item.description.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                discount: item.discount,
                total: item.total,
                sort_order: item.sort_order,
                created_utc: now,
            });
        }
        store.invoices.push(invoice.clone());

        Ok(Self::detail_of(&store, invoice))
    }

    async fn update(
        &self,
        clinic_id: Uuid,
        invoice_id: Uuid,
        input: &UpdateInvoice,
    ) -> Result<Option<Invoice>, AppError> {
        let mut store = self.store.lock().unwrap();
        let invoice = store
            .invoices
            .iter_mut()
            .find(|i| i.clinic_id == clinic_id && i.invoice_id == invoice_id);
        let Some(invoice) = invoice else {
            return Ok(None);
        };

        if let Some(status) = input.status {
            invoice.status = status.as_str().to_string();
        }
        if let Some(due_date) = input.due_date {
            invoice.due_date = Some(due_date);
        }
        if let Some(ref notes) = input.notes {
            invoice.notes = Some(notes.clone());
        }

        Ok(Some(invoice.clone()))
    }

    async fn update_status(
        &self,
        clinic_id: Uuid,
        invoice_id: Uuid,
        status: InvoiceStatus,
    ) -> Result<bool, AppError> {
        let mut store = self.store.lock().unwrap();
        let invoice = store
            .invoices
            .iter_mut()
            .find(|i| i.clinic_id == clinic_id && i.invoice_id == invoice_id);
        match invoice {
            Some(invoice) => {
                invoice.status = status.as_str().to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_if_unpaid(&self, clinic_id: Uuid, invoice_id: Uuid) -> Result<bool, AppError> {
        let mut store = self.store.lock().unwrap();
        if store.payments.iter().any(|p| p.invoice_id == invoice_id) {
            return Ok(false);
        }
        let before = store.invoices.len();
        store
            .invoices
            .retain(|i| !(i.clinic_id == clinic_id && i.invoice_id == invoice_id));
        let deleted = store.invoices.len() < before;
        if deleted {
            store.items.retain(|i| i.invoice_id != invoice_id);
        }
        Ok(deleted)
    }

    async fn has_payments(&self, clinic_id: Uuid, invoice_id: Uuid) -> Result<bool, AppError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .payments
            .iter()
            .any(|p| p.clinic_id == clinic_id && p.invoice_id == invoice_id))
    }

    async fn add_payment(
        &self,
        input: &NewPayment,
        invoice_total: Decimal,
    ) -> Result<PaymentOutcome, AppError> {
        let mut store = self.store.lock().unwrap();
        let now = Utc::now();
        let payment = Payment {
            payment_id: Uuid::new_v4(),
            invoice_id: input.invoice_id,
            clinic_id: input.clinic_id,
            amount: input.amount,
            method: input.method.as_str().to_string(),
            reference: input.reference.clone(),
            notes: input.notes.clone(),
            payment_date: input.payment_date.unwrap_or(now),
            created_utc: now,
        };
        store.payments.push(payment.clone());

        let total_paid: Decimal = store
            .payments
            .iter()
            .filter(|p| p.clinic_id == input.clinic_id && p.invoice_id == input.invoice_id)
            .map(|p| p.amount)
            .sum();
        let status = billing::payment_status(invoice_total, total_paid);

        if let Some(invoice) = store
            .invoices
            .iter_mut()
            .find(|i| i.clinic_id == input.clinic_id && i.invoice_id == input.invoice_id)
        {
            if invoice.status() != InvoiceStatus::Cancelled {
                invoice.status = status.as_str().to_string();
            }
        }

        Ok(PaymentOutcome {
            payment,
            total_paid,
            status,
        })
    }

    async fn total_paid(&self, clinic_id: Uuid, invoice_id: Uuid) -> Result<Decimal, AppError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .payments
            .iter()
            .filter(|p| p.clinic_id == clinic_id && p.invoice_id == invoice_id)
            .map(|p| p.amount)
            .sum())
    }
}

/// Audit sink that records entries for assertions.
#[derive(Default)]
pub struct RecordingAudit {
    entries: Mutex<Vec<AuditEntry>>,
}

impl RecordingAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditSink for RecordingAudit {
    async fn record(&self, entry: AuditEntry) {
        self.entries.lock().unwrap().push(entry);
    }
}
