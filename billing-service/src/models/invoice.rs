//! Invoice model for billing-service.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::{InvoiceItem, NewInvoiceItem, Payment};

/// Invoice status.
///
/// `Pending`, `Partial` and `Paid` are derived from the paid amount against
/// the invoice total; `Cancelled` is an explicit administrative override and
/// is never derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Partial,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Partial => "partial",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "partial" => InvoiceStatus::Partial,
            "paid" => InvoiceStatus::Paid,
            "cancelled" => InvoiceStatus::Cancelled,
            _ => InvoiceStatus::Pending,
        }
    }
}

/// Invoice document issued to a patient.
///
/// Monetary fields satisfy `total == subtotal - discount + tax` at all
/// times; `invoice_number` is unique per clinic (`INV-` + zero-padded
/// sequence, a persisted-state contract).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
    pub issued_by: Uuid,
    pub invoice_number: String,
    pub status: String,
    pub issue_date: DateTime<Utc>,
    pub due_date: Option<NaiveDate>,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub notes: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl Invoice {
    pub fn status(&self) -> InvoiceStatus {
        InvoiceStatus::from_string(&self.status)
    }
}

/// Invoice with its items and payments resolved.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceDetail {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub items: Vec<InvoiceItem>,
    pub payments: Vec<Payment>,
}

/// Filter parameters for listing invoices. Clinic scoping is mandatory and
/// carried separately; everything here is optional.
#[derive(Debug, Clone, Default)]
pub struct InvoiceFilter {
    pub patient_id: Option<Uuid>,
    pub status: Option<InvoiceStatus>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// Input for persisting an invoice with its items. Totals are already
/// computed by the calculator; the repository stores them verbatim.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
    pub issued_by: Uuid,
    pub invoice_number: String,
    pub due_date: Option<NaiveDate>,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub notes: Option<String>,
    pub items: Vec<NewInvoiceItem>,
}

/// Partial update of an invoice. Items and payments are not mutable through
/// this operation.
#[derive(Debug, Clone, Default)]
pub struct UpdateInvoice {
    pub status: Option<InvoiceStatus>,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}
