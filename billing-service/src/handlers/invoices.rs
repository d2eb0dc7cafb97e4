//! Invoice handlers with multi-tenant support.
//!
//! All operations are scoped to the clinic from the request context. The
//! handlers translate between the HTTP surface and [`InvoiceService`];
//! business rules live below this layer.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    middleware::ClinicContext,
    models::{InvoiceDetail, InvoiceFilter, InvoiceStatus, PaymentMethod, UpdateInvoice},
    services::invoice::{
        CreateInvoiceInput, CreateItemInput, InvoiceService, ListResult, PaymentRecorded,
        RecordPaymentInput,
    },
    AppState,
};

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

/// Request body for creating an invoice.
#[derive(Debug, Deserialize)]
pub struct CreateInvoiceRequest {
    pub patient_id: Uuid,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub items: Vec<InvoiceItemRequest>,
}

/// One requested invoice line.
#[derive(Debug, Deserialize)]
pub struct InvoiceItemRequest {
    pub service_id: Option<Uuid>,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    #[serde(default)]
    pub discount: Decimal,
}

/// Request body for a partial invoice update.
#[derive(Debug, Deserialize)]
pub struct UpdateInvoiceRequest {
    pub status: Option<InvoiceStatus>,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// Request body for recording a payment.
#[derive(Debug, Deserialize)]
pub struct RecordPaymentRequest {
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub payment_date: Option<DateTime<Utc>>,
}

/// Query parameters for listing invoices.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub patient_id: Option<Uuid>,
    pub status: Option<InvoiceStatus>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Invoice detail enriched with the paid amount and outstanding balance.
#[derive(Debug, Serialize)]
pub struct InvoiceResponse {
    #[serde(flatten)]
    pub detail: InvoiceDetail,
    pub total_paid: Decimal,
    pub balance: Decimal,
}

impl From<InvoiceDetail> for InvoiceResponse {
    fn from(detail: InvoiceDetail) -> Self {
        let totals = InvoiceService::totals_of(&detail);
        Self {
            detail,
            total_paid: totals.total_paid,
            balance: totals.balance,
        }
    }
}

/// Create a new invoice within the clinic's scope.
pub async fn create_invoice(
    State(state): State<AppState>,
    clinic: ClinicContext,
    Json(payload): Json<CreateInvoiceRequest>,
) -> Result<(StatusCode, Json<InvoiceResponse>), AppError> {
    tracing::info!(
        clinic_id = %clinic.clinic_id,
        patient_id = %payload.patient_id,
        item_count = payload.items.len(),
        "Creating invoice"
    );

    let input = CreateInvoiceInput {
        patient_id: payload.patient_id,
        due_date: payload.due_date,
        notes: payload.notes,
        items: payload
            .items
            .into_iter()
            .map(|i| CreateItemInput {
                service_id: i.service_id,
                description: i.description,
                quantity: i.quantity,
                unit_price: i.unit_price,
                discount: i.discount,
            })
            .collect(),
    };

    let detail = state
        .invoices
        .create(clinic.clinic_id, clinic.user_id, input)
        .await?;

    Ok((StatusCode::CREATED, Json(detail.into())))
}

/// List invoices within the clinic's scope, paginated and filtered.
pub async fn list_invoices(
    State(state): State<AppState>,
    clinic: ClinicContext,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResult>, AppError> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);

    let filter = InvoiceFilter {
        patient_id: query.patient_id,
        status: query.status,
        start_date: query.start_date,
        end_date: query.end_date,
    };

    let result = state
        .invoices
        .get_many(clinic.clinic_id, &filter, page, limit)
        .await?;

    Ok(Json(result))
}

/// Get an invoice by ID within the clinic's scope.
pub async fn get_invoice(
    State(state): State<AppState>,
    clinic: ClinicContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<InvoiceResponse>, AppError> {
    let detail = state
        .invoices
        .get_by_id(clinic.clinic_id, clinic.user_id, invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

    Ok(Json(detail.into()))
}

/// Partially update an invoice within the clinic's scope.
pub async fn update_invoice(
    State(state): State<AppState>,
    clinic: ClinicContext,
    Path(invoice_id): Path<Uuid>,
    Json(payload): Json<UpdateInvoiceRequest>,
) -> Result<Json<InvoiceResponse>, AppError> {
    tracing::info!(
        clinic_id = %clinic.clinic_id,
        invoice_id = %invoice_id,
        new_status = ?payload.status,
        "Updating invoice"
    );

    let input = UpdateInvoice {
        status: payload.status,
        due_date: payload.due_date,
        notes: payload.notes,
    };

    let detail = state
        .invoices
        .update(clinic.clinic_id, clinic.user_id, invoice_id, input)
        .await?;

    Ok(Json(detail.into()))
}

/// Delete an unpaid invoice within the clinic's scope.
pub async fn delete_invoice(
    State(state): State<AppState>,
    clinic: ClinicContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    tracing::info!(
        clinic_id = %clinic.clinic_id,
        invoice_id = %invoice_id,
        "Deleting invoice"
    );

    state
        .invoices
        .delete(clinic.clinic_id, clinic.user_id, invoice_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Record a payment against an invoice within the clinic's scope.
pub async fn record_payment(
    State(state): State<AppState>,
    clinic: ClinicContext,
    Path(invoice_id): Path<Uuid>,
    Json(payload): Json<RecordPaymentRequest>,
) -> Result<(StatusCode, Json<PaymentRecorded>), AppError> {
    tracing::info!(
        clinic_id = %clinic.clinic_id,
        invoice_id = %invoice_id,
        amount = %payload.amount,
        method = payload.method.as_str(),
        "Recording payment"
    );

    let input = RecordPaymentInput {
        amount: payload.amount,
        method: payload.method,
        reference: payload.reference,
        notes: payload.notes,
        payment_date: payload.payment_date,
    };

    let recorded = state
        .invoices
        .add_payment(clinic.clinic_id, clinic.user_id, invoice_id, input)
        .await?;

    Ok((StatusCode::CREATED, Json(recorded)))
}
