//! Domain models for billing-service.

mod audit;
mod invoice;
mod item;
mod payment;

pub use audit::{AuditAction, AuditEntry};
pub use invoice::{
    Invoice, InvoiceDetail, InvoiceFilter, InvoiceStatus, NewInvoice, UpdateInvoice,
};
pub use item::{InvoiceItem, NewInvoiceItem};
pub use payment::{NewPayment, Payment, PaymentMethod};
