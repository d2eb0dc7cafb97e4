//! Services module for billing-service.

pub mod audit;
pub mod database;
pub mod invoice;
pub mod metrics;
pub mod repository;

pub use audit::AuditSink;
pub use database::Database;
pub use invoice::{InvoiceService, ServiceError};
pub use metrics::{get_metrics, init_metrics};
pub use repository::{InvoiceRepository, PaymentOutcome};
