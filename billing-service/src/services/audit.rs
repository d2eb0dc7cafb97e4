//! Audit collaborator port.

use async_trait::async_trait;

use crate::models::AuditEntry;

/// Sink for audit trail entries.
///
/// Recording is infallible from the caller's perspective: an audit failure
/// must never block the business operation, so implementations log failures
/// and swallow them.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry);
}
