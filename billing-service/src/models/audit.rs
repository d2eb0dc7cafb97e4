//! Audit trail types.
//!
//! Every mutating invoice operation and every successful read-by-id emits an
//! audit entry (clinical/financial record access trail).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audit action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Read,
    Update,
    Delete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Read => "read",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
        }
    }
}

/// Audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub user_id: Uuid,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub entity_name: String,
    pub detail: Option<String>,
}

impl AuditEntry {
    /// Create an invoice audit entry. `entity_name` is the human-readable
    /// invoice number.
    pub fn invoice(
        user_id: Uuid,
        action: AuditAction,
        invoice_id: Uuid,
        invoice_number: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            action,
            entity_type: "Invoice".to_string(),
            entity_id: invoice_id,
            entity_name: invoice_number.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
