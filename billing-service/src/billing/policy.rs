//! Eligibility policy for invoice mutations and payment-status derivation.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::InvoiceStatus;

/// A business rule rejection. The `Display` string is directly displayable;
/// [`PolicyViolation::code`] gives the machine-readable kind so callers
/// never branch on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    #[error("invoice has recorded payments")]
    HasPayments,

    #[error("invoice is already paid")]
    AlreadyPaid,

    #[error("invoice is cancelled")]
    InvoiceCancelled,
}

impl PolicyViolation {
    pub fn code(&self) -> &'static str {
        match self {
            PolicyViolation::HasPayments => "HAS_PAYMENTS",
            PolicyViolation::AlreadyPaid => "ALREADY_PAID",
            PolicyViolation::InvoiceCancelled => "INVOICE_CANCELLED",
        }
    }
}

/// Derive the payment status from the paid amount against the total.
///
/// Nothing paid is always `Pending`, even on a zero-total invoice; any paid
/// amount covering the total (overpayment included) is `Paid`; anything in
/// between is `Partial`. `Cancelled` is never derived here.
pub fn payment_status(total: Decimal, total_paid: Decimal) -> InvoiceStatus {
    if total_paid <= Decimal::ZERO {
        InvoiceStatus::Pending
    } else if total_paid >= total {
        InvoiceStatus::Paid
    } else {
        InvoiceStatus::Partial
    }
}

/// Whether an invoice may be deleted.
///
/// Recorded payments block deletion first; a `Paid` status blocks it
/// independently, since status can be set administratively without payment
/// rows existing.
pub fn check_delete(status: InvoiceStatus, has_payments: bool) -> Result<(), PolicyViolation> {
    if has_payments {
        return Err(PolicyViolation::HasPayments);
    }
    if status == InvoiceStatus::Paid {
        return Err(PolicyViolation::AlreadyPaid);
    }
    Ok(())
}

/// Whether a payment may be added. Only `Cancelled` blocks; `Paid` invoices
/// still accept adjustment payments.
pub fn check_add_payment(status: InvoiceStatus) -> Result<(), PolicyViolation> {
    if status == InvoiceStatus::Cancelled {
        return Err(PolicyViolation::InvoiceCancelled);
    }
    Ok(())
}

/// Whether an administrative status change is allowed. A cancelled invoice
/// cannot be moved back to another status.
pub fn check_status_change(
    current: InvoiceStatus,
    new: InvoiceStatus,
) -> Result<(), PolicyViolation> {
    if current == InvoiceStatus::Cancelled && new != InvoiceStatus::Cancelled {
        return Err(PolicyViolation::InvoiceCancelled);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn payment_status_boundaries() {
        assert_eq!(payment_status(dec!(100), dec!(0)), InvoiceStatus::Pending);
        assert_eq!(payment_status(dec!(100), dec!(50)), InvoiceStatus::Partial);
        assert_eq!(payment_status(dec!(100), dec!(100)), InvoiceStatus::Paid);
        assert_eq!(payment_status(dec!(100), dec!(150)), InvoiceStatus::Paid);
    }

    #[test]
    fn zero_total_invoice_is_pending_until_a_payment_lands() {
        assert_eq!(payment_status(dec!(0), dec!(0)), InvoiceStatus::Pending);
        assert_eq!(payment_status(dec!(0), dec!(0.01)), InvoiceStatus::Paid);
    }

    #[test]
    fn delete_allowed_only_without_payments_and_not_paid() {
        assert_eq!(check_delete(InvoiceStatus::Pending, false), Ok(()));
        assert_eq!(check_delete(InvoiceStatus::Partial, false), Ok(()));
        assert_eq!(
            check_delete(InvoiceStatus::Pending, true),
            Err(PolicyViolation::HasPayments)
        );
        assert_eq!(
            check_delete(InvoiceStatus::Paid, false),
            Err(PolicyViolation::AlreadyPaid)
        );
        // payments check takes precedence over the paid check
        assert_eq!(
            check_delete(InvoiceStatus::Paid, true),
            Err(PolicyViolation::HasPayments)
        );
    }

    #[test]
    fn payments_blocked_only_on_cancelled_invoices() {
        assert_eq!(check_add_payment(InvoiceStatus::Pending), Ok(()));
        assert_eq!(check_add_payment(InvoiceStatus::Partial), Ok(()));
        assert_eq!(check_add_payment(InvoiceStatus::Paid), Ok(()));
        assert_eq!(
            check_add_payment(InvoiceStatus::Cancelled),
            Err(PolicyViolation::InvoiceCancelled)
        );
    }

    #[test]
    fn cancelled_invoices_cannot_change_status() {
        assert_eq!(
            check_status_change(InvoiceStatus::Cancelled, InvoiceStatus::Pending),
            Err(PolicyViolation::InvoiceCancelled)
        );
        assert_eq!(
            check_status_change(InvoiceStatus::Cancelled, InvoiceStatus::Cancelled),
            Ok(())
        );
        assert_eq!(
            check_status_change(InvoiceStatus::Pending, InvoiceStatus::Cancelled),
            Ok(())
        );
    }

    #[test]
    fn violation_codes_are_stable() {
        assert_eq!(PolicyViolation::HasPayments.code(), "HAS_PAYMENTS");
        assert_eq!(PolicyViolation::AlreadyPaid.code(), "ALREADY_PAID");
        assert_eq!(PolicyViolation::InvoiceCancelled.code(), "INVOICE_CANCELLED");
    }
}
