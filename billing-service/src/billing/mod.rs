//! Pure billing core: money arithmetic, eligibility policy and invoice
//! numbering. No I/O, no storage access; everything here is deterministic
//! and unit-testable in isolation.

pub mod numbering;
pub mod policy;
pub mod totals;

pub use numbering::next_invoice_number;
pub use policy::{
    check_add_payment, check_delete, check_status_change, payment_status, PolicyViolation,
};
pub use totals::{balance, invoice_totals, item_total, total_paid, InvoiceTotals, LineAmounts};
