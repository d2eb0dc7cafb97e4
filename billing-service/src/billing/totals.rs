//! Money arithmetic over `rust_decimal::Decimal`.
//!
//! Amounts are fixed-point decimals throughout; floating point would drift
//! over repeated sums and is never acceptable for invoice money.

use rust_decimal::Decimal;
use serde::Serialize;

/// The monetary inputs of one invoice line.
#[derive(Debug, Clone, Copy)]
pub struct LineAmounts {
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount: Decimal,
}

/// Aggregate totals of an invoice, computed from its lines and persisted
/// atomically with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InvoiceTotals {
    pub subtotal: Decimal,
    pub total_discount: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

/// Line total: `quantity * unit_price - discount`.
pub fn item_total(quantity: Decimal, unit_price: Decimal, discount: Decimal) -> Decimal {
    quantity * unit_price - discount
}

/// Aggregate totals over a list of lines.
///
/// Tax is reserved for future tax-rate logic and currently always zero;
/// `total == subtotal - total_discount + tax` regardless.
pub fn invoice_totals(lines: &[LineAmounts]) -> InvoiceTotals {
    let subtotal: Decimal = lines.iter().map(|l| l.quantity * l.unit_price).sum();
    let total_discount: Decimal = lines.iter().map(|l| l.discount).sum();
    let tax = Decimal::ZERO;

    InvoiceTotals {
        subtotal,
        total_discount,
        tax,
        total: subtotal - total_discount + tax,
    }
}

/// Cumulative paid amount. Commutative sum; an empty list yields zero.
pub fn total_paid<I>(amounts: I) -> Decimal
where
    I: IntoIterator<Item = Decimal>,
{
    amounts.into_iter().sum()
}

/// Outstanding balance: `total - total_paid`. May be negative when overpaid;
/// a negative balance is a signal for the operator, not an error.
pub fn balance(total: Decimal, total_paid: Decimal) -> Decimal {
    total - total_paid
}
