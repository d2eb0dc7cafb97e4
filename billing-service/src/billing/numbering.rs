//! Sequential invoice number derivation.

/// Invoice numbers are `INV-` followed by a zero-padded sequence; the format
/// is a persisted-state contract consumed by displays and PDF exports.
pub const INVOICE_NUMBER_PREFIX: &str = "INV-";

/// Derive the next invoice number from the clinic's last-issued one.
///
/// No prior number yields `INV-000001`. Otherwise the digits after the last
/// `-` are parsed (a missing or non-numeric suffix counts as zero) and
/// incremented; padding grows past six digits rather than clamping.
///
/// Not concurrency-safe on its own: the caller must have fetched the true
/// last-issued number, and the storage layer's unique constraint on
/// `(clinic_id, invoice_number)` is what resolves concurrent creations
/// (the service retries on conflict).
pub fn next_invoice_number(last: Option<&str>) -> String {
    let next = last
        .and_then(|n| n.rsplit('-').next())
        .and_then(|suffix| suffix.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;

    format!("{}{:06}", INVOICE_NUMBER_PREFIX, next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_number_is_one() {
        assert_eq!(next_invoice_number(None), "INV-000001");
    }

    #[test]
    fn increments_and_keeps_padding() {
        assert_eq!(next_invoice_number(Some("INV-000042")), "INV-000043");
        assert_eq!(next_invoice_number(Some("INV-000999")), "INV-001000");
    }

    #[test]
    fn padding_grows_past_six_digits() {
        assert_eq!(next_invoice_number(Some("INV-999999")), "INV-1000000");
        assert_eq!(next_invoice_number(Some("INV-1000000")), "INV-1000001");
    }

    #[test]
    fn malformed_suffix_restarts_the_sequence() {
        assert_eq!(next_invoice_number(Some("INV-")), "INV-000001");
        assert_eq!(next_invoice_number(Some("INV-ABC")), "INV-000001");
        assert_eq!(next_invoice_number(Some("garbage")), "INV-000001");
    }

    #[test]
    fn parses_suffix_after_the_last_dash() {
        assert_eq!(next_invoice_number(Some("INV-2024-000007")), "INV-000008");
    }
}
