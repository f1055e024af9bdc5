//! Currency boundary helpers.
//!
//! Persisted amounts are integer cents. The calculator works in whole
//! currency units as `f64` and values are rounded exactly once, here.

/// Convert integer cents to currency units.
pub fn to_units(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// Convert currency units to integer cents, rounding half away from zero.
pub fn to_cents(units: f64) -> i64 {
    (units * 100.0).round() as i64
}

/// Parse a decimal amount as sent by the payment gateway ("1500.00").
pub fn parse_units(raw: &str) -> Option<i64> {
    let units: f64 = raw.trim().parse().ok()?;
    if !units.is_finite() || units < 0.0 {
        return None;
    }
    Some(to_cents(units))
}
