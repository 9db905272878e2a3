//! Decimal arithmetic utilities for financial calculations.

use rust_decimal::Decimal;

/// Round a quantity down to the exchange step size.
///
/// Returns the largest multiple of `step` that is at most `quantity`.
/// Quantities below one step round to zero, and a non-positive step
/// yields zero rather than a division error.
pub fn normalize_to_step(quantity: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO || quantity <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (quantity / step).floor() * step
}

/// Safe division that returns zero if the divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}
