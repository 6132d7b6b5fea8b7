//! Decimal arithmetic utilities for financial calculations.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Floor a quantity down to the venue's minimum tradable increment.
pub fn floor_to_increment(value: Decimal, increment: Decimal) -> Decimal {
    if increment == Decimal::ZERO {
        return value;
    }
    (value / increment).floor() * increment
}

/// Signed percentage change from `from` to `to` (e.g., 100 -> 106 = 6).
pub fn pct_change(from: Decimal, to: Decimal) -> Decimal {
    if from == Decimal::ZERO {
        return Decimal::ZERO;
    }
    (to - from) / from * dec!(100)
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_to_increment() {
        assert_eq!(floor_to_increment(dec!(1.567), dec!(0.001)), dec!(1.567));
        assert_eq!(floor_to_increment(dec!(1.567), dec!(0.01)), dec!(1.56));
        assert_eq!(floor_to_increment(dec!(1.567), dec!(0.1)), dec!(1.5));
        assert_eq!(
            floor_to_increment(dec!(0.123456789), dec!(0.00000001)),
            dec!(0.12345678)
        );
    }

    #[test]
    fn test_floor_to_increment_zero_increment_passthrough() {
        assert_eq!(floor_to_increment(dec!(1.567), Decimal::ZERO), dec!(1.567));
    }

    #[test]
    fn test_pct_change_signed() {
        assert_eq!(pct_change(dec!(100), dec!(106)), dec!(6));
        assert_eq!(pct_change(dec!(100), dec!(94)), dec!(-6));
        assert_eq!(pct_change(dec!(0), dec!(100)), Decimal::ZERO);
    }

    #[test]
    fn test_safe_div() {
        assert_eq!(safe_div(dec!(10), dec!(4)), dec!(2.5));
        assert_eq!(safe_div(dec!(10), Decimal::ZERO), Decimal::ZERO);
    }
}
