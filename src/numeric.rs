//! Numeric helpers shared by the metric and chronicle code.
//!
//! Persisted values are rounded through `rust_decimal` with an explicit
//! half-away-from-zero strategy.

use rust_decimal::prelude::*;
use rust_decimal::{Decimal, RoundingStrategy};

/// Round to `dp` decimal places, half away from zero. Non-finite input maps to 0.
pub fn round_dp(value: f64, dp: u32) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    Decimal::from_f64(value)
        .map(|d| d.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|d| d.to_f64())
        .unwrap_or(0.0)
}

/// Replace NaN / infinity with zero
pub fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Division that yields 0 instead of NaN or infinity
pub fn safe_div(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 || !denominator.is_finite() {
        return 0.0;
    }
    finite_or_zero(numerator / denominator)
}

/// Arithmetic mean, `None` for an empty slice
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_dp_half_away_from_zero() {
        assert_eq!(round_dp(12.345678, 2), 12.35);
        assert_eq!(round_dp(-2.25, 1), -2.3);
        assert_eq!(round_dp(42.0, 2), 42.0);
    }

    #[test]
    fn test_round_dp_non_finite() {
        assert_eq!(round_dp(f64::NAN, 2), 0.0);
        assert_eq!(round_dp(f64::INFINITY, 1), 0.0);
    }

    #[test]
    fn test_safe_div() {
        assert_eq!(safe_div(10.0, 0.0), 0.0);
        assert_eq!(safe_div(10.0, 4.0), 2.5);
        assert_eq!(safe_div(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[]), None);
        assert_eq!(mean(&[100.0, 200.0, 300.0]), Some(200.0));
    }
}
