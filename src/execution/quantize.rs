use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

/// Decimal places kept after snapping to a step
const PRECISION_DP: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundingMode {
    Floor,
    Ceil,
    Round,
}

/// Snap `value` to a multiple of `step`.
///
/// Never fails: a non-finite value yields `0.0`, a non-positive (or
/// unrepresentable) step returns the value unchanged. Callers must check the
/// result is finite and positive before using it as a price or quantity.
pub fn quantize(value: f64, step: f64, mode: RoundingMode) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    if !(step.is_finite() && step > 0.0) {
        return value;
    }

    let (Some(v), Some(s)) = (Decimal::from_f64(value), Decimal::from_f64(step)) else {
        return value;
    };
    if s.is_zero() {
        return value;
    }

    let Some(units) = v.checked_div(s) else {
        return value;
    };
    // Snap away binary drift (119.9999999999 steps is 120 steps)
    let units = units.round_dp(PRECISION_DP);
    let units = match mode {
        RoundingMode::Floor => units.floor(),
        RoundingMode::Ceil => units.ceil(),
        RoundingMode::Round => {
            units.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        }
    };

    units
        .checked_mul(s)
        .map(|q| q.round_dp(PRECISION_DP))
        .and_then(|q| q.to_f64())
        .unwrap_or(value)
}

/// Round a quantity down to the lot step
pub fn normalize_quantity(amount: f64, step_size: f64) -> f64 {
    quantize(amount, step_size, RoundingMode::Floor)
}

/// Round a price to the nearest tick
pub fn normalize_price(price: f64, tick_size: f64) -> f64 {
    quantize(price, tick_size, RoundingMode::Round)
}

/// True when `value` is a whole number of `step`s (within 1e-8)
pub fn is_step_aligned(value: f64, step: f64) -> bool {
    let units = value / step;
    ((units - units.round()) * step).abs() <= 1e-8
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_floor_quantity() {
        assert_eq!(normalize_quantity(10.999, 1.0), 10.0);
        assert_eq!(normalize_quantity(0.12, 0.001), 0.12);
        assert_eq!(normalize_quantity(0.1239, 0.001), 0.123);
    }

    #[test]
    fn test_round_price() {
        assert_eq!(normalize_price(100.16, 0.1), 100.2);
        assert_eq!(normalize_price(100.14, 0.1), 100.1);
        assert_eq!(normalize_price(50000.26, 0.5), 50000.5);
    }

    #[test]
    fn test_ceil() {
        assert_eq!(quantize(0.1201, 0.001, RoundingMode::Ceil), 0.121);
        assert_eq!(quantize(0.12, 0.001, RoundingMode::Ceil), 0.12);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(quantize(f64::NAN, 0.1, RoundingMode::Round), 0.0);
        assert_eq!(quantize(f64::INFINITY, 0.1, RoundingMode::Floor), 0.0);
        assert_eq!(quantize(1.2345, 0.0, RoundingMode::Floor), 1.2345);
        assert_eq!(quantize(1.2345, -1.0, RoundingMode::Ceil), 1.2345);
    }

    #[test]
    fn test_aligned_and_idempotent() {
        let mut rng = StdRng::seed_from_u64(1234);
        let steps = [0.001, 0.01, 0.1, 0.5, 1.0, 0.0001, 5.0];
        let modes = [RoundingMode::Floor, RoundingMode::Ceil, RoundingMode::Round];

        for _ in 0..2000 {
            let value: f64 = rng.gen_range(0.0..100_000.0);
            let step = steps[rng.gen_range(0..steps.len())];
            let mode = modes[rng.gen_range(0..modes.len())];

            let once = quantize(value, step, mode);
            assert!(is_step_aligned(once, step), "{} not aligned to {}", once, step);
            assert_eq!(quantize(once, step, mode), once);
        }
    }
}
