use num_bigint::BigUint;
use num_traits::ToPrimitive;

use crate::types::GameError;

/// Fixed-point scale: one unit = 1e18.
pub const WAD: u128 = 1_000_000_000_000_000_000;

/// Computes `a * b / denom`, truncating toward zero.
///
/// The product is formed in arbitrary precision so it is always exact; the
/// operation fails only when the quotient does not fit `u128` (a zero
/// denominator is reported the same way). All token amounts in this canister
/// are `u64` and multipliers are capped at `2e18`, so every sanctioned result
/// fits well inside `u128` — the checked narrowing in [`to_amount`] enforces
/// the `u64` bound at each point of use.
pub fn mul_div(a: u128, b: u128, denom: u128) -> Result<u128, GameError> {
    if denom == 0 {
        return Err(GameError::ArithmeticOverflow);
    }
    let product = BigUint::from(a) * BigUint::from(b);
    let quotient = product / BigUint::from(denom);
    quotient.to_u128().ok_or(GameError::ArithmeticOverflow)
}

/// Narrows a fixed-point result to a `u64` token amount.
pub fn to_amount(value: u128) -> Result<u64, GameError> {
    u64::try_from(value).map_err(|_| GameError::ArithmeticOverflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mul_div_basic() {
        assert_eq!(mul_div(6, 7, 2).unwrap(), 21);
        assert_eq!(mul_div(100, WAD, WAD).unwrap(), 100);
        assert_eq!(mul_div(0, WAD, WAD).unwrap(), 0);
    }

    #[test]
    fn test_mul_div_truncates_toward_zero() {
        assert_eq!(mul_div(7, 1, 2).unwrap(), 3);
        assert_eq!(mul_div(99, 99, 100).unwrap(), 98);
    }

    #[test]
    fn test_mul_div_widening_intermediate() {
        // The raw product exceeds u128; the quotient does not.
        assert_eq!(mul_div(u128::MAX, u128::MAX, u128::MAX).unwrap(), u128::MAX);
        assert_eq!(mul_div(u128::MAX, 1_000, 2_000).unwrap(), u128::MAX / 2);
    }

    #[test]
    fn test_mul_div_overflowing_quotient() {
        assert_eq!(
            mul_div(u128::MAX, 2, 1),
            Err(GameError::ArithmeticOverflow)
        );
    }

    #[test]
    fn test_mul_div_zero_denominator() {
        assert_eq!(mul_div(1, 1, 0), Err(GameError::ArithmeticOverflow));
    }

    #[test]
    fn test_to_amount_bounds() {
        assert_eq!(to_amount(u64::MAX as u128).unwrap(), u64::MAX);
        assert_eq!(
            to_amount(u64::MAX as u128 + 1),
            Err(GameError::ArithmeticOverflow)
        );
    }
}
