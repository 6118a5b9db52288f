use crate::fixed_point::{mul_div, to_amount, WAD};
use crate::types::GameError;

/// Multiplier before any safe reveal: 0.2x.
pub const BASE_MULTIPLIER: u128 = WAD / 5;
/// Hard payout cap: 2.0x. No round may ever pay more than this times stake.
pub const CAP_MULTIPLIER: u128 = 2 * WAD;

const _: () = assert!(CAP_MULTIPLIER <= u64::MAX as u128);

/// Current payout multiplier for a round, as a WAD-scaled ratio.
///
/// Linear ramp from [`BASE_MULTIPLIER`] at zero safe reveals to
/// [`CAP_MULTIPLIER`] when every safe cell is open, clamped at the cap.
pub fn multiplier(bomb_count: u8, cell_count: u8, safe_reveals: u8) -> Result<u128, GameError> {
    let max_safe = cell_count
        .checked_sub(bomb_count)
        .filter(|n| *n > 0)
        .ok_or(GameError::DegenerateBoard)?;
    let ramp = mul_div(
        CAP_MULTIPLIER - BASE_MULTIPLIER,
        safe_reveals as u128,
        max_safe as u128,
    )?;
    Ok((BASE_MULTIPLIER + ramp).min(CAP_MULTIPLIER))
}

/// Absolute payout for a stake at a WAD-scaled multiplier.
pub fn payout(stake: u64, multiplier_wad: u128) -> Result<u64, GameError> {
    to_amount(mul_div(stake as u128, multiplier_wad, WAD)?)
}

/// Applies the house fee, in basis points, to a gross payout. The net amount
/// truncates downward; the remainder stays with the pool.
pub fn net_of_fee(gross: u64, fee_bps: u64) -> Result<u64, GameError> {
    let keep_bps = 10_000u64
        .checked_sub(fee_bps)
        .ok_or(GameError::ArithmeticOverflow)?;
    to_amount(mul_div(gross as u128, keep_bps as u128, 10_000)?)
}
