use primitive_types::U256;

use crate::{Result, VeError};

pub fn add_u128(a: u128, b: u128) -> Result<u128> {
    a.checked_add(b)
        .ok_or_else(|| VeError::BoundedValueExceeded("u128 overflow in add".into()))
}

pub fn sub_u128(a: u128, b: u128) -> Result<u128> {
    a.checked_sub(b)
        .ok_or_else(|| VeError::InvalidInput("u128 underflow in sub".into()))
}

pub fn mul_u128(a: u128, b: u128) -> Result<u128> {
    a.checked_mul(b)
        .ok_or_else(|| VeError::BoundedValueExceeded("u128 overflow in mul".into()))
}

pub fn add_i128(a: i128, b: i128) -> Result<i128> {
    a.checked_add(b)
        .ok_or_else(|| VeError::BoundedValueExceeded("i128 overflow in add".into()))
}

pub fn mul_i128(a: i128, b: i128) -> Result<i128> {
    a.checked_mul(b)
        .ok_or_else(|| VeError::BoundedValueExceeded("i128 overflow in mul".into()))
}

/// Token amount as a signed line coordinate.
pub fn to_i128(v: u128) -> Result<i128> {
    i128::try_from(v).map_err(|_| VeError::BoundedValueExceeded("amount exceeds i128".into()))
}

/// Non-negative line coordinate as a token amount; negative values read as zero.
pub fn clamp_to_u128(v: i128) -> u128 {
    if v <= 0 {
        0
    } else {
        v as u128
    }
}

/// `floor(a * b / denom)` with a 256-bit intermediate product.
pub fn mul_div_floor(a: u128, b: u128, denom: u128) -> Result<u128> {
    if denom == 0 {
        return Err(VeError::InvalidInput("division by zero".into()));
    }
    // u128 * u128 always fits in 256 bits.
    let q = U256::from(a) * U256::from(b) / U256::from(denom);
    if q > U256::from(u128::MAX) {
        return Err(VeError::BoundedValueExceeded("u128 overflow in mul_div".into()));
    }
    Ok(q.as_u128())
}

/// `floor(amount * part / whole)` for `part <= whole`; zero when `whole == 0`.
///
/// Postconditions:
/// - result `<= amount`, so the call cannot fail; `part` above `whole` is clamped.
pub fn pro_rata(amount: u128, part: u128, whole: u128) -> u128 {
    if whole == 0 {
        return 0;
    }
    let part = part.min(whole);
    // part <= whole keeps the quotient <= amount.
    (U256::from(amount) * U256::from(part) / U256::from(whole)).as_u128()
}
