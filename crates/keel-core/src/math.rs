use serde::{Deserialize, Serialize};

use crate::{KeelError, Result};

// `construct_uint!` expands impls that name the two-parameter `Result`, so
// the macro gets its own module, out of reach of the crate alias.
mod u256 {
    uint::construct_uint! {
        /// 256-bit integer used for precise intermediate math.
        pub struct U256(4);
    }
}

pub use u256::U256;

fn mul_u256(a: U256, b: U256) -> Result<U256> {
    let (res, overflow) = a.overflowing_mul(b);
    if overflow {
        Err(KeelError::Math("u256 overflow in mul".into()))
    } else {
        Ok(res)
    }
}

fn narrow_u256(value: U256) -> Result<u128> {
    let buf = value.to_big_endian();
    let (hi, lo) = buf.split_at(16);
    if hi.iter().any(|&b| b != 0) {
        Err(KeelError::Math("u128 overflow in narrow".into()))
    } else {
        let lo: [u8; 16] = lo
            .try_into()
            .map_err(|_| KeelError::Internal("narrow slice size".into()))?;
        Ok(u128::from_be_bytes(lo))
    }
}

/// `floor(a * b / denom)` with a 256-bit intermediate.
///
/// Preconditions:
/// - `denom > 0` (else returns an error; fail-closed).
pub fn mul_div_floor(a: u128, b: u128, denom: u128) -> Result<u128> {
    if denom == 0 {
        return Err(KeelError::InvalidInput("division by zero".into()));
    }
    let num = mul_u256(U256::from(a), U256::from(b))?;
    narrow_u256(num / U256::from(denom))
}

/// `floor(a * m1 * m2 / (d1 * d2))` with 256-bit intermediates.
///
/// For positive integers `floor(floor(x/d1)/d2) == floor(x/(d1*d2))`, so a
/// single division is exact for the divide-twice forms used by the curve's
/// inverse quote.
pub fn mul2_div2_floor(a: u128, m1: u128, m2: u128, d1: u128, d2: u128) -> Result<u128> {
    if d1 == 0 || d2 == 0 {
        return Err(KeelError::InvalidInput("division by zero".into()));
    }
    let num = mul_u256(mul_u256(U256::from(a), U256::from(m1))?, U256::from(m2))?;
    let den = mul_u256(U256::from(d1), U256::from(d2))?;
    narrow_u256(num / den)
}

pub fn add_amount(a: u128, b: u128) -> Result<u128> {
    a.checked_add(b)
        .ok_or_else(|| KeelError::Math("u128 overflow in add".into()))
}

pub fn sub_amount(a: u128, b: u128) -> Result<u128> {
    a.checked_sub(b)
        .ok_or_else(|| KeelError::Math("u128 underflow in sub".into()))
}

/// Integer square root (Babylonian method), used for first liquidity minting.
pub fn isqrt_u256(x: U256) -> U256 {
    if x.is_zero() {
        return U256::zero();
    }
    let mut z = x;
    let mut y = (x >> 1) + U256::one();
    while y < z {
        z = y;
        y = (x / y + y) >> 1;
    }
    z
}

/// Scaled-integer ratio (numerator / denominator).
///
/// Used for oracle prices and fees. Application always floors; callers that
/// need a specific multiply/divide order (the curve quotes) compose the
/// helpers above instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ratio {
    pub numerator: u128,
    pub denominator: u128,
}

impl Ratio {
    /// Constructs a ratio.
    ///
    /// Preconditions:
    /// - `denominator > 0` (fail-closed).
    pub fn new(numerator: u128, denominator: u128) -> Result<Ratio> {
        if denominator == 0 {
            return Err(KeelError::InvalidInput(
                "ratio denominator must be > 0".into(),
            ));
        }
        Ok(Ratio {
            numerator,
            denominator,
        })
    }

    /// `floor(amount * numerator / denominator)`.
    pub fn mul_floor(self, amount: u128) -> Result<u128> {
        mul_div_floor(amount, self.numerator, self.denominator)
    }

    /// `floor(amount * denominator / numerator)`.
    ///
    /// Preconditions:
    /// - `numerator > 0`.
    pub fn div_floor(self, amount: u128) -> Result<u128> {
        mul_div_floor(amount, self.denominator, self.numerator)
    }

    /// Validates the ratio as a fee: strictly below 100%.
    pub fn validate_fee(self) -> Result<()> {
        if self.numerator >= self.denominator {
            return Err(KeelError::Config(format!(
                "fee must be < 100%: {}/{}",
                self.numerator, self.denominator
            )));
        }
        Ok(())
    }
}
