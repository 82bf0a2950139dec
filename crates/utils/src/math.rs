// This file is part of Gascope.
//
// Gascope is free software: you can redistribute it and/or modify it under the
// terms of the GNU Lesser General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version.
//
// Gascope is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with Gascope.
// If not, see https://www.gnu.org/licenses/.

//! Fixed point integer helpers.
//!
//! Monetary values are never converted to floating point: fees, ratios and USD amounts are
//! carried as integers scaled by a power of ten.

use alloy_primitives::U256;

/// `10^exp` as a `U256`
pub fn pow10(exp: u8) -> U256 {
    U256::from(10).pow(U256::from(exp))
}

/// `a * b / denominator` rounded down, saturating on overflow and returning zero when the
/// denominator is zero
pub fn mul_div(a: U256, b: U256, denominator: U256) -> U256 {
    if denominator.is_zero() {
        return U256::ZERO;
    }
    a.saturating_mul(b) / denominator
}

/// Integer mean of the values, zero for an empty input
pub fn mean(values: &[U256]) -> U256 {
    if values.is_empty() {
        return U256::ZERO;
    }
    let sum = values
        .iter()
        .fold(U256::ZERO, |acc, v| acc.saturating_add(*v));
    sum / U256::from(values.len())
}

/// Convert to `u128`, saturating at `u128::MAX`
pub fn saturating_u128(value: U256) -> u128 {
    value.try_into().unwrap_or(u128::MAX)
}
