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

//! Cost of a simulated call in the native token and in USD.

use alloy_primitives::U256;
use gascope_types::{CallOutcome, CostParts, GasCostBreakdown, L1FeeResult};
use gascope_utils::math::{mul_div, pow10};

/// Convert an amount of the native token's smallest unit to fixed point USD.
///
/// `price` is the USD price of one whole token with [`gascope_types::USD_DECIMALS`] decimals.
pub fn to_usd(native: U256, price: U256, decimals: u8) -> U256 {
    mul_div(native, price, pow10(decimals))
}

/// Combine the gas used by a call, the fee per gas and an optional L1 fee into a cost
/// breakdown in the native token and in USD.
///
/// The L1 part is set only if `l1` carries a native amount, its error is passed through as is.
pub fn aggregate(
    outcome: &CallOutcome,
    fee_per_gas: u128,
    l1: Option<&L1FeeResult>,
    native_token_price: U256,
    decimals: u8,
) -> GasCostBreakdown {
    let root = U256::from(outcome.gas_used).saturating_mul(U256::from(fee_per_gas));
    let l1_native = l1.and_then(|l1| l1.native);
    let l1_usd = l1_native.map(|native| {
        l1.and_then(|l1| l1.usd)
            .unwrap_or_else(|| to_usd(native, native_token_price, decimals))
    });

    GasCostBreakdown {
        native: CostParts {
            root,
            l1_submission: l1_native,
        },
        usd: CostParts {
            root: to_usd(root, native_token_price, decimals),
            l1_submission: l1_usd,
        },
        l1_error: l1.and_then(|l1| l1.error.clone()),
    }
}

#[cfg(test)]
mod tests {
    use gascope_types::{CallError, ReturnData, USD_DECIMALS};

    use super::*;

    const GWEI: u128 = 1_000_000_000;

    fn outcome(gas_used: u64) -> CallOutcome {
        CallOutcome::new(gas_used, ReturnData::default(), vec![], vec![])
    }

    fn usd(dollars: u64) -> U256 {
        U256::from(dollars) * pow10(USD_DECIMALS)
    }

    #[test]
    fn test_root_only() {
        let breakdown = aggregate(&outcome(21_000), 50 * GWEI, None, usd(2000), 18);

        assert_eq!(breakdown.native.root, U256::from(21_000 * 50 * GWEI));
        assert_eq!(breakdown.native.l1_submission, None);
        // 0.00105 ETH at 2000 USD
        assert_eq!(
            breakdown.usd.root,
            U256::from(2_100_000_000_000_000_000u128)
        );
        assert_eq!(breakdown.usd.l1_submission, None);
        assert_eq!(breakdown.l1_error, None);
    }

    #[test]
    fn test_token_decimals() {
        // 6 decimal native token priced at 1 USD
        let breakdown = aggregate(&outcome(1), 1_500_000, None, usd(1), 6);
        assert_eq!(breakdown.usd.root, usd(1) * U256::from(3) / U256::from(2));
    }

    #[test]
    fn test_l1_fee_included() {
        let l1 = L1FeeResult::estimated(U256::from(1_000), U256::from(2_000_000));
        let breakdown = aggregate(&outcome(21_000), GWEI, Some(&l1), usd(2000), 18);

        assert_eq!(breakdown.native.l1_submission, Some(U256::from(1_000)));
        assert_eq!(breakdown.usd.l1_submission, Some(U256::from(2_000_000)));
        assert_eq!(
            breakdown.native.total(),
            U256::from(21_000 * GWEI + 1_000)
        );
    }

    #[test]
    fn test_failed_l1_keeps_root() {
        let reverted = CallOutcome::new(
            30_000,
            ReturnData::default(),
            vec![],
            vec![CallError::revert("execution reverted", None)],
        );
        let l1 = L1FeeResult::failed("failed to get L1 fee: timeout");
        let breakdown = aggregate(&reverted, GWEI, Some(&l1), usd(1), 18);

        assert_eq!(breakdown.native.root, U256::from(30_000 * GWEI));
        assert_eq!(breakdown.native.l1_submission, None);
        assert_eq!(breakdown.usd.l1_submission, None);
        assert_eq!(
            breakdown.l1_error.as_deref(),
            Some("failed to get L1 fee: timeout")
        );
    }
}
