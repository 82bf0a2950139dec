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

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::serde_dec;

/// Number of decimals of fixed point USD amounts, both token prices and costs
pub const USD_DECIMALS: u8 = 18;

/// Result of estimating the L1 data fee of a rollup transaction.
///
/// `native` and `usd` are `None` when estimation failed, in which case `error` holds the
/// first failure message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct L1FeeResult {
    /// L1 fee in wei of the rollup's native token
    #[serde(with = "serde_dec::opt_u256_str", default)]
    pub native: Option<U256>,
    /// L1 fee in fixed point USD
    #[serde(with = "serde_dec::opt_u256_str", default)]
    pub usd: Option<U256>,
    /// Failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl L1FeeResult {
    /// A successful estimate
    pub fn estimated(native: U256, usd: U256) -> Self {
        Self {
            native: Some(native),
            usd: Some(usd),
            error: None,
        }
    }

    /// A failed estimate
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            native: None,
            usd: None,
            error: Some(error.into()),
        }
    }
}

/// Cost split into the chain's own fee and the rollup's L1 submission fee
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostParts {
    /// Execution fee paid to the chain itself
    #[serde(with = "serde_dec::u256_str")]
    pub root: U256,
    /// L1 data fee, present only for rollups with a successful estimate
    #[serde(
        with = "serde_dec::opt_u256_str",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub l1_submission: Option<U256>,
}

impl CostParts {
    /// Sum of all parts
    pub fn total(&self) -> U256 {
        self.root
            .saturating_add(self.l1_submission.unwrap_or_default())
    }
}

/// Cost of one simulated call in native token and in USD
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasCostBreakdown {
    /// Cost in wei of the native token
    pub native: CostParts,
    /// Cost in fixed point USD, see [`USD_DECIMALS`]
    pub usd: CostParts,
    /// L1 estimation error, reported independently of the call itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l1_error: Option<String>,
}
