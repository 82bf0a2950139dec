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
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::serde_dec;

/// Fixed point scale of the priority fee to base fee ratios in [`FeeRatioModel`]
pub const FEE_RATIO_PRECISION: u128 = 1_000_000_000_000_000_000;

/// Ratio of priority fee to base fee observed over a window of blocks, at three percentiles.
///
/// Ratios are fixed point values scaled by [`FEE_RATIO_PRECISION`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeRatioModel {
    /// Ratio at the low percentile
    #[serde(with = "serde_dec::u256_str")]
    pub low: U256,
    /// Ratio at the mid percentile
    #[serde(with = "serde_dec::u256_str")]
    pub mid: U256,
    /// Ratio at the high percentile
    #[serde(with = "serde_dec::u256_str")]
    pub high: U256,
    /// Wall clock span of the analyzed blocks, in milliseconds
    pub period_millis: u64,
}

impl FeeRatioModel {
    /// True if no priority fee was observed at any percentile
    pub fn is_zero(&self) -> bool {
        self.low.is_zero() && self.mid.is_zero() && self.high.is_zero()
    }
}

/// Projected priority fees per gas, in wei
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityFees {
    /// Low priority fee
    #[serde(with = "serde_dec::u128_str")]
    pub low: u128,
    /// Mid priority fee
    #[serde(with = "serde_dec::u128_str")]
    pub mid: u128,
    /// High priority fee
    #[serde(with = "serde_dec::u128_str")]
    pub high: u128,
}

/// Fee inputs of the chain a rollup settles to
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnderlyingFees {
    /// Base fee of the next underlying block
    #[serde(with = "serde_dec::u128_str")]
    pub next_base_fee: u128,
    /// Current blob base fee, zero if the underlying chain does not support blobs
    #[serde(with = "serde_dec::u128_str")]
    pub blob_base_fee: u128,
}

/// Snapshot of the fee inputs of one chain at one moment.
///
/// Replaced wholesale on refresh, never merged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasFeesConfig {
    /// Chain the snapshot belongs to
    pub chain_id: u64,
    /// Base fee of the next block
    #[serde(with = "serde_dec::u128_str")]
    pub next_base_fee: u128,
    /// Priority fee ratio model
    pub ratios: FeeRatioModel,
    /// Currently selected priority fee per gas
    #[serde(with = "serde_dec::u128_str")]
    pub priority_fee_per_gas: u128,
    /// Underlying chain fees, set iff the chain settles to another chain
    pub underlying: Option<UnderlyingFees>,
    /// True if the chain is expected to have a priority fee market but the
    /// provider returned no reward history for the window
    pub missing_priority_fee_history: bool,
    /// When the snapshot was taken
    pub fetched_at: DateTime<Utc>,
}

impl GasFeesConfig {
    /// Total fee per gas paid to the chain: next base fee plus the selected priority fee
    pub fn fee_per_gas(&self) -> u128 {
        self.next_base_fee.saturating_add(self.priority_fee_per_gas)
    }

    /// Returns a copy of this snapshot with a different selected priority fee
    pub fn with_priority_fee(&self, priority_fee_per_gas: u128) -> Self {
        Self {
            priority_fee_per_gas,
            ..self.clone()
        }
    }
}
