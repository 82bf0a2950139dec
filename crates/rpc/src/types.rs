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

//! Request and response bodies of the HTTP API.
//!
//! Integer amounts are exchanged as decimal strings so that clients never round them through
//! floating point.

use alloy_primitives::{Address, Bytes, U256};
use gascope_provider::{AccountState, FeeHistory};
use gascope_sim::EstimateKind;
use gascope_types::{
    chain::{ChainSpec, GasControls},
    serde_dec, CallError, CallRequest, CallStatus,
};
use serde::{Deserialize, Serialize};
use url::Url;

/// Maximum number of blocks a fee history request may cover
pub(crate) const MAX_FEE_HISTORY_BLOCKS: u64 = 1024;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LocalEstimateRequest {
    pub(crate) fork_url: Url,
    pub(crate) target_contract: Address,
    pub(crate) encoded_data: Bytes,
    #[serde(with = "serde_dec::u256_str", default)]
    pub(crate) value: U256,
    #[serde(rename = "type", default)]
    pub(crate) kind: EstimateKind,
    #[serde(default)]
    pub(crate) from: Option<Address>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LocalEstimateResponse {
    pub(crate) status: CallStatus,
    pub(crate) gas_used: String,
    pub(crate) errors: Vec<CallError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GasFeesRequest {
    pub(crate) chain_id: u64,
    pub(crate) block_count: u64,
    pub(crate) reward_percentiles: Vec<f64>,
}

impl GasFeesRequest {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.block_count == 0 || self.block_count > MAX_FEE_HISTORY_BLOCKS {
            return Err(format!(
                "blockCount must be between 1 and {MAX_FEE_HISTORY_BLOCKS}"
            ));
        }
        if self
            .reward_percentiles
            .iter()
            .any(|p| !(0.0..=100.0).contains(p))
        {
            return Err("rewardPercentiles must be between 0 and 100".to_string());
        }
        if self.reward_percentiles.windows(2).any(|w| w[0] > w[1]) {
            return Err("rewardPercentiles must be monotonically increasing".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GasFeesResponse {
    pub(crate) status: u16,
    pub(crate) data: Option<GasFeesData>,
    pub(crate) error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GasFeesData {
    /// JSON encoded [`FeeHistoryView`]
    pub(crate) fee_history: String,
    pub(crate) has_chain_priority_fee: bool,
    /// Seconds
    pub(crate) avg_block_time: f64,
    pub(crate) gas_controls: GasControlsView,
}

impl GasFeesData {
    pub(crate) fn new(spec: &ChainSpec, history: &FeeHistory) -> serde_json::Result<Self> {
        Ok(Self {
            fee_history: serde_json::to_string(&FeeHistoryView::from(history))?,
            has_chain_priority_fee: spec.priority_fee_enabled,
            avg_block_time: spec.avg_block_time().as_secs_f64(),
            gas_controls: spec.gas_controls.into(),
        })
    }
}

/// Fee history with every integer as a decimal string
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FeeHistoryView {
    oldest_block: String,
    base_fee_per_gas: Vec<String>,
    gas_used_ratio: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reward: Option<Vec<Vec<String>>>,
    base_fee_per_blob_gas: Vec<String>,
    blob_gas_used_ratio: Vec<f64>,
}

fn decimal(values: &[u128]) -> Vec<String> {
    values.iter().map(u128::to_string).collect()
}

impl From<&FeeHistory> for FeeHistoryView {
    fn from(history: &FeeHistory) -> Self {
        Self {
            oldest_block: history.oldest_block.to_string(),
            base_fee_per_gas: decimal(&history.base_fee_per_gas),
            gas_used_ratio: history.gas_used_ratio.clone(),
            reward: history
                .reward
                .as_ref()
                .map(|blocks| blocks.iter().map(|r| decimal(r)).collect()),
            base_fee_per_blob_gas: decimal(&history.base_fee_per_blob_gas),
            blob_gas_used_ratio: history.blob_gas_used_ratio.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GasControlsView {
    #[serde(with = "serde_dec::u128_str")]
    min: u128,
    #[serde(with = "serde_dec::u128_str")]
    max: u128,
    #[serde(with = "serde_dec::u128_str")]
    step: u128,
    display_decimals: u8,
}

impl From<GasControls> for GasControlsView {
    fn from(controls: GasControls) -> Self {
        Self {
            min: controls.min.into(),
            max: controls.max.into(),
            step: controls.step.into(),
            display_decimals: controls.display_decimals,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SimulateRequest {
    pub(crate) chain_id: u64,
    #[serde(flatten)]
    pub(crate) call: CallRequest,
    #[serde(with = "serde_dec::u256_str", default)]
    pub(crate) native_token_price: U256,
    #[serde(with = "serde_dec::opt_u128_str", default)]
    pub(crate) priority_fee: Option<u128>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChainRequest {
    pub(crate) chain_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PriorityFeesRequest {
    pub(crate) chain_id: u64,
    #[serde(with = "serde_dec::u128_str")]
    pub(crate) base_fee: u128,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AccountRequest {
    pub(crate) chain_id: u64,
    pub(crate) address: Address,
}

#[derive(Debug, Serialize)]
pub(crate) struct AccountView {
    #[serde(with = "serde_dec::u256_str")]
    balance: U256,
    nonce: u64,
    code: Bytes,
}

impl From<AccountState> for AccountView {
    fn from(account: AccountState) -> Self {
        Self {
            balance: account.balance,
            nonce: account.nonce,
            code: account.code,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    pub(crate) status: &'static str,
    pub(crate) chains: Vec<u64>,
}
