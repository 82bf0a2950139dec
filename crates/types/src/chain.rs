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

//! Chain specification for Gascope

use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use url::Url;

const API_KEY_PLACEHOLDER: &str = "{api_key}";

/// Chain specification for Gascope
///
/// Created once when configuration is loaded and never mutated afterwards.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChainSpec {
    /*
     * Chain constants
     */
    /// name for logging purposes, e.g. "Ethereum", no logic is performed on this
    pub name: String,
    /// chain id
    pub id: u64,
    /// RPC endpoint used to fork the chain. May contain an `{api_key}` placeholder.
    pub rpc_url_template: String,
    /// Native token of the chain
    pub native_token: NativeToken,
    /// Average time between blocks, used to turn a block window into a wall clock span
    pub avg_block_time_millis: u64,

    /*
     * Fee estimation
     */
    /// true if the chain has a priority fee market, i.e. blocks are expected to carry
    /// non-empty reward history
    pub priority_fee_enabled: bool,
    /// Bounds for the priority fee controls shown to users
    pub gas_controls: GasControls,

    /*
     * Rollup
     */
    /// Rollup stack of the chain, `None` for chains that do not settle elsewhere
    pub rollup_stack: RollupStack,
    /// The chain this chain settles to, set iff the chain is a rollup
    pub underlying: Option<Box<ChainSpec>>,
}

impl Default for ChainSpec {
    fn default() -> Self {
        Self {
            name: "Unknown".to_string(),
            id: 0,
            rpc_url_template: String::new(),
            native_token: NativeToken::default(),
            avg_block_time_millis: 12_000,
            priority_fee_enabled: true,
            gas_controls: GasControls::default(),
            rollup_stack: RollupStack::None,
            underlying: None,
        }
    }
}

impl ChainSpec {
    /// Resolve the RPC endpoint of this chain, substituting the API key if the template
    /// requires one.
    pub fn rpc_url(&self, api_key: Option<&str>) -> anyhow::Result<Url> {
        let raw = if self.rpc_url_template.contains(API_KEY_PLACEHOLDER) {
            let key = api_key.with_context(|| {
                format!("chain {} rpc url requires an api key", self.name)
            })?;
            self.rpc_url_template.replace(API_KEY_PLACEHOLDER, key)
        } else {
            self.rpc_url_template.clone()
        };
        Url::parse(&raw).with_context(|| format!("invalid rpc url for chain {}", self.name))
    }

    /// True if the chain settles to an underlying chain through a rollup stack
    pub fn is_rollup(&self) -> bool {
        self.rollup_stack != RollupStack::None
    }

    /// Average block time as a duration
    pub fn avg_block_time(&self) -> Duration {
        Duration::from_millis(self.avg_block_time_millis)
    }
}

/// Native token of a chain
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct NativeToken {
    /// Token symbol, e.g. "ETH"
    pub symbol: String,
    /// Number of decimals of the smallest unit
    pub decimals: u8,
}

impl Default for NativeToken {
    fn default() -> Self {
        Self {
            symbol: "ETH".to_string(),
            decimals: 18,
        }
    }
}

/// Bounds of the priority fee controls for a chain, in wei
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct GasControls {
    /// Minimum selectable priority fee
    pub min: u64,
    /// Maximum selectable priority fee
    pub max: u64,
    /// Step between selectable values
    pub step: u64,
    /// Number of decimals (in gwei) to display
    pub display_decimals: u8,
}

impl Default for GasControls {
    fn default() -> Self {
        Self {
            min: 0,
            max: 100_000_000_000,
            step: 100_000_000,
            display_decimals: 2,
        }
    }
}

/// Rollup stack a chain is built on
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, strum::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RollupStack {
    /// Not a rollup
    #[default]
    None,
    /// OP stack rollup, L1 data fee computed by the gas price oracle predeploy
    OpStack,
    /// Any other rollup stack. L1 fees are not estimated for these.
    #[serde(other)]
    Unsupported,
}
