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

//! Priority fee ratio model derived from fee history, and projections from it.

use std::time::Duration;

use alloy_primitives::U256;
use chrono::Utc;
use gascope_provider::{BlockNumberOrTag, EvmProvider};
use gascope_types::{
    FeeRatioModel, GasFeesConfig, PriorityFees, UnderlyingFees, FEE_RATIO_PRECISION,
};
use gascope_utils::{
    log::LogOnError,
    math::{mean, mul_div, saturating_u128},
};
use tracing::{instrument, warn, Level};

use crate::{Chain, FeeError};

/// Percentile used to read the underlying chain's next base fee
const UNDERLYING_PERCENTILE: f64 = 50.0;

/// Settings for the fee history analysis
#[derive(Clone, Debug)]
pub struct FeeHistorySettings {
    /// Number of most recent blocks to analyze
    pub blocks: u64,
    /// Low, mid and high reward percentiles
    pub percentiles: [f64; 3],
}

impl Default for FeeHistorySettings {
    fn default() -> Self {
        Self {
            blocks: 1024,
            percentiles: [30.0, 60.0, 90.0],
        }
    }
}

/// Reduces a chain's fee history into a [`GasFeesConfig`]
#[derive(Clone, Debug, Default)]
pub struct FeeHistoryAnalyzer {
    settings: FeeHistorySettings,
}

impl FeeHistoryAnalyzer {
    /// Create a new analyzer
    pub fn new(settings: FeeHistorySettings) -> Self {
        Self { settings }
    }

    /// Settings in use
    pub fn settings(&self) -> &FeeHistorySettings {
        &self.settings
    }

    /// Fetch the fee history of `chain` and, for rollups, the fees of the underlying chain.
    ///
    /// The two fetches run concurrently. A chain without reward history yields zero ratios;
    /// if the chain is expected to have a priority fee market this is flagged in
    /// [`GasFeesConfig::missing_priority_fee_history`].
    #[instrument(skip_all, fields(chain_id = chain.spec.id))]
    pub async fn analyze(&self, chain: &Chain) -> Result<GasFeesConfig, FeeError> {
        let root = async {
            let history = chain
                .provider
                .fee_history(
                    self.settings.blocks,
                    BlockNumberOrTag::Latest,
                    &self.settings.percentiles,
                )
                .await?;
            let next_base_fee = history.base_fee_per_gas.last().copied().ok_or_else(|| {
                FeeError::FeeHistoryUnavailable("no base fees returned".to_string())
            })?;
            let period = chain.spec.avg_block_time() * self.settings.blocks as u32;
            let ratios = ratio_model(
                &history.base_fee_per_gas,
                history.reward.as_deref().unwrap_or_default(),
                period,
            );
            Ok::<_, FeeError>((next_base_fee, ratios))
        };
        let underlying = async {
            match &chain.underlying {
                Some(provider) => underlying_fees(provider.as_ref()).await.map(Some),
                None => Ok(None),
            }
        };
        let ((next_base_fee, ratios), underlying) = tokio::try_join!(root, underlying)?;

        let missing_priority_fee_history = chain.spec.priority_fee_enabled && ratios.is_zero();
        if missing_priority_fee_history {
            warn!(
                "chain {} expects a priority fee market but returned no reward history, using zero priority fee",
                chain.spec.name
            );
        }
        let priority_fee_per_gas = if chain.spec.priority_fee_enabled {
            estimate_priority_fees(next_base_fee, &ratios).mid
        } else {
            0
        };

        Ok(GasFeesConfig {
            chain_id: chain.spec.id,
            next_base_fee,
            ratios,
            priority_fee_per_gas,
            underlying,
            missing_priority_fee_history,
            fetched_at: Utc::now(),
        })
    }
}

async fn underlying_fees(provider: &dyn EvmProvider) -> Result<UnderlyingFees, FeeError> {
    let (history, blob_base_fee) = tokio::join!(
        provider.fee_history(1, BlockNumberOrTag::Latest, &[UNDERLYING_PERCENTILE]),
        provider.get_blob_base_fee(),
    );
    let next_base_fee = history?.base_fee_per_gas.last().copied().ok_or_else(|| {
        FeeError::FeeHistoryUnavailable("no underlying base fees returned".to_string())
    })?;
    let blob_base_fee = blob_base_fee
        .log_on_error_level(Level::WARN, "blob base fee unsupported, using zero")
        .unwrap_or_default();

    Ok(UnderlyingFees {
        next_base_fee,
        blob_base_fee,
    })
}

/// Mean priority fee to base fee ratio per percentile.
///
/// `base_fees` holds one entry per block plus a trailing entry for the next block, which is
/// not analyzed. Blocks with a zero base fee are skipped.
pub fn ratio_model(base_fees: &[u128], rewards: &[Vec<u128>], period: Duration) -> FeeRatioModel {
    let precision = U256::from(FEE_RATIO_PRECISION);
    let analyzed = &base_fees[..base_fees.len().saturating_sub(1)];

    let mut ratios: [Vec<U256>; 3] = Default::default();
    for (base_fee, reward) in analyzed.iter().zip(rewards) {
        if *base_fee == 0 {
            continue;
        }
        for (bucket, reward) in ratios.iter_mut().zip(reward) {
            bucket.push(mul_div(
                U256::from(*reward),
                precision,
                U256::from(*base_fee),
            ));
        }
    }

    let [low, mid, high] = ratios.map(|r| mean(&r));
    FeeRatioModel {
        low,
        mid,
        high,
        period_millis: period.as_millis() as u64,
    }
}

/// Project low, mid and high priority fees for `base_fee` from a ratio model.
///
/// Pure and deterministic. A zero base fee always projects to zero fees.
pub fn estimate_priority_fees(base_fee: u128, model: &FeeRatioModel) -> PriorityFees {
    let base_fee = U256::from(base_fee);
    let precision = U256::from(FEE_RATIO_PRECISION);
    let project = |ratio: U256| saturating_u128(mul_div(ratio, base_fee, precision));

    PriorityFees {
        low: project(model.low),
        mid: project(model.mid),
        high: project(model.high),
    }
}
