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

//! The simulation pipeline: fork, execute, L1 fee and cost.

use std::{sync::Arc, time::Duration};

use alloy_primitives::{Address, Bytes, U256};
use gascope_provider::{AccountState, BlockNumberOrTag, FeeHistory, ForkFactory, StateStore};
use gascope_types::{
    CallInput, CallOutcome, CallRequest, GasCostBreakdown, GasFeesConfig, L1FeeResult,
    PriorityFees,
};
use gascope_utils::{log::LogOnError, timeout::with_timeout};
use metrics::Histogram;
use metrics_derive::Metrics;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{instrument, Level};
use url::Url;

use crate::{
    cost::aggregate,
    fees::estimate_priority_fees,
    l1_fee::{unsigned_tx_bytes, L1FeeCalculator, L1FeeSettings},
    CallSimulator, Chain, Chains, FeeCache, FeeError, FeeHistoryAnalyzer, ForkError, ForkInfo,
    ForkManager, ForkSettings, SimulationError,
};

/// Settings for the simulation engine
#[derive(Clone, Debug)]
pub struct EngineSettings {
    /// Cached fee snapshots older than this are refreshed on demand
    pub fee_max_age: Duration,
    /// Timeout for creating ad hoc forks
    pub local_fork_timeout: Duration,
    /// Fork manager settings
    pub fork: ForkSettings,
    /// L1 fee settings
    pub l1_fee: L1FeeSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            fee_max_age: Duration::from_secs(12),
            local_fork_timeout: Duration::from_secs(60),
            fork: ForkSettings::default(),
            l1_fee: L1FeeSettings::default(),
        }
    }
}

/// A call to simulate on a configured chain
#[derive(Clone, Debug)]
pub struct SimulateParams {
    /// Chain to simulate on
    pub chain_id: u64,
    /// The call
    pub call: CallRequest,
    /// USD price of one whole native token, fixed point
    pub native_token_price: U256,
    /// Priority fee overriding the one of the fee snapshot
    pub priority_fee: Option<u128>,
}

/// Result of a simulation
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    /// Normalized outcome of the call
    pub outcome: CallOutcome,
    /// Cost of the call
    pub cost: GasCostBreakdown,
    /// Fees the cost was computed with
    pub fees: GasFeesConfig,
}

/// Whether an ad hoc estimate keeps its state changes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimateKind {
    /// Read only call
    #[default]
    Call,
    /// Mined transaction
    Transaction,
}

/// A call to estimate against an ad hoc fork of any endpoint
#[derive(Clone, Debug)]
pub struct LocalEstimateParams {
    /// Endpoint to fork
    pub fork_url: Url,
    /// Caller, the zero address if unset
    pub from: Option<Address>,
    /// Target contract
    pub to: Address,
    /// Encoded calldata
    pub data: Bytes,
    /// Native value
    pub value: U256,
    /// Call or transaction
    pub kind: EstimateKind,
}

#[derive(Metrics)]
#[metrics(scope = "simulation_engine")]
struct EngineMetrics {
    #[metric(describe = "the duration in milliseconds of a simulation.")]
    simulate_ms: Histogram,
    #[metric(describe = "the duration in milliseconds of an ad hoc estimate.")]
    local_estimate_ms: Histogram,
}

/// Runs simulations on the configured chains
pub struct SimulationEngine {
    chains: Arc<Chains>,
    factory: Arc<dyn ForkFactory>,
    forks: ForkManager,
    simulator: CallSimulator,
    l1_fees: L1FeeCalculator,
    analyzer: FeeHistoryAnalyzer,
    fee_cache: Arc<FeeCache>,
    settings: EngineSettings,
    metrics: EngineMetrics,
}

impl SimulationEngine {
    /// Create a new engine
    pub fn new(
        chains: Arc<Chains>,
        factory: Arc<dyn ForkFactory>,
        store: Arc<dyn StateStore>,
        analyzer: FeeHistoryAnalyzer,
        fee_cache: Arc<FeeCache>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            forks: ForkManager::new(factory.clone(), store, settings.fork.clone()),
            l1_fees: L1FeeCalculator::new(factory.clone(), settings.l1_fee.clone()),
            simulator: CallSimulator::default(),
            chains,
            factory,
            analyzer,
            fee_cache,
            settings,
            metrics: EngineMetrics::default(),
        }
    }

    /// Configured chains
    pub fn chains(&self) -> &Chains {
        &self.chains
    }

    /// Look up a configured chain
    pub fn chain(&self, chain_id: u64) -> Result<&Chain, SimulationError> {
        self.chains
            .get(chain_id)
            .ok_or_else(|| SimulationError::InvalidRequest(format!("unknown chain {chain_id}")))
    }

    /// Simulate a call on the fork of a configured chain and compute its cost.
    ///
    /// The call is applied to the fork and the fork state persisted only if it succeeds.
    /// Reverts and execution failures are reported in the outcome; for rollups the L1 fee
    /// is estimated from the encoded call whatever the outcome.
    #[instrument(skip_all, fields(chain_id = params.chain_id))]
    pub async fn simulate(
        &self,
        params: SimulateParams,
    ) -> Result<SimulationResult, SimulationError> {
        let start = Instant::now();
        let chain = self.chain(params.chain_id)?;
        let mut fees = self.fee_config(params.chain_id).await?;
        if let Some(priority_fee) = params.priority_fee {
            fees = fees.with_priority_fee(priority_fee);
        }

        let simulated = {
            let mut fork = self.forks.acquire(chain).await?;
            let simulated = self
                .simulator
                .simulate(&mut *fork, &params.call, true)
                .await;
            if simulated.outcome.is_success() {
                let _ = self
                    .forks
                    .persist(&fork)
                    .await
                    .log_on_error_level(Level::WARN, "failed to persist fork state");
            }
            simulated
        };

        let l1 = if chain.spec.is_rollup() {
            Some(match simulated.data {
                Some(data) => {
                    let tx = unsigned_tx_bytes(
                        chain.spec.id,
                        params.call.to,
                        params.call.value,
                        data,
                    );
                    self.l1_fees
                        .estimate(
                            chain,
                            tx,
                            fees.underlying,
                            params.native_token_price,
                        )
                        .await
                }
                None => L1FeeResult::failed("call could not be encoded"),
            })
        } else {
            None
        };

        let cost = aggregate(
            &simulated.outcome,
            fees.fee_per_gas(),
            l1.as_ref(),
            params.native_token_price,
            chain.spec.native_token.decimals,
        );
        self.metrics
            .simulate_ms
            .record(start.elapsed().as_millis() as f64);

        Ok(SimulationResult {
            outcome: simulated.outcome,
            cost,
            fees,
        })
    }

    /// Run a call against an ad hoc fork of `fork_url`, discarded afterwards
    #[instrument(skip_all, fields(to = ?params.to, kind = ?params.kind))]
    pub async fn local_chain_estimate(
        &self,
        params: LocalEstimateParams,
    ) -> Result<CallOutcome, SimulationError> {
        let start = Instant::now();
        let mut fork = with_timeout(
            "ad hoc fork creation",
            self.settings.local_fork_timeout,
            // chain id 0, the endpoint is not a configured chain
            self.factory.create(0, params.fork_url),
        )
        .await
        .map_err(|e| ForkError::unavailable(0, format!("{e:#}")))?;

        let request = CallRequest {
            from: params.from.unwrap_or_default(),
            to: params.to,
            input: CallInput::Raw { data: params.data },
            value: params.value,
            skip_balance: true,
        };
        let simulated = self
            .simulator
            .simulate(
                fork.as_mut(),
                &request,
                params.kind == EstimateKind::Transaction,
            )
            .await;
        self.metrics
            .local_estimate_ms
            .record(start.elapsed().as_millis() as f64);

        Ok(simulated.outcome)
    }

    /// Latest fee snapshot of a chain, refreshed if stale
    pub async fn fee_config(&self, chain_id: u64) -> Result<GasFeesConfig, SimulationError> {
        let chain = self.chain(chain_id)?;
        Ok(self
            .fee_cache
            .get_or_refresh(chain_id, self.settings.fee_max_age, || {
                self.analyzer.analyze(chain)
            })
            .await?)
    }

    /// Project priority fees for a hypothetical base fee from the chain's latest ratio model
    pub async fn priority_fees(
        &self,
        chain_id: u64,
        base_fee: u128,
    ) -> Result<PriorityFees, SimulationError> {
        let config = self.fee_config(chain_id).await?;
        Ok(estimate_priority_fees(base_fee, &config.ratios))
    }

    /// Raw fee history of a chain
    pub async fn fee_history(
        &self,
        chain_id: u64,
        block_count: u64,
        reward_percentiles: &[f64],
    ) -> Result<FeeHistory, SimulationError> {
        let chain = self.chain(chain_id)?;
        Ok(chain
            .provider
            .fee_history(block_count, BlockNumberOrTag::Latest, reward_percentiles)
            .await
            .map_err(FeeError::from)?)
    }

    /// Discard the accumulated state of a chain's fork and re-fork at the chain head
    pub async fn reset(&self, chain_id: u64) -> Result<ForkInfo, SimulationError> {
        Ok(self.forks.reset(self.chain(chain_id)?).await?)
    }

    /// Read an account from a chain's fork
    pub async fn read_account(
        &self,
        chain_id: u64,
        address: Address,
    ) -> Result<AccountState, SimulationError> {
        Ok(self
            .forks
            .read_account(self.chain(chain_id)?, address)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use alloy_json_abi::JsonAbi;
    use alloy_primitives::{address, bytes};
    use alloy_sol_types::{SolCall, SolValue};
    use chrono::Utc;
    use gascope_provider::{
        op::{GasPriceOracle, GAS_PRICE_ORACLE_ADDRESS},
        FakeFork, FakeForkFactory, MemoryStateStore, MockEvmProvider, FAKE_BASE_GAS,
    };
    use gascope_types::{
        chain::{ChainSpec, RollupStack},
        CallStatus, FeeRatioModel, UnderlyingFees, USD_DECIMALS,
    };
    use gascope_utils::math::pow10;

    use super::*;

    const GWEI: u128 = 1_000_000_000;
    const ALICE: Address = address!("00000000000000000000000000000000000a11ce");
    const TOKEN: Address = address!("0000000000000000000000000000000000000707");
    const L1_FEE: u64 = 5_000;

    fn spec(id: u64, stack: RollupStack) -> ChainSpec {
        ChainSpec {
            id,
            priority_fee_enabled: false,
            rollup_stack: stack,
            underlying: (stack != RollupStack::None).then(|| {
                Box::new(ChainSpec {
                    id: 1,
                    ..Default::default()
                })
            }),
            ..Default::default()
        }
    }

    fn chain(spec: ChainSpec) -> Chain {
        Chain {
            spec,
            rpc_url: "http://localhost:8545".parse().unwrap(),
            provider: Arc::new(MockEvmProvider::new()),
            underlying: None,
        }
    }

    fn snapshot(chain_id: u64, next_base_fee: u128) -> GasFeesConfig {
        GasFeesConfig {
            chain_id,
            next_base_fee,
            ratios: FeeRatioModel::default(),
            priority_fee_per_gas: 0,
            underlying: Some(UnderlyingFees {
                next_base_fee: 10 * GWEI,
                blob_base_fee: 1,
            }),
            missing_priority_fee_history: false,
            fetched_at: Utc::now(),
        }
    }

    fn engine(factory: Arc<FakeForkFactory>, chains: Vec<Chain>) -> SimulationEngine {
        let cache = Arc::new(FeeCache::default());
        for chain in &chains {
            cache.insert(snapshot(chain.spec.id, 50 * GWEI));
        }
        SimulationEngine::new(
            Arc::new(Chains::new(chains)),
            factory,
            Arc::new(MemoryStateStore::default()),
            FeeHistoryAnalyzer::default(),
            cache,
            EngineSettings {
                fee_max_age: Duration::from_secs(3600),
                l1_fee: L1FeeSettings {
                    gas_price_oracle_code: Some(bytes!("60")),
                    l1_block_code: Some(bytes!("60")),
                    ..Default::default()
                },
                ..Default::default()
            },
        )
    }

    fn usd(dollars: u64) -> U256 {
        U256::from(dollars) * pow10(USD_DECIMALS)
    }

    fn mint_request(amount: &str) -> CallRequest {
        let abi: JsonAbi = serde_json::from_str(
            r#"[{"type":"function","name":"mint","stateMutability":"payable",
                 "inputs":[{"name":"amount","type":"uint256"}],"outputs":[]}]"#,
        )
        .unwrap();
        CallRequest {
            from: ALICE,
            to: TOKEN,
            input: CallInput::Function {
                abi,
                function: "mint".to_string(),
                args: vec![amount.to_string()],
            },
            value: U256::from(3),
            skip_balance: true,
        }
    }

    fn params(chain_id: u64, call: CallRequest) -> SimulateParams {
        SimulateParams {
            chain_id,
            call,
            native_token_price: usd(2000),
            priority_fee: None,
        }
    }

    #[tokio::test]
    async fn test_simulate_commits_and_costs() {
        let factory = Arc::new(FakeForkFactory::new(100));
        let engine = engine(factory, vec![chain(spec(1, RollupStack::None))]);

        let result = engine.simulate(params(1, mint_request("5"))).await.unwrap();

        assert_eq!(result.outcome.status, CallStatus::Success);
        assert_eq!(
            result.cost.native.root,
            U256::from(result.outcome.gas_used) * U256::from(50 * GWEI)
        );
        assert_eq!(result.cost.native.l1_submission, None);
        assert_eq!(
            engine.read_account(1, TOKEN).await.unwrap().balance,
            U256::from(3)
        );
    }

    #[tokio::test]
    async fn test_priority_fee_override() {
        let factory = Arc::new(FakeForkFactory::new(100));
        let engine = engine(factory, vec![chain(spec(1, RollupStack::None))]);

        let result = engine
            .simulate(SimulateParams {
                priority_fee: Some(GWEI),
                ..params(1, mint_request("5"))
            })
            .await
            .unwrap();

        assert_eq!(result.fees.fee_per_gas(), 51 * GWEI);
    }

    #[tokio::test]
    async fn test_unknown_function_fails_with_zero_cost() {
        let factory = Arc::new(FakeForkFactory::new(100));
        let engine = engine(factory, vec![chain(spec(10, RollupStack::OpStack))]);
        let mut request = mint_request("5");
        if let CallInput::Function { function, .. } = &mut request.input {
            *function = "burn".to_string();
        }

        let result = engine.simulate(params(10, request)).await.unwrap();

        assert_eq!(result.outcome.status, CallStatus::Failure);
        assert_eq!(result.outcome.gas_used, 0);
        assert_eq!(result.outcome.errors.len(), 1);
        assert_eq!(result.cost.native.root, U256::ZERO);
        assert!(result.cost.l1_error.is_some());
    }

    #[tokio::test]
    async fn test_revert_on_rollup_still_estimates_l1() {
        let request = mint_request("5");
        let selector = crate::CallMode::resolve(&request.input).unwrap().data()[..4]
            .try_into()
            .unwrap();
        let template = FakeFork::new(10, 100)
            .with_revert(selector, "paused")
            .with_static_response(
                GAS_PRICE_ORACLE_ADDRESS,
                GasPriceOracle::baseFeeScalarCall::SELECTOR,
                1u32.abi_encode().into(),
            )
            .with_static_response(
                GAS_PRICE_ORACLE_ADDRESS,
                GasPriceOracle::blobBaseFeeScalarCall::SELECTOR,
                1u32.abi_encode().into(),
            )
            .with_static_response(
                GAS_PRICE_ORACLE_ADDRESS,
                GasPriceOracle::isEcotoneCall::SELECTOR,
                true.abi_encode().into(),
            )
            .with_static_response(
                GAS_PRICE_ORACLE_ADDRESS,
                GasPriceOracle::getL1FeeCall::SELECTOR,
                U256::from(L1_FEE).abi_encode().into(),
            );
        let factory = Arc::new(FakeForkFactory::with_template(template, 100));
        let engine = engine(factory, vec![chain(spec(10, RollupStack::OpStack))]);

        let result = engine.simulate(params(10, request)).await.unwrap();

        assert_eq!(result.outcome.status, CallStatus::Revert);
        assert!(result.cost.native.root > U256::ZERO);
        assert_eq!(result.cost.native.l1_submission, Some(U256::from(L1_FEE)));
        assert_eq!(
            result.cost.usd.l1_submission,
            Some(U256::from(L1_FEE) * U256::from(2000))
        );
        assert_eq!(result.cost.l1_error, None);
        // reverted calls leave the fork untouched
        assert_eq!(
            engine.read_account(10, TOKEN).await.unwrap().balance,
            U256::ZERO
        );
    }

    #[tokio::test]
    async fn test_unsupported_rollup_has_zero_l1_part() {
        let factory = Arc::new(FakeForkFactory::new(100));
        let engine = engine(factory, vec![chain(spec(42, RollupStack::Unsupported))]);

        let result = engine.simulate(params(42, mint_request("5"))).await.unwrap();

        assert_eq!(result.cost.native.l1_submission, Some(U256::ZERO));
        assert_eq!(result.cost.l1_error, None);
    }

    #[tokio::test]
    async fn test_concurrent_simulations_match_sequential() {
        let delayed = || FakeFork::new(1, 100).with_execute_delay(Duration::from_millis(20));
        let sequential = engine(
            Arc::new(FakeForkFactory::with_template(delayed(), 100)),
            vec![chain(spec(1, RollupStack::None))],
        );
        let concurrent = engine(
            Arc::new(FakeForkFactory::with_template(delayed(), 100)),
            vec![chain(spec(1, RollupStack::None))],
        );

        let first = sequential.simulate(params(1, mint_request("1"))).await.unwrap();
        let second = sequential.simulate(params(1, mint_request("2"))).await.unwrap();

        let (a, b) = tokio::join!(
            concurrent.simulate(params(1, mint_request("1"))),
            concurrent.simulate(params(1, mint_request("2"))),
        );

        assert_eq!(a.unwrap().outcome, first.outcome);
        assert_eq!(b.unwrap().outcome, second.outcome);
        // the second call observes the first one's nonce
        assert_ne!(first.outcome.logs, second.outcome.logs);
    }

    #[tokio::test]
    async fn test_reset_clears_only_that_chain() {
        let factory = Arc::new(FakeForkFactory::new(100));
        let engine = engine(
            factory,
            vec![
                chain(spec(1, RollupStack::None)),
                chain(spec(2, RollupStack::None)),
            ],
        );
        engine.simulate(params(1, mint_request("1"))).await.unwrap();
        engine.simulate(params(2, mint_request("1"))).await.unwrap();

        engine.reset(1).await.unwrap();

        assert_eq!(
            engine.read_account(1, TOKEN).await.unwrap().balance,
            U256::ZERO
        );
        assert_eq!(
            engine.read_account(2, TOKEN).await.unwrap().balance,
            U256::from(3)
        );
    }

    #[tokio::test]
    async fn test_local_chain_estimate() {
        let factory = Arc::new(FakeForkFactory::new(100));
        let engine = engine(factory.clone(), vec![]);

        let outcome = engine
            .local_chain_estimate(LocalEstimateParams {
                fork_url: "http://localhost:8545".parse().unwrap(),
                from: None,
                to: TOKEN,
                data: bytes!("d0e30db0"),
                value: U256::from(1),
                kind: EstimateKind::Transaction,
            })
            .await
            .unwrap();

        assert_eq!(outcome.status, CallStatus::Success);
        assert_eq!(outcome.gas_used, FAKE_BASE_GAS + 4 * 16);
        assert_eq!(factory.created(), 1);
    }

    #[tokio::test]
    async fn test_local_chain_estimate_unreachable() {
        let factory = Arc::new(FakeForkFactory::new(100));
        factory.set_reachable(false);
        let engine = engine(factory, vec![]);

        let err = engine
            .local_chain_estimate(LocalEstimateParams {
                fork_url: "http://localhost:8545".parse().unwrap(),
                from: None,
                to: TOKEN,
                data: Bytes::new(),
                value: U256::ZERO,
                kind: EstimateKind::Call,
            })
            .await
            .err()
            .unwrap();

        assert!(matches!(err, SimulationError::Fork(_)));
    }

    #[tokio::test]
    async fn test_rollup_without_underlying_fees_reports_l1_error() {
        let factory = Arc::new(FakeForkFactory::new(100));
        let engine = engine(factory, vec![chain(spec(10, RollupStack::OpStack))]);
        engine.fee_cache.insert(GasFeesConfig {
            underlying: None,
            ..snapshot(10, 50 * GWEI)
        });

        let result = engine.simulate(params(10, mint_request("5"))).await.unwrap();

        assert_eq!(result.outcome.status, CallStatus::Success);
        assert!(result.cost.native.root > U256::ZERO);
        assert_eq!(result.cost.native.l1_submission, None);
        assert_eq!(
            result.cost.l1_error.as_deref(),
            Some("fees of the underlying chain of 10 unavailable")
        );
    }

    #[tokio::test]
    async fn test_stale_fees_refreshed_once() {
        let mut provider = MockEvmProvider::new();
        provider
            .expect_fee_history()
            .times(1)
            .returning(|_: u64, _, _| {
                Ok(FeeHistory {
                    base_fee_per_gas: vec![3 * GWEI, 4 * GWEI],
                    ..Default::default()
                })
            });
        let engine = SimulationEngine::new(
            Arc::new(Chains::new([Chain {
                provider: Arc::new(provider),
                ..chain(spec(1, RollupStack::None))
            }])),
            Arc::new(FakeForkFactory::new(100)),
            Arc::new(MemoryStateStore::default()),
            FeeHistoryAnalyzer::default(),
            Arc::new(FeeCache::default()),
            EngineSettings::default(),
        );

        let (a, b) = tokio::join!(engine.fee_config(1), engine.fee_config(1));
        assert_eq!(a.unwrap().next_base_fee, 4 * GWEI);
        assert_eq!(b.unwrap().next_base_fee, 4 * GWEI);
        assert_eq!(engine.fee_config(1).await.unwrap().next_base_fee, 4 * GWEI);
    }

    #[tokio::test]
    async fn test_unknown_chain_is_invalid() {
        let engine = engine(Arc::new(FakeForkFactory::new(100)), vec![]);
        let err = engine.reset(5).await.err().unwrap();
        assert!(matches!(err, SimulationError::InvalidRequest(_)));
    }
}
