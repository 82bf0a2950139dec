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

//! L1 data fee of OP stack rollups.
//!
//! The fee is read from the gas price oracle predeploy of a throwaway fork of the rollup after
//! pushing the caller's view of the underlying chain's fees into the L1 attributes predeploy,
//! the same way the sequencer's per-block system transaction does.

use std::{collections::HashMap, sync::Arc, time::Duration};

use alloy_consensus::{SignableTransaction, TxEip1559};
use alloy_primitives::{Address, Bytes, TxKind, U256};
use alloy_sol_types::SolCall;
use gascope_provider::{
    op::{
        GasPriceOracle, L1BlockValues, DEPOSITOR_ADDRESS, GAS_PRICE_ORACLE_ADDRESS,
        L1_BLOCK_ADDRESS,
    },
    ExecutionCall, ForkFactory, ForkedChain,
};
use gascope_types::{chain::RollupStack, L1FeeResult, UnderlyingFees};
use gascope_utils::timeout::with_timeout;
use metrics::Counter;
use metrics_derive::Metrics;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, instrument, warn};

use crate::{cost::to_usd, Chain, L1FeeError};

/// Serialize a call as the unsigned EIP-1559 transaction that would carry it.
///
/// Fee and nonce fields are left at zero, the oracle prices the transaction by its size.
pub fn unsigned_tx_bytes(chain_id: u64, to: Address, value: U256, data: Bytes) -> Bytes {
    let tx = TxEip1559 {
        chain_id,
        to: TxKind::Call(to),
        value,
        input: data,
        ..Default::default()
    };
    tx.encoded_for_signing().into()
}

/// Settings for the L1 fee calculator
#[derive(Clone, Debug)]
pub struct L1FeeSettings {
    /// Runtime bytecode injected at the gas price oracle address when absent
    pub gas_price_oracle_code: Option<Bytes>,
    /// Runtime bytecode injected at the L1 attributes address when absent
    pub l1_block_code: Option<Bytes>,
    /// Timeout for creating the throwaway client
    pub create_timeout: Duration,
}

impl Default for L1FeeSettings {
    fn default() -> Self {
        Self {
            gas_price_oracle_code: None,
            l1_block_code: None,
            create_timeout: Duration::from_secs(60),
        }
    }
}

struct L1Client {
    fork: Box<dyn ForkedChain>,
    ecotone_active: bool,
}

impl L1Client {
    async fn ensure_oracles(&mut self, settings: &L1FeeSettings) -> Result<(), L1FeeError> {
        let oracles = [
            (L1_BLOCK_ADDRESS, &settings.l1_block_code),
            (GAS_PRICE_ORACLE_ADDRESS, &settings.gas_price_oracle_code),
        ];
        for (address, code) in oracles {
            let existing = self
                .fork
                .get_code(address)
                .await
                .map_err(|e| L1FeeError::EnsureOracles(e.to_string()))?;
            if !existing.is_empty() {
                continue;
            }
            let code = code.clone().ok_or(L1FeeError::MissingBytecode(address))?;
            debug!("injecting oracle code at {address}");
            self.fork
                .set_code(address, code)
                .await
                .map_err(|e| L1FeeError::EnsureOracles(e.to_string()))?;
        }
        Ok(())
    }

    async fn read_scalars(&self) -> Result<(u32, u32), L1FeeError> {
        let base_fee_scalar = self
            .call_oracle(GasPriceOracle::baseFeeScalarCall {})
            .await
            .map_err(L1FeeError::ReadScalars)?;
        let blob_base_fee_scalar = self
            .call_oracle(GasPriceOracle::blobBaseFeeScalarCall {})
            .await
            .map_err(L1FeeError::ReadScalars)?;
        Ok((base_fee_scalar, blob_base_fee_scalar))
    }

    async fn set_block_values(&mut self, values: &L1BlockValues) -> Result<(), L1FeeError> {
        self.system_call(L1_BLOCK_ADDRESS, values.ecotone_calldata())
            .await
            .map_err(L1FeeError::SetBlockValues)
    }

    async fn activate_ecotone(&mut self) -> Result<(), L1FeeError> {
        if self.ecotone_active {
            return Ok(());
        }
        let active = self
            .call_oracle(GasPriceOracle::isEcotoneCall {})
            .await
            .map_err(L1FeeError::ActivateEcotone)?;
        if !active {
            self.system_call(
                GAS_PRICE_ORACLE_ADDRESS,
                GasPriceOracle::setEcotoneCall {}.abi_encode().into(),
            )
            .await
            .map_err(L1FeeError::ActivateEcotone)?;
        }
        self.ecotone_active = true;
        Ok(())
    }

    async fn l1_fee(&self, tx: Bytes) -> Result<U256, L1FeeError> {
        self.call_oracle(GasPriceOracle::getL1FeeCall { _data: tx })
            .await
            .map_err(L1FeeError::GetL1Fee)
    }

    async fn call_oracle<C: SolCall>(&self, call: C) -> Result<C::Return, String> {
        let output = self
            .fork
            .call_static(GAS_PRICE_ORACLE_ADDRESS, call.abi_encode().into())
            .await
            .map_err(|e| e.to_string())?;
        C::abi_decode_returns(&output).map_err(|e| e.to_string())
    }

    async fn system_call(&mut self, to: Address, data: Bytes) -> Result<(), String> {
        let result = self
            .fork
            .execute(ExecutionCall {
                from: DEPOSITOR_ADDRESS,
                to,
                data,
                value: U256::ZERO,
                skip_balance: true,
                commit: true,
            })
            .await
            .map_err(|e| e.to_string())?;
        match result.error {
            Some(error) => Err(error.message),
            None => Ok(()),
        }
    }
}

#[derive(Metrics)]
#[metrics(scope = "l1_fee")]
struct L1FeeMetrics {
    #[metric(describe = "the number of L1 fee estimates.")]
    estimates: Counter,
    #[metric(describe = "the number of failed L1 fee estimates.")]
    failures: Counter,
    #[metric(describe = "the number of throwaway L1 clients created.")]
    clients_created: Counter,
}

type ClientSlot = Arc<AsyncMutex<Option<L1Client>>>;

/// Computes the L1 submission fee of rollup transactions
pub struct L1FeeCalculator {
    factory: Arc<dyn ForkFactory>,
    settings: L1FeeSettings,
    clients: Mutex<HashMap<u64, ClientSlot>>,
    metrics: L1FeeMetrics,
}

impl L1FeeCalculator {
    /// Create a new calculator. Clients are created lazily, one per rollup.
    pub fn new(factory: Arc<dyn ForkFactory>, settings: L1FeeSettings) -> Self {
        Self {
            factory,
            settings,
            clients: Mutex::new(HashMap::new()),
            metrics: L1FeeMetrics::default(),
        }
    }

    /// Estimate the L1 fee of the serialized transaction `tx` on `chain`.
    ///
    /// Stacks other than the OP stack are not estimated and cost zero. Never fails, a failing
    /// step is reported in [`L1FeeResult::error`].
    #[instrument(skip_all, fields(chain_id = chain.spec.id, stack = %chain.spec.rollup_stack))]
    pub async fn estimate(
        &self,
        chain: &Chain,
        tx: Bytes,
        underlying: Option<UnderlyingFees>,
        native_token_price: U256,
    ) -> L1FeeResult {
        match chain.spec.rollup_stack {
            RollupStack::OpStack => {}
            RollupStack::None | RollupStack::Unsupported => {
                return L1FeeResult::estimated(U256::ZERO, U256::ZERO)
            }
        }

        self.metrics.estimates.increment(1);
        let fee = match underlying {
            Some(underlying) => self.op_stack_fee(chain, tx, underlying).await,
            None => Err(L1FeeError::MissingUnderlyingFees(chain.spec.id)),
        };
        match fee {
            Ok(native) => L1FeeResult::estimated(
                native,
                to_usd(native, native_token_price, chain.spec.native_token.decimals),
            ),
            Err(e) => {
                self.metrics.failures.increment(1);
                warn!("L1 fee estimation failed: {e}");
                L1FeeResult::failed(e.to_string())
            }
        }
    }

    async fn op_stack_fee(
        &self,
        chain: &Chain,
        tx: Bytes,
        underlying: UnderlyingFees,
    ) -> Result<U256, L1FeeError> {
        let slot = self.slot(chain.spec.id);
        let mut guard = slot.lock().await;
        let client = match guard.take() {
            Some(client) => client,
            None => self.create_client(chain).await?,
        };
        let client = guard.insert(client);

        let result = async {
            client.ensure_oracles(&self.settings).await?;
            let (base_fee_scalar, blob_base_fee_scalar) = client.read_scalars().await?;
            client
                .set_block_values(&L1BlockValues {
                    base_fee_scalar,
                    blob_base_fee_scalar,
                    base_fee: U256::from(underlying.next_base_fee),
                    blob_base_fee: U256::from(underlying.blob_base_fee),
                    ..Default::default()
                })
                .await?;
            client.activate_ecotone().await?;
            client.l1_fee(tx).await
        }
        .await;

        if result.is_err() {
            // the next estimate starts from a fresh client
            *guard = None;
        }
        result
    }

    async fn create_client(&self, chain: &Chain) -> Result<L1Client, L1FeeError> {
        let fork = with_timeout(
            "L1 client creation",
            self.settings.create_timeout,
            self.factory.create(chain.spec.id, chain.rpc_url.clone()),
        )
        .await
        .map_err(|e| L1FeeError::ClientUnavailable(format!("{e:#}")))?;
        self.metrics.clients_created.increment(1);
        Ok(L1Client {
            fork,
            ecotone_active: false,
        })
    }

    fn slot(&self, chain_id: u64) -> ClientSlot {
        self.clients.lock().entry(chain_id).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::bytes;
    use alloy_sol_types::SolValue;
    use gascope_provider::{FakeFork, FakeForkFactory, MockEvmProvider};
    use gascope_types::chain::ChainSpec;

    use super::*;

    const L1_FEE: u64 = 1_234_567;

    fn op_chain(stack: RollupStack) -> Chain {
        Chain {
            spec: ChainSpec {
                id: 10,
                rollup_stack: stack,
                underlying: Some(Box::new(ChainSpec {
                    id: 1,
                    ..Default::default()
                })),
                ..Default::default()
            },
            rpc_url: "http://localhost:8545".parse().unwrap(),
            provider: Arc::new(MockEvmProvider::new()),
            underlying: Some(Arc::new(MockEvmProvider::new())),
        }
    }

    fn oracle_fork() -> FakeFork {
        let respond = |selector: [u8; 4], output: Vec<u8>| (selector, Bytes::from(output));
        [
            respond(GasPriceOracle::baseFeeScalarCall::SELECTOR, 1368u32.abi_encode()),
            respond(
                GasPriceOracle::blobBaseFeeScalarCall::SELECTOR,
                810949u32.abi_encode(),
            ),
            respond(GasPriceOracle::isEcotoneCall::SELECTOR, false.abi_encode()),
            respond(
                GasPriceOracle::getL1FeeCall::SELECTOR,
                U256::from(L1_FEE).abi_encode(),
            ),
        ]
        .into_iter()
        .fold(FakeFork::new(10, 100), |fork, (selector, output)| {
            fork.with_static_response(GAS_PRICE_ORACLE_ADDRESS, selector, output)
        })
    }

    fn settings() -> L1FeeSettings {
        L1FeeSettings {
            gas_price_oracle_code: Some(bytes!("6080604052")),
            l1_block_code: Some(bytes!("6080604053")),
            ..Default::default()
        }
    }

    fn underlying() -> Option<UnderlyingFees> {
        Some(UnderlyingFees {
            next_base_fee: 7_000_000_000,
            blob_base_fee: 1,
        })
    }

    #[test]
    fn test_unsigned_tx_bytes() {
        let tx = unsigned_tx_bytes(10, Address::repeat_byte(1), U256::ZERO, bytes!("12345678"));
        // eip-1559 type prefix
        assert_eq!(tx[0], 0x02);
        assert!(tx.windows(4).any(|w| w == [0x12, 0x34, 0x56, 0x78]));
    }

    #[tokio::test]
    async fn test_ensure_oracles_idempotent() {
        let mut client = L1Client {
            fork: Box::new(FakeFork::new(10, 100)),
            ecotone_active: false,
        };

        client.ensure_oracles(&settings()).await.unwrap();
        let once = (
            client.fork.read_account(L1_BLOCK_ADDRESS).await.unwrap(),
            client.fork.read_account(GAS_PRICE_ORACLE_ADDRESS).await.unwrap(),
        );
        client.ensure_oracles(&settings()).await.unwrap();
        let twice = (
            client.fork.read_account(L1_BLOCK_ADDRESS).await.unwrap(),
            client.fork.read_account(GAS_PRICE_ORACLE_ADDRESS).await.unwrap(),
        );

        assert_eq!(once, twice);
        assert_eq!(once.0.code, bytes!("6080604053"));
        assert_eq!(once.1.code, bytes!("6080604052"));
    }

    #[tokio::test]
    async fn test_estimate_op_stack() {
        let factory = Arc::new(FakeForkFactory::with_template(oracle_fork(), 100));
        let calculator = L1FeeCalculator::new(factory.clone(), settings());
        let chain = op_chain(RollupStack::OpStack);
        // 2000 USD per token
        let price = U256::from(2000u64) * U256::from(10u64).pow(U256::from(18u64));

        let result = calculator
            .estimate(&chain, bytes!("02c0"), underlying(), price)
            .await;

        assert_eq!(result.error, None);
        assert_eq!(result.native, Some(U256::from(L1_FEE)));
        assert_eq!(result.usd, Some(U256::from(L1_FEE) * U256::from(2000u64)));

        let again = calculator
            .estimate(&chain, bytes!("02c0"), underlying(), price)
            .await;
        assert_eq!(again, result);
        assert_eq!(factory.created(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_stack_is_free() {
        let factory = Arc::new(FakeForkFactory::new(100));
        let calculator = L1FeeCalculator::new(factory.clone(), settings());

        let result = calculator
            .estimate(
                &op_chain(RollupStack::Unsupported),
                bytes!("02c0"),
                underlying(),
                U256::from(1),
            )
            .await;

        assert_eq!(result, L1FeeResult::estimated(U256::ZERO, U256::ZERO));
        assert_eq!(factory.created(), 0);
    }

    #[tokio::test]
    async fn test_missing_bytecode_fails() {
        let factory = Arc::new(FakeForkFactory::with_template(oracle_fork(), 100));
        let calculator = L1FeeCalculator::new(factory.clone(), L1FeeSettings::default());

        let result = calculator
            .estimate(
                &op_chain(RollupStack::OpStack),
                bytes!("02c0"),
                underlying(),
                U256::from(1),
            )
            .await;

        assert_eq!(result.native, None);
        assert_eq!(result.usd, None);
        assert!(result.error.unwrap().contains("no bytecode"));
    }

    #[tokio::test]
    async fn test_failed_step_reports_first_error() {
        // no static responses, reading the scalars reverts
        let factory = Arc::new(FakeForkFactory::with_template(FakeFork::new(10, 100), 100));
        let calculator = L1FeeCalculator::new(factory.clone(), settings());
        let chain = op_chain(RollupStack::OpStack);

        let result = calculator
            .estimate(&chain, bytes!("02c0"), underlying(), U256::from(1))
            .await;
        assert!(result
            .error
            .unwrap()
            .starts_with("failed to read fee scalars"));

        // the failed client is discarded
        calculator
            .estimate(&chain, bytes!("02c0"), underlying(), U256::from(1))
            .await;
        assert_eq!(factory.created(), 2);
    }

    #[tokio::test]
    async fn test_client_unavailable() {
        let factory = Arc::new(FakeForkFactory::new(100));
        factory.set_reachable(false);
        let calculator = L1FeeCalculator::new(factory.clone(), settings());

        let result = calculator
            .estimate(
                &op_chain(RollupStack::OpStack),
                bytes!("02c0"),
                underlying(),
                U256::from(1),
            )
            .await;

        assert!(result.error.unwrap().starts_with("L1 client unavailable"));
    }

    #[tokio::test]
    async fn test_missing_underlying_fees() {
        let factory = Arc::new(FakeForkFactory::new(100));
        let calculator = L1FeeCalculator::new(factory.clone(), settings());

        let result = calculator
            .estimate(
                &op_chain(RollupStack::OpStack),
                bytes!("02c0"),
                None,
                U256::from(1),
            )
            .await;

        assert_eq!(result.native, None);
        assert!(result
            .error
            .unwrap()
            .starts_with("fees of the underlying chain"));
        assert_eq!(factory.created(), 0);

        // stacks that are not estimated do not need them
        let result = calculator
            .estimate(
                &op_chain(RollupStack::Unsupported),
                bytes!("02c0"),
                None,
                U256::from(1),
            )
            .await;
        assert_eq!(result.native, Some(U256::ZERO));
    }
}
