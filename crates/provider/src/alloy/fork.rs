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

use std::{
    future::{Future, IntoFuture},
    path::PathBuf,
    time::Duration,
};

use alloy_node_bindings::{Anvil, AnvilInstance};
use alloy_primitives::{Address, Bytes, U256};
use alloy_provider::{
    ext::{AnvilApi, DebugApi},
    DynProvider, Provider as AlloyProvider, ProviderBuilder,
};
use alloy_rpc_types_anvil::Forking;
use alloy_rpc_types_eth::{
    state::{AccountOverride, StateOverride},
    BlockId, BlockNumberOrTag, TransactionRequest,
};
use alloy_rpc_types_trace::geth::{
    CallConfig, CallFrame, GethDebugBuiltInTracerType, GethDebugTracingCallOptions,
    GethDebugTracingOptions,
};
use anyhow::{anyhow, Context};
use gascope_types::SimulationLog;
use gascope_utils::log::LogOnError;
use tracing::{debug, instrument, Level};
use url::Url;

use super::classify_execution_error;
use crate::{
    AccountState, ExecutionCall, ExecutionResult, ForkFactory, ForkedChain, ProviderError,
    ProviderResult,
};

/// Forked chain backed by a local anvil node
pub struct AnvilFork {
    chain_id: u64,
    fork_url: Url,
    fork_block: u64,
    provider: DynProvider,
    timeout: Duration,
    // the node is killed when the instance is dropped
    _anvil: AnvilInstance,
}

impl AnvilFork {
    async fn timed<T, E>(
        &self,
        what: &str,
        fut: impl Future<Output = Result<T, E>>,
    ) -> ProviderResult<T>
    where
        ProviderError: From<E>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => Ok(res?),
            Err(_) => Err(ProviderError::Timeout(format!(
                "{what} on fork of chain {}",
                self.chain_id
            ))),
        }
    }

    async fn balance(&self, address: Address) -> ProviderResult<U256> {
        self.timed("get balance", self.provider.get_balance(address).into_future())
            .await
    }

    async fn next_base_fee(&self) -> ProviderResult<Option<u64>> {
        let pending = self
            .timed(
                "get pending block",
                self.provider
                    .get_block_by_number(BlockNumberOrTag::Pending)
                    .into_future(),
            )
            .await?;
        Ok(pending.and_then(|block| block.header.base_fee_per_gas))
    }

    async fn set_next_base_fee(&self, base_fee: U256) -> ProviderResult<()> {
        self.timed(
            "set base fee",
            self.provider
                .raw_request::<_, ()>("anvil_setNextBlockBaseFeePerGas".into(), (base_fee,)),
        )
        .await
    }

    async fn trace(
        &self,
        tx: TransactionRequest,
        state_overrides: Option<StateOverride>,
    ) -> ProviderResult<CallFrame> {
        let trace_options = GethDebugTracingCallOptions {
            tracing_options: GethDebugTracingOptions::default()
                .with_tracer(GethDebugBuiltInTracerType::CallTracer.into())
                .with_call_config(CallConfig::default().with_log()),
            state_overrides,
            ..Default::default()
        };
        let trace = self
            .timed(
                "debug_traceCall",
                self.provider
                    .debug_trace_call(tx, BlockId::latest(), trace_options),
            )
            .await?;
        Ok(trace
            .try_into_call_frame()
            .map_err(|e| anyhow!("unexpected tracer output: {e:?}"))?)
    }

    /// Mine `tx` as `from`. The traced frame supplies the return data, the receipt the gas used
    /// and logs.
    ///
    /// Every exit path stops impersonating `from`. If the call is not mined, the caller's
    /// balance and the next block's base fee are put back.
    async fn commit(
        &mut self,
        tx: TransactionRequest,
        from: Address,
        balance: Option<BalanceTopUp>,
        frame: CallFrame,
    ) -> ProviderResult<ExecutionResult> {
        let next_base_fee = self.next_base_fee().await?;

        let applied = async {
            if let Some(top_up) = balance {
                self.timed(
                    "set balance",
                    self.provider.anvil_set_balance(from, top_up.topped_up),
                )
                .await?;
            }
            self.timed("impersonate", self.provider.anvil_impersonate_account(from))
                .await?;
            // the committed call pays no fees, only its value moves
            self.set_next_base_fee(U256::ZERO).await?;

            let tx = tx.max_fee_per_gas(0).max_priority_fee_per_gas(0);
            let pending = self
                .timed("send transaction", self.provider.send_transaction(tx))
                .await?;
            let receipt = tokio::time::timeout(self.timeout, pending.get_receipt())
                .await
                .map_err(|_| ProviderError::Timeout("transaction receipt".to_string()))?
                .context("should have mined the committed call")?;
            Ok(receipt)
        }
        .await;

        let stop_impersonating = self.timed(
            "stop impersonating",
            self.provider.anvil_stop_impersonating_account(from),
        );
        let rollback = async {
            if let Some(top_up) = balance {
                self.timed(
                    "restore balance",
                    self.provider.anvil_set_balance(from, top_up.original),
                )
                .await?;
            }
            if let Some(base_fee) = next_base_fee {
                self.set_next_base_fee(U256::from(base_fee)).await?;
            }
            Ok(())
        };
        let receipt = settle(applied, stop_impersonating, rollback).await?;

        let logs = receipt
            .inner
            .logs()
            .iter()
            .map(|log| SimulationLog {
                address: log.address(),
                topics: log.topics().to_vec(),
                data: log.data().data.clone(),
            })
            .collect();

        debug!(
            "committed call from {from:?} in block {:?} using {} gas",
            receipt.block_number, receipt.gas_used
        );

        Ok(committed_result(
            frame,
            receipt.gas_used,
            logs,
            receipt.status(),
        ))
    }
}

#[derive(Clone, Copy, Debug)]
struct BalanceTopUp {
    original: U256,
    topped_up: U256,
}

/// Finish a multi step fork mutation: `cleanup` always runs, `rollback` only runs if `applied`
/// failed. The error of `applied` takes precedence over cleanup and rollback errors, which are
/// then only logged.
async fn settle<T>(
    applied: ProviderResult<T>,
    cleanup: impl Future<Output = ProviderResult<()>>,
    rollback: impl Future<Output = ProviderResult<()>>,
) -> ProviderResult<T> {
    let cleaned = cleanup.await;
    match applied {
        Ok(value) => cleaned.map(|_| value),
        Err(error) => {
            let _ = cleaned.log_on_error_level(Level::WARN, "failed to clean up fork");
            let _ = rollback
                .await
                .log_on_error_level(Level::WARN, "failed to roll back fork");
            Err(error)
        }
    }
}

/// Result of a mined call: return data comes from the trace, the receipt is authoritative for
/// gas and logs.
fn committed_result(
    frame: CallFrame,
    gas_used: u64,
    logs: Vec<SimulationLog>,
    mined_ok: bool,
) -> ExecutionResult {
    let error =
        (!mined_ok).then(|| classify_execution_error("transaction reverted when mined", None));
    ExecutionResult {
        output: frame.output.unwrap_or_default(),
        gas_used,
        logs,
        error,
    }
}

fn collect_logs(frame: &CallFrame, logs: &mut Vec<SimulationLog>) {
    if frame.error.is_some() {
        return;
    }
    logs.extend(frame.logs.iter().map(|log| SimulationLog {
        address: log.address.unwrap_or(frame.to.unwrap_or_default()),
        topics: log.topics.clone().unwrap_or_default(),
        data: log.data.clone().unwrap_or_default(),
    }));
    for call in &frame.calls {
        collect_logs(call, logs);
    }
}

#[async_trait::async_trait]
impl ForkedChain for AnvilFork {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn fork_block(&self) -> u64 {
        self.fork_block
    }

    #[instrument(skip_all, fields(chain_id = self.chain_id, to = ?call.to, commit = call.commit))]
    async fn execute(&mut self, call: ExecutionCall) -> ProviderResult<ExecutionResult> {
        let tx = TransactionRequest::default()
            .from(call.from)
            .to(call.to)
            .input(call.data.into())
            .value(call.value);

        let balance = if call.skip_balance {
            let original = self.balance(call.from).await?;
            Some(BalanceTopUp {
                original,
                topped_up: original.saturating_add(call.value),
            })
        } else {
            None
        };
        let state_overrides = balance.map(|top_up| {
            let mut overrides = StateOverride::default();
            overrides.insert(
                call.from,
                AccountOverride {
                    balance: Some(top_up.topped_up),
                    ..Default::default()
                },
            );
            overrides
        });

        let frame = self.trace(tx.clone(), state_overrides).await?;
        let error = frame.error.as_ref().map(|err| {
            let message = match &frame.revert_reason {
                Some(reason) => format!("{err}: {reason}"),
                None => err.clone(),
            };
            classify_execution_error(&message, frame.output.clone())
        });

        if error.is_none() && call.commit {
            return self.commit(tx, call.from, balance, frame).await;
        }

        let mut logs = vec![];
        collect_logs(&frame, &mut logs);
        Ok(ExecutionResult {
            output: frame.output.unwrap_or_default(),
            gas_used: frame.gas_used.saturating_to(),
            logs,
            error,
        })
    }

    async fn read_account(&self, address: Address) -> ProviderResult<AccountState> {
        let (balance, nonce, code) = tokio::try_join!(
            self.timed("get balance", self.provider.get_balance(address).into_future()),
            self.timed(
                "get nonce",
                self.provider.get_transaction_count(address).into_future()
            ),
            self.timed("get code", self.provider.get_code_at(address).into_future()),
        )?;
        Ok(AccountState {
            balance,
            nonce,
            code,
        })
    }

    async fn get_code(&self, address: Address) -> ProviderResult<Bytes> {
        self.timed("get code", self.provider.get_code_at(address).into_future())
            .await
    }

    async fn set_code(&mut self, address: Address, code: Bytes) -> ProviderResult<()> {
        self.timed("set code", self.provider.anvil_set_code(address, code))
            .await
    }

    async fn call_static(&self, to: Address, data: Bytes) -> ProviderResult<Bytes> {
        let tx = TransactionRequest::default().to(to).input(data.into());
        self.timed("eth_call", self.provider.call(tx).into_future())
            .await
    }

    #[instrument(skip(self), fields(chain_id = self.chain_id))]
    async fn reset(&mut self, block: Option<u64>) -> ProviderResult<u64> {
        let forking = Forking {
            json_rpc_url: Some(self.fork_url.to_string()),
            block_number: block,
        };
        self.timed("reset", self.provider.anvil_reset(Some(forking)))
            .await?;
        self.fork_block = self
            .timed("get block number", self.provider.get_block_number().into_future())
            .await?;
        Ok(self.fork_block)
    }

    async fn dump_state(&self) -> ProviderResult<Bytes> {
        self.timed("dump state", self.provider.anvil_dump_state())
            .await
    }

    async fn load_state(&mut self, state: Bytes) -> ProviderResult<()> {
        let loaded = self
            .timed("load state", self.provider.anvil_load_state(state))
            .await?;
        if !loaded {
            return Err(anyhow!("anvil rejected the state blob").into());
        }
        Ok(())
    }
}

/// Spawns an anvil node per fork
#[derive(Debug, Clone)]
pub struct AnvilForkFactory {
    anvil_path: Option<PathBuf>,
    timeout: Duration,
}

impl AnvilForkFactory {
    /// Create a factory using the `anvil` binary on the path. `timeout` bounds node
    /// startup and every request made to the node.
    pub fn new(timeout: Duration) -> Self {
        Self {
            anvil_path: None,
            timeout,
        }
    }

    /// Use the anvil binary at `path`
    pub fn with_anvil_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.anvil_path = Some(path.into());
        self
    }
}

#[async_trait::async_trait]
impl ForkFactory for AnvilForkFactory {
    #[instrument(skip(self, rpc_url))]
    async fn create(&self, chain_id: u64, rpc_url: Url) -> ProviderResult<Box<dyn ForkedChain>> {
        let mut anvil = Anvil::new()
            .fork(rpc_url.to_string())
            .timeout(self.timeout.as_millis() as u64);
        if let Some(path) = &self.anvil_path {
            anvil = anvil.path(path);
        }

        let instance = tokio::task::spawn_blocking(move || anvil.try_spawn())
            .await
            .context("anvil spawn task panicked")?
            .context("failed to spawn anvil")?;
        let provider = ProviderBuilder::new()
            .connect_http(instance.endpoint_url())
            .erased();

        let mut fork = AnvilFork {
            chain_id,
            fork_url: rpc_url,
            fork_block: 0,
            provider,
            timeout: self.timeout,
            _anvil: instance,
        };
        fork.fork_block = fork
            .timed("get block number", fork.provider.get_block_number().into_future())
            .await?;
        debug!("forked chain {chain_id} at block {}", fork.fork_block);

        Ok(Box::new(fork))
    }
}
