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

//! In memory forked chain for tests

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use alloy_primitives::{Address, Bytes, B256, U256};
use anyhow::anyhow;
use gascope_types::{CallError, SimulationLog};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    classify_execution_error, AccountState, ExecutionCall, ExecutionResult, ForkFactory,
    ForkedChain, ProviderError, ProviderResult,
};

/// Gas charged by [`FakeFork`] for every call
pub const FAKE_BASE_GAS: u64 = 21_000;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct FakeState {
    accounts: BTreeMap<Address, AccountState>,
}

impl FakeState {
    fn account(&mut self, address: Address) -> &mut AccountState {
        self.accounts.entry(address).or_default()
    }
}

/// Chain forks are taken from. Shared between a [`FakeForkFactory`] and its forks.
#[derive(Debug)]
pub struct FakeUpstream {
    head: AtomicU64,
    reachable: AtomicBool,
    created: AtomicUsize,
}

impl FakeUpstream {
    fn new(head: u64) -> Self {
        Self {
            head: AtomicU64::new(head),
            reachable: AtomicBool::new(true),
            created: AtomicUsize::new(0),
        }
    }

    fn check_reachable(&self) -> ProviderResult<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(anyhow!("connection refused").into())
        }
    }
}

/// Forked chain that keeps accounts in memory.
///
/// A successful call returns the caller's nonce before the call as a 32 byte word, and emits
/// one log from the target carrying that nonce as its topic. Committed calls move `value`
/// from the caller to the target and bump the caller's nonce, so the order of committed
/// calls is observable.
#[derive(Clone, Debug)]
pub struct FakeFork {
    chain_id: u64,
    fork_block: u64,
    upstream: Arc<FakeUpstream>,
    genesis: FakeState,
    state: FakeState,
    reverts: HashMap<[u8; 4], String>,
    static_responses: HashMap<(Address, [u8; 4]), Bytes>,
    send_failures: HashSet<[u8; 4]>,
    execute_delay: Option<Duration>,
}

impl FakeFork {
    /// Create a fork of `chain_id` at `fork_block`
    pub fn new(chain_id: u64, fork_block: u64) -> Self {
        Self {
            chain_id,
            fork_block,
            upstream: Arc::new(FakeUpstream::new(fork_block)),
            genesis: FakeState::default(),
            state: FakeState::default(),
            reverts: HashMap::new(),
            static_responses: HashMap::new(),
            send_failures: HashSet::new(),
            execute_delay: None,
        }
    }

    /// Add an account present at the fork point
    pub fn with_account(mut self, address: Address, account: AccountState) -> Self {
        self.genesis.accounts.insert(address, account.clone());
        self.state.accounts.insert(address, account);
        self
    }

    /// Calls whose data starts with `selector` revert with `reason`
    pub fn with_revert(mut self, selector: [u8; 4], reason: impl Into<String>) -> Self {
        self.reverts.insert(selector, reason.into());
        self
    }

    /// Static calls to `to` whose data starts with `selector` return `output`
    pub fn with_static_response(mut self, to: Address, selector: [u8; 4], output: Bytes) -> Self {
        self.static_responses.insert((to, selector), output);
        self
    }

    /// Committing a call whose data starts with `selector` fails as if the transaction could
    /// not be sent. The fork is left as it was before the call.
    pub fn with_send_failure(mut self, selector: [u8; 4]) -> Self {
        self.send_failures.insert(selector);
        self
    }

    /// Sleep before executing each call
    pub fn with_execute_delay(mut self, delay: Duration) -> Self {
        self.execute_delay = Some(delay);
        self
    }

    fn selector(data: &Bytes) -> Option<[u8; 4]> {
        data.get(..4).and_then(|s| s.try_into().ok())
    }

    fn gas(data: &Bytes) -> u64 {
        data.iter().fold(FAKE_BASE_GAS, |gas, b| {
            gas + if *b == 0 { 4 } else { 16 }
        })
    }
}

#[async_trait::async_trait]
impl ForkedChain for FakeFork {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn fork_block(&self) -> u64 {
        self.fork_block
    }

    async fn execute(&mut self, call: ExecutionCall) -> ProviderResult<ExecutionResult> {
        if let Some(delay) = self.execute_delay {
            tokio::time::sleep(delay).await;
        }
        let gas_used = Self::gas(&call.data);

        if let Some(reason) = Self::selector(&call.data).and_then(|s| self.reverts.get(&s)) {
            return Ok(ExecutionResult {
                output: Bytes::new(),
                gas_used,
                logs: vec![],
                error: Some(classify_execution_error(
                    &format!("execution reverted: {reason}"),
                    None,
                )),
            });
        }

        let sender = self.state.account(call.from).clone();
        let available = if call.skip_balance {
            sender.balance.saturating_add(call.value)
        } else {
            sender.balance
        };
        if available < call.value {
            return Ok(ExecutionResult {
                gas_used: 0,
                error: Some(CallError::execution("insufficient funds for transfer")),
                ..Default::default()
            });
        }

        let nonce = B256::from(U256::from(sender.nonce));
        if call.commit {
            if Self::selector(&call.data).is_some_and(|s| self.send_failures.contains(&s)) {
                return Err(ProviderError::Timeout("send transaction".to_string()));
            }
            let from = self.state.account(call.from);
            from.balance = available - call.value;
            from.nonce += 1;
            let to = self.state.account(call.to);
            to.balance = to.balance.saturating_add(call.value);
        }

        Ok(ExecutionResult {
            output: Bytes::copy_from_slice(nonce.as_slice()),
            gas_used,
            logs: vec![SimulationLog {
                address: call.to,
                topics: vec![nonce],
                data: call.data,
            }],
            error: None,
        })
    }

    async fn read_account(&self, address: Address) -> ProviderResult<AccountState> {
        Ok(self
            .state
            .accounts
            .get(&address)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_code(&self, address: Address) -> ProviderResult<Bytes> {
        Ok(self
            .state
            .accounts
            .get(&address)
            .map(|a| a.code.clone())
            .unwrap_or_default())
    }

    async fn set_code(&mut self, address: Address, code: Bytes) -> ProviderResult<()> {
        self.state.account(address).code = code;
        Ok(())
    }

    async fn call_static(&self, to: Address, data: Bytes) -> ProviderResult<Bytes> {
        Self::selector(&data)
            .and_then(|s| self.static_responses.get(&(to, s)))
            .cloned()
            .ok_or_else(|| ProviderError::Contract("execution reverted".to_string()))
    }

    async fn reset(&mut self, block: Option<u64>) -> ProviderResult<u64> {
        self.upstream.check_reachable()?;
        self.state = self.genesis.clone();
        self.fork_block = block.unwrap_or_else(|| self.upstream.head.load(Ordering::SeqCst));
        Ok(self.fork_block)
    }

    async fn dump_state(&self) -> ProviderResult<Bytes> {
        serde_json::to_vec(&self.state)
            .map(Bytes::from)
            .map_err(|e| anyhow!(e).into())
    }

    async fn load_state(&mut self, state: Bytes) -> ProviderResult<()> {
        self.state = serde_json::from_slice(&state).map_err(|e| anyhow!(e))?;
        Ok(())
    }
}

/// Creates [`FakeFork`]s from a template
#[derive(Debug)]
pub struct FakeForkFactory {
    template: FakeFork,
    upstream: Arc<FakeUpstream>,
    create_delay: Option<Duration>,
}

impl FakeForkFactory {
    /// Create a factory whose upstream chain is at block `head`
    pub fn new(head: u64) -> Self {
        Self::with_template(FakeFork::new(0, head), head)
    }

    /// Create a factory cloning `template` for every fork
    pub fn with_template(template: FakeFork, head: u64) -> Self {
        let upstream = Arc::new(FakeUpstream::new(head));
        Self {
            template: FakeFork {
                upstream: Arc::clone(&upstream),
                ..template
            },
            upstream,
            create_delay: None,
        }
    }

    /// Sleep before creating each fork
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    /// Move the upstream head
    pub fn set_head(&self, head: u64) {
        self.upstream.head.store(head, Ordering::SeqCst);
    }

    /// Make the upstream endpoint (un)reachable
    pub fn set_reachable(&self, reachable: bool) {
        self.upstream.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Number of forks created so far
    pub fn created(&self) -> usize {
        self.upstream.created.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ForkFactory for FakeForkFactory {
    async fn create(&self, chain_id: u64, _rpc_url: Url) -> ProviderResult<Box<dyn ForkedChain>> {
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        self.upstream.check_reachable()?;
        self.upstream.created.fetch_add(1, Ordering::SeqCst);

        let mut fork = self.template.clone();
        fork.chain_id = chain_id;
        fork.fork_block = self.upstream.head.load(Ordering::SeqCst);
        Ok(Box::new(fork))
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{address, bytes};

    use super::*;

    const ALICE: Address = address!("00000000000000000000000000000000000a11ce");
    const TOKEN: Address = address!("0000000000000000000000000000000000000707");

    fn call(commit: bool) -> ExecutionCall {
        ExecutionCall {
            from: ALICE,
            to: TOKEN,
            data: bytes!("40c10f19"),
            value: U256::from(5),
            skip_balance: true,
            commit,
        }
    }

    #[tokio::test]
    async fn test_commit_moves_value_and_nonce() {
        let mut fork = FakeFork::new(1, 100);

        let res = fork.execute(call(false)).await.unwrap();
        assert!(res.error.is_none());
        assert_eq!(fork.read_account(TOKEN).await.unwrap().balance, U256::ZERO);

        fork.execute(call(true)).await.unwrap();
        let res = fork.execute(call(true)).await.unwrap();
        assert_eq!(res.logs[0].topics[0], B256::from(U256::from(1)));
        assert_eq!(fork.read_account(TOKEN).await.unwrap().balance, U256::from(10));
        assert_eq!(fork.read_account(ALICE).await.unwrap().nonce, 2);
    }

    #[tokio::test]
    async fn test_insufficient_balance() {
        let mut fork = FakeFork::new(1, 100);
        let res = fork
            .execute(ExecutionCall {
                skip_balance: false,
                ..call(true)
            })
            .await
            .unwrap();
        assert_eq!(res.gas_used, 0);
        assert!(res.error.is_some());
        assert_eq!(fork.read_account(ALICE).await.unwrap().nonce, 0);
    }

    #[tokio::test]
    async fn test_send_failure_leaves_state_untouched() {
        let mut fork = FakeFork::new(1, 100)
            .with_account(
                ALICE,
                AccountState {
                    balance: U256::from(50),
                    ..Default::default()
                },
            )
            .with_send_failure([0x40, 0xc1, 0x0f, 0x19]);

        // simulating the call still works
        let res = fork.execute(call(false)).await.unwrap();
        assert!(res.error.is_none());

        assert!(fork.execute(call(true)).await.is_err());
        let alice = fork.read_account(ALICE).await.unwrap();
        assert_eq!(alice.balance, U256::from(50));
        assert_eq!(alice.nonce, 0);
        assert_eq!(fork.read_account(TOKEN).await.unwrap().balance, U256::ZERO);
    }

    #[tokio::test]
    async fn test_dump_load_reset() {
        let mut fork = FakeFork::new(1, 100);
        fork.execute(call(true)).await.unwrap();
        let blob = fork.dump_state().await.unwrap();

        assert_eq!(fork.reset(None).await.unwrap(), 100);
        assert_eq!(fork.read_account(TOKEN).await.unwrap().balance, U256::ZERO);

        fork.load_state(blob).await.unwrap();
        assert_eq!(fork.read_account(TOKEN).await.unwrap().balance, U256::from(5));
    }

    #[tokio::test]
    async fn test_factory_unreachable() {
        let factory = FakeForkFactory::new(7);
        factory.set_reachable(false);
        let url = Url::parse("http://localhost:8545").unwrap();
        assert!(factory.create(1, url.clone()).await.is_err());
        factory.set_reachable(true);
        let fork = factory.create(1, url).await.unwrap();
        assert_eq!(fork.fork_block(), 7);
        assert_eq!(factory.created(), 1);
    }
}
