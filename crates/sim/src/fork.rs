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

//! Lifecycle of the per chain forked execution contexts.

use std::{
    collections::HashMap,
    ops::{Deref, DerefMut},
    sync::Arc,
    time::Duration,
};

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use gascope_provider::{AccountState, ForkFactory, ForkedChain, StateStore};
use gascope_utils::{log::LogOnError, timeout::with_timeout};
use metrics::Counter;
use metrics_derive::Metrics;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMappedMutexGuard, OwnedMutexGuard};
use tracing::{info, instrument, Level};

use crate::{Chain, ForkError};

/// Settings for the fork manager
#[derive(Clone, Debug)]
pub struct ForkSettings {
    /// Prefix of the keys persisted fork state is stored under
    pub state_key_prefix: String,
    /// Upper bound on creating a fork
    pub create_timeout: Duration,
}

impl Default for ForkSettings {
    fn default() -> Self {
        Self {
            state_key_prefix: "gascope_fork_state".to_string(),
            create_timeout: Duration::from_secs(60),
        }
    }
}

/// Identity of a live fork
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkInfo {
    /// Forked chain
    pub chain_id: u64,
    /// Block the fork was taken at
    pub fork_block: u64,
    /// When the fork was taken
    pub forked_at: DateTime<Utc>,
}

struct LiveFork {
    chain: Box<dyn ForkedChain>,
    forked_at: DateTime<Utc>,
}

type Slot = Arc<AsyncMutex<Option<LiveFork>>>;

/// Exclusive access to the fork of one chain.
///
/// Operations on the fork are serialized: the guard holds the chain's lock until dropped.
pub struct ForkGuard {
    inner: OwnedMappedMutexGuard<Option<LiveFork>, LiveFork>,
}

impl ForkGuard {
    /// Identity of the fork
    pub fn info(&self) -> ForkInfo {
        ForkInfo {
            chain_id: self.inner.chain.chain_id(),
            fork_block: self.inner.chain.fork_block(),
            forked_at: self.inner.forked_at,
        }
    }
}

impl Deref for ForkGuard {
    type Target = dyn ForkedChain;

    fn deref(&self) -> &Self::Target {
        &*self.inner.chain
    }
}

impl DerefMut for ForkGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.inner.chain
    }
}

#[derive(Metrics)]
#[metrics(scope = "fork_manager")]
struct ForkMetrics {
    #[metric(describe = "the number of forks created.")]
    forks_created: Counter,
    #[metric(describe = "the number of fork resets.")]
    forks_reset: Counter,
    #[metric(describe = "the number of failed fork state saves or restores.")]
    persistence_failures: Counter,
}

/// Owns at most one forked execution context per chain.
///
/// The map of slots has its own lock, held only to look up a slot, so creating the fork of one
/// chain never blocks calls in flight on another.
pub struct ForkManager {
    factory: Arc<dyn ForkFactory>,
    store: Arc<dyn StateStore>,
    settings: ForkSettings,
    slots: Mutex<HashMap<u64, Slot>>,
    metrics: ForkMetrics,
}

impl ForkManager {
    /// Create a new fork manager
    pub fn new(
        factory: Arc<dyn ForkFactory>,
        store: Arc<dyn StateStore>,
        settings: ForkSettings,
    ) -> Self {
        Self {
            factory,
            store,
            settings,
            slots: Mutex::new(HashMap::new()),
            metrics: ForkMetrics::default(),
        }
    }

    /// Get exclusive access to the fork of `chain`, creating it at the chain head if none is
    /// live. A new fork resumes from the chain's persisted state, if any.
    ///
    /// Concurrent acquisitions of the same chain are serialized; a caller waiting on a fork
    /// being created receives that fork.
    #[instrument(skip_all, fields(chain_id = chain.spec.id))]
    pub async fn acquire(&self, chain: &Chain) -> Result<ForkGuard, ForkError> {
        let mut guard = self.slot(chain.spec.id).lock_owned().await;
        if guard.is_none() {
            let live = self.create(chain, true).await?;
            *guard = Some(live);
        }
        Self::into_fork_guard(chain.spec.id, guard)
    }

    /// Discard all accumulated state of the fork of `chain` and re-fork at the chain head.
    ///
    /// Waits for any in-flight operation on the chain. Forks of other chains are unaffected.
    /// On failure the chain is left without a fork; the next acquisition creates a new one.
    #[instrument(skip_all, fields(chain_id = chain.spec.id))]
    pub async fn reset(&self, chain: &Chain) -> Result<ForkInfo, ForkError> {
        let chain_id = chain.spec.id;
        let mut guard = self.slot(chain_id).lock_owned().await;

        match guard.as_mut() {
            Some(live) => match live.chain.reset(None).await {
                Ok(_) => live.forked_at = Utc::now(),
                Err(e) => {
                    *guard = None;
                    return Err(ForkError::unavailable(chain_id, e));
                }
            },
            None => *guard = Some(self.create(chain, false).await?),
        }
        self.metrics.forks_reset.increment(1);

        if self
            .store
            .delete(&self.state_key(chain_id))
            .await
            .log_on_error_level(Level::WARN, "failed to delete persisted fork state")
            .is_err()
        {
            self.metrics.persistence_failures.increment(1);
        }

        let guard = Self::into_fork_guard(chain_id, guard)?;
        let info = guard.info();
        info!("reset fork of chain {chain_id} to block {}", info.fork_block);
        Ok(info)
    }

    /// Save the accumulated state of a fork so a restart resumes from it
    pub async fn persist(&self, fork: &ForkGuard) -> Result<(), ForkError> {
        let res = async {
            let state = fork.dump_state().await?;
            self.store
                .put(&self.state_key(fork.chain_id()), state.to_vec())
                .await
        }
        .await;
        res.map_err(|e| {
            self.metrics.persistence_failures.increment(1);
            ForkError::Persistence(e.to_string())
        })
    }

    /// Read an account from the fork of `chain`
    pub async fn read_account(
        &self,
        chain: &Chain,
        address: Address,
    ) -> Result<AccountState, ForkError> {
        let fork = self.acquire(chain).await?;
        fork.read_account(address)
            .await
            .map_err(|e| ForkError::unavailable(chain.spec.id, e))
    }

    fn slot(&self, chain_id: u64) -> Slot {
        Arc::clone(self.slots.lock().entry(chain_id).or_default())
    }

    fn state_key(&self, chain_id: u64) -> String {
        format!("{}_{chain_id}", self.settings.state_key_prefix)
    }

    fn into_fork_guard(
        chain_id: u64,
        guard: OwnedMutexGuard<Option<LiveFork>>,
    ) -> Result<ForkGuard, ForkError> {
        OwnedMutexGuard::try_map(guard, Option::as_mut)
            .map(|inner| ForkGuard { inner })
            .map_err(|_| ForkError::unavailable(chain_id, "no live fork"))
    }

    async fn create(&self, chain: &Chain, restore: bool) -> Result<LiveFork, ForkError> {
        let chain_id = chain.spec.id;
        let mut fork = with_timeout(
            "fork creation",
            self.settings.create_timeout,
            self.factory.create(chain_id, chain.rpc_url.clone()),
        )
        .await
        .map_err(|e| ForkError::unavailable(chain_id, format!("{e:#}")))?;
        self.metrics.forks_created.increment(1);

        if restore {
            self.restore(fork.as_mut()).await;
        }
        info!(
            "forked chain {} ({chain_id}) at block {}",
            chain.spec.name,
            fork.fork_block()
        );

        Ok(LiveFork {
            chain: fork,
            forked_at: Utc::now(),
        })
    }

    async fn restore(&self, fork: &mut dyn ForkedChain) {
        let chain_id = fork.chain_id();
        let Ok(Some(blob)) = self
            .store
            .get(&self.state_key(chain_id))
            .await
            .log_on_error_level(Level::WARN, "failed to read persisted fork state")
        else {
            return;
        };

        match fork
            .load_state(blob.into())
            .await
            .log_on_error_level(Level::WARN, "failed to restore persisted fork state")
        {
            Ok(()) => info!("restored persisted state of chain {chain_id}"),
            Err(_) => self.metrics.persistence_failures.increment(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{address, bytes, U256};
    use gascope_provider::{
        ExecutionCall, FakeFork, FakeForkFactory, MemoryStateStore, MockEvmProvider,
    };
    use gascope_types::chain::ChainSpec;
    use url::Url;

    use super::*;

    const ALICE: Address = address!("00000000000000000000000000000000000a11ce");
    const TOKEN: Address = address!("0000000000000000000000000000000000000707");

    fn chain(id: u64) -> Chain {
        Chain {
            spec: ChainSpec {
                id,
                ..Default::default()
            },
            rpc_url: Url::parse("http://localhost:8545").unwrap(),
            provider: Arc::new(MockEvmProvider::default()),
            underlying: None,
        }
    }

    fn mint(value: u64) -> ExecutionCall {
        ExecutionCall {
            from: ALICE,
            to: TOKEN,
            data: bytes!("40c10f19"),
            value: U256::from(value),
            skip_balance: true,
            commit: true,
        }
    }

    fn manager(factory: Arc<FakeForkFactory>, store: Arc<MemoryStateStore>) -> ForkManager {
        ForkManager::new(factory, store, ForkSettings::default())
    }

    #[tokio::test]
    async fn test_acquire_reuses_fork() {
        let factory = Arc::new(FakeForkFactory::new(100));
        let manager = manager(factory.clone(), Arc::default());

        let info = manager.acquire(&chain(1)).await.unwrap().info();
        factory.set_head(101);
        let again = manager.acquire(&chain(1)).await.unwrap().info();

        assert_eq!(info, again);
        assert_eq!(info.fork_block, 100);
        assert_eq!(factory.created(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_creates_once() {
        let factory = Arc::new(
            FakeForkFactory::new(100).with_create_delay(Duration::from_millis(50)),
        );
        let manager = manager(factory.clone(), Arc::default());
        let chain = chain(1);

        let acquire = || async { manager.acquire(&chain).await.map(|f| f.info()) };
        let (a, b) = tokio::join!(acquire(), acquire());

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(factory.created(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_leaves_no_fork() {
        let factory = Arc::new(FakeForkFactory::new(100));
        let manager = manager(factory.clone(), Arc::default());
        factory.set_reachable(false);

        let err = manager.acquire(&chain(1)).await.err().unwrap();
        assert!(matches!(err, ForkError::ForkUnavailable { chain_id: 1, .. }));
        assert_eq!(factory.created(), 0);

        factory.set_reachable(true);
        manager.acquire(&chain(1)).await.unwrap();
        assert_eq!(factory.created(), 1);
    }

    #[tokio::test]
    async fn test_persist_and_restore() {
        let store = Arc::new(MemoryStateStore::default());
        {
            let manager = manager(Arc::new(FakeForkFactory::new(100)), store.clone());
            let mut fork = manager.acquire(&chain(1)).await.unwrap();
            fork.execute(mint(5)).await.unwrap();
            manager.persist(&fork).await.unwrap();
        }
        assert!(store.get("gascope_fork_state_1").await.unwrap().is_some());

        // a new session resumes from the persisted state
        let manager = manager(Arc::new(FakeForkFactory::new(120)), store);
        let account = manager.read_account(&chain(1), TOKEN).await.unwrap();
        assert_eq!(account.balance, U256::from(5));
    }

    #[tokio::test]
    async fn test_corrupt_state_is_not_fatal() {
        let store = Arc::new(MemoryStateStore::default());
        store
            .put("gascope_fork_state_1", b"not a state".to_vec())
            .await
            .unwrap();
        let manager = manager(Arc::new(FakeForkFactory::new(100)), store);

        let account = manager.read_account(&chain(1), TOKEN).await.unwrap();
        assert_eq!(account.balance, U256::ZERO);
    }

    #[tokio::test]
    async fn test_reset_only_affects_one_chain() {
        let factory = Arc::new(FakeForkFactory::new(100));
        let store = Arc::new(MemoryStateStore::default());
        let manager = manager(factory.clone(), store.clone());

        for id in [1, 10] {
            let mut fork = manager.acquire(&chain(id)).await.unwrap();
            fork.execute(mint(7)).await.unwrap();
            manager.persist(&fork).await.unwrap();
        }

        factory.set_head(150);
        let info = manager.reset(&chain(1)).await.unwrap();
        assert_eq!(info.fork_block, 150);

        let reset = manager.read_account(&chain(1), TOKEN).await.unwrap();
        let untouched = manager.read_account(&chain(10), TOKEN).await.unwrap();
        assert_eq!(reset.balance, U256::ZERO);
        assert_eq!(untouched.balance, U256::from(7));
        assert!(store.get("gascope_fork_state_1").await.unwrap().is_none());
        assert!(store.get("gascope_fork_state_10").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reset_waits_for_in_flight_call() {
        let factory = Arc::new(FakeForkFactory::with_template(
            FakeFork::new(0, 100).with_execute_delay(Duration::from_millis(50)),
            100,
        ));
        let manager = manager(factory, Arc::default());
        let chain = chain(1);
        manager.acquire(&chain).await.unwrap();

        let call = async {
            let mut fork = manager.acquire(&chain).await.unwrap();
            fork.execute(mint(3)).await.unwrap();
        };
        let reset = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            manager.reset(&chain).await.unwrap();
        };
        tokio::join!(call, reset);

        // the call completed before the reset discarded its state
        let account = manager.read_account(&chain, TOKEN).await.unwrap();
        assert_eq!(account.balance, U256::ZERO);
    }

    #[tokio::test]
    async fn test_failed_reset_keeps_persisted_state() {
        let factory = Arc::new(FakeForkFactory::new(100));
        let store = Arc::new(MemoryStateStore::default());
        let manager = manager(factory.clone(), store.clone());
        {
            let mut fork = manager.acquire(&chain(1)).await.unwrap();
            fork.execute(mint(2)).await.unwrap();
            manager.persist(&fork).await.unwrap();
        }

        factory.set_reachable(false);
        assert!(manager.reset(&chain(1)).await.is_err());
        assert!(store.get("gascope_fork_state_1").await.unwrap().is_some());

        factory.set_reachable(true);
        let account = manager.read_account(&chain(1), TOKEN).await.unwrap();
        assert_eq!(account.balance, U256::from(2));
        assert_eq!(factory.created(), 2);
    }
}
