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

//! Latest fee snapshot per chain and the task keeping it current.

use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::join_all;
use gascope_types::GasFeesConfig;
use gascope_utils::task::Task;
use metrics::Counter;
use metrics_derive::Metrics;
use parking_lot::{Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{Chains, FeeHistoryAnalyzer};

/// Latest [`GasFeesConfig`] per chain. Snapshots are replaced wholesale.
#[derive(Debug, Default)]
pub struct FeeCache {
    entries: RwLock<HashMap<u64, GasFeesConfig>>,
    refreshing: Mutex<HashMap<u64, Arc<tokio::sync::Mutex<()>>>>,
}

impl FeeCache {
    /// Latest snapshot for the chain, regardless of age
    pub fn get(&self, chain_id: u64) -> Option<GasFeesConfig> {
        self.entries.read().get(&chain_id).cloned()
    }

    /// Latest snapshot for the chain if it was taken less than `max_age` ago
    pub fn get_fresh(&self, chain_id: u64, max_age: Duration) -> Option<GasFeesConfig> {
        self.get(chain_id).filter(|config| {
            Utc::now()
                .signed_duration_since(config.fetched_at)
                .to_std()
                .map_or(true, |age| age < max_age)
        })
    }

    /// Replace the snapshot of the config's chain
    pub fn insert(&self, config: GasFeesConfig) {
        self.entries.write().insert(config.chain_id, config);
    }

    /// Fresh snapshot for the chain, taken with `refresh` if the cached one is missing or
    /// stale.
    ///
    /// At most one refresh per chain runs at a time, callers arriving during a refresh wait
    /// for it and share its snapshot. A failed refresh leaves the cache unchanged.
    pub async fn get_or_refresh<F, Fut, E>(
        &self,
        chain_id: u64,
        max_age: Duration,
        refresh: F,
    ) -> Result<GasFeesConfig, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<GasFeesConfig, E>>,
    {
        if let Some(config) = self.get_fresh(chain_id, max_age) {
            return Ok(config);
        }

        let lock = self.refreshing.lock().entry(chain_id).or_default().clone();
        let _guard = lock.lock().await;
        // refreshed while waiting
        if let Some(config) = self.get_fresh(chain_id, max_age) {
            return Ok(config);
        }

        let config = refresh().await?;
        self.insert(config.clone());
        Ok(config)
    }
}

#[derive(Metrics)]
#[metrics(scope = "fee_refresh")]
struct FeeRefreshMetrics {
    #[metric(describe = "the number of fee snapshots refreshed.")]
    refreshes: Counter,
    #[metric(describe = "the number of failed fee refreshes.")]
    failures: Counter,
}

/// Periodically refreshes the fee snapshot of every configured chain
pub struct FeeRefreshTask {
    chains: Arc<Chains>,
    analyzer: FeeHistoryAnalyzer,
    cache: Arc<FeeCache>,
    interval: Duration,
    metrics: FeeRefreshMetrics,
}

#[async_trait]
impl Task for FeeRefreshTask {
    async fn run(self: Box<Self>, shutdown_token: CancellationToken) -> anyhow::Result<()> {
        info!("Starting fee refresh task, interval {:?}", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.refresh_all().await,
                _ = shutdown_token.cancelled() => {
                    info!("Shutting down fee refresh task");
                    return Ok(());
                }
            }
        }
    }
}

impl FeeRefreshTask {
    /// Create a new task
    pub fn new(
        chains: Arc<Chains>,
        analyzer: FeeHistoryAnalyzer,
        cache: Arc<FeeCache>,
        interval: Duration,
    ) -> Self {
        Self {
            chains,
            analyzer,
            cache,
            interval,
            metrics: FeeRefreshMetrics::default(),
        }
    }

    /// Boxed for [`gascope_utils::task::spawn_tasks_with_shutdown`]
    pub fn boxed(self) -> Box<dyn Task> {
        Box::new(self)
    }

    /// Refresh all chains concurrently. A failed refresh keeps the previous snapshot.
    pub async fn refresh_all(&self) {
        join_all(self.chains.iter().map(|chain| async move {
            match self.analyzer.analyze(chain).await {
                Ok(config) => {
                    debug!(
                        "refreshed fees of chain {}: base fee {}",
                        config.chain_id, config.next_base_fee
                    );
                    self.metrics.refreshes.increment(1);
                    self.cache.insert(config);
                }
                Err(e) => {
                    self.metrics.failures.increment(1);
                    warn!("failed to refresh fees of chain {}: {e}", chain.spec.id);
                }
            }
        }))
        .await;
    }
}
