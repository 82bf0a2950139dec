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

use std::{sync::Arc, time::Duration};

use clap::Args;
use gascope_rpc::{RpcTask, RpcTaskArgs};
use gascope_sim::{Chains, FeeCache, FeeHistoryAnalyzer, FeeRefreshTask};
use gascope_utils::task::spawn_tasks_with_shutdown;

use super::CommonArgs;

/// CLI options for the HTTP server
#[derive(Args, Debug)]
#[command(next_help_heading = "Server")]
pub struct ServerArgs {
    /// Port to listen on for HTTP requests
    #[arg(
        long = "server.port",
        name = "server.port",
        env = "SERVER_PORT",
        default_value = "3000"
    )]
    port: u16,

    /// Host to listen on for HTTP requests
    #[arg(
        long = "server.host",
        name = "server.host",
        env = "SERVER_HOST",
        default_value = "0.0.0.0"
    )]
    host: String,

    /// Cors domains seperated by a comma, * is the wildcard
    ///
    /// # Examples
    ///.env
    /// ```env
    /// SERVER_CORSDOMAIN=*
    /// SERVER_CORSDOMAIN=https://site1.fake,https://sub.site1.fake
    /// ```
    #[arg(
        long = "server.corsdomain",
        name = "server.corsdomain",
        env = "SERVER_CORSDOMAIN",
        value_delimiter = ','
    )]
    corsdomain: Vec<String>,

    /// Timeout for HTTP requests
    #[arg(
        long = "server.request_timeout_seconds",
        name = "server.request_timeout_seconds",
        env = "SERVER_REQUEST_TIMEOUT_SECONDS",
        default_value = "120"
    )]
    request_timeout_seconds: u64,
}

impl ServerArgs {
    fn to_args(&self) -> RpcTaskArgs {
        RpcTaskArgs {
            port: self.port,
            host: self.host.clone(),
            cors_domains: self.corsdomain.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_seconds),
        }
    }
}

/// CLI options for the server command
#[derive(Args, Debug)]
pub struct ServerCliArgs {
    #[command(flatten)]
    server: ServerArgs,

    /// Interval between scheduled fee history refreshes
    #[arg(
        long = "fee_refresh_interval_seconds",
        name = "fee_refresh_interval_seconds",
        env = "FEE_REFRESH_INTERVAL_SECONDS",
        default_value = "12"
    )]
    fee_refresh_interval_seconds: u64,
}

/// Run the HTTP server and the fee refresh task until ctrl-c
pub async fn run(
    args: ServerCliArgs,
    common: CommonArgs,
    chains: Arc<Chains>,
) -> anyhow::Result<()> {
    let fee_cache = Arc::new(FeeCache::default());
    let engine = Arc::new(super::construct_engine(
        &common,
        chains.clone(),
        fee_cache.clone(),
    )?);
    let refresh = FeeRefreshTask::new(
        chains,
        FeeHistoryAnalyzer::new((&common).try_into()?),
        fee_cache,
        Duration::from_secs(args.fee_refresh_interval_seconds),
    );

    spawn_tasks_with_shutdown(
        [
            RpcTask::new(args.server.to_args(), engine).boxed(),
            refresh.boxed(),
        ],
        tokio::signal::ctrl_c(),
    )
    .await;
    Ok(())
}
