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

use std::{path::Path, str::FromStr, sync::Arc, time::Duration};

use alloy_primitives::Bytes;
use anyhow::{ensure, Context};
use clap::{builder::PossibleValuesParser, Args, Parser, Subcommand};

mod chain_spec;
mod fees;
mod metrics;
mod server;
mod tracing;

use fees::FeesCliArgs;
use gascope_provider::{
    new_alloy_evm_provider, AnvilForkFactory, EvmProvider, FileStateStore, MemoryStateStore,
    StateStore,
};
use gascope_sim::{
    Chain, Chains, EngineSettings, FeeCache, FeeHistoryAnalyzer, FeeHistorySettings,
    ForkSettings, L1FeeSettings, SimulationEngine,
};
use gascope_types::chain::ChainSpec;
use server::ServerCliArgs;

/// Main entry point for the CLI
///
/// Parses the CLI arguments and runs the appropriate subcommand.
pub async fn run() -> anyhow::Result<()> {
    let opt = Cli::parse();
    let _guard = tracing::configure_logging(&opt.logs)?;
    tracing::info!("Parsed CLI options: {:#?}", opt);

    let metrics_addr = format!("{}:{}", opt.metrics.host, opt.metrics.port).parse()?;
    metrics::initialize(metrics_addr, &opt.metrics.tags, &opt.metrics.buckets)
        .context("metrics server should start")?;

    let specs =
        chain_spec::resolve_chain_specs(&opt.common.networks, opt.common.chain_spec.as_deref())?;
    for spec in &specs {
        tracing::info!("Chain spec: {:#?}", spec);
    }
    let chains = Arc::new(construct_chains(&opt.common, specs)?);

    match opt.command {
        Command::Server(args) => server::run(args, opt.common, chains).await?,
        Command::Fees(args) => fees::run(args, opt.common, chains).await?,
    }

    tracing::info!("Shutdown, goodbye");
    Ok(())
}

/// CLI commands
#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server
    ///
    /// Serves fee and simulation requests for every configured chain.
    #[command(name = "server")]
    Server(ServerCliArgs),

    /// Print the current fee configuration
    ///
    /// Analyzes the fee history of the configured chains once and prints the result as JSON.
    #[command(name = "fees")]
    Fees(FeesCliArgs),
}

/// CLI common options
#[derive(Debug, Args)]
#[command(next_help_heading = "Common")]
pub struct CommonArgs {
    /// Hardcoded networks to serve
    #[arg(
        long = "networks",
        name = "networks",
        env = "NETWORKS",
        value_delimiter = ',',
        default_values_t = Vec::<String>::new(),
        value_parser = PossibleValuesParser::new(chain_spec::HARDCODED_CHAIN_SPECS),
        global = true
    )]
    networks: Vec<String>,

    /// Chain spec file of an additional chain
    #[arg(
        long = "chain_spec",
        name = "chain_spec",
        env = "CHAIN_SPEC",
        global = true
    )]
    chain_spec: Option<String>,

    /// API key substituted into chain RPC url templates
    #[arg(
        long = "rpc_api_key",
        name = "rpc_api_key",
        env = "RPC_API_KEY",
        global = true,
        hide_env_values = true
    )]
    rpc_api_key: Option<String>,

    #[arg(
        long = "provider_client_timeout_seconds",
        name = "provider_client_timeout_seconds",
        env = "PROVIDER_CLIENT_TIMEOUT_SECONDS",
        default_value = "10",
        global = true
    )]
    provider_client_timeout_seconds: u64,

    /// Number of blocks in the fee history window
    #[arg(
        long = "fee_history.blocks",
        name = "fee_history.blocks",
        env = "FEE_HISTORY_BLOCKS",
        default_value = "1024",
        global = true
    )]
    fee_history_blocks: u64,

    /// Low, mid and high reward percentiles
    #[arg(
        long = "fee_history.percentiles",
        name = "fee_history.percentiles",
        env = "FEE_HISTORY_PERCENTILES",
        value_delimiter = ',',
        default_values_t = vec![30.0, 60.0, 90.0],
        global = true
    )]
    fee_history_percentiles: Vec<f64>,

    /// Cached fee snapshots older than this are refreshed on demand
    #[arg(
        long = "fee_history.max_age_seconds",
        name = "fee_history.max_age_seconds",
        env = "FEE_HISTORY_MAX_AGE_SECONDS",
        default_value = "12",
        global = true
    )]
    fee_max_age_seconds: u64,

    /// Directory persisted fork state is written to
    ///
    /// If not provided, fork state is kept in memory and lost on restart.
    #[arg(
        long = "fork.state_dir",
        name = "fork.state_dir",
        env = "FORK_STATE_DIR",
        global = true
    )]
    fork_state_dir: Option<String>,

    #[arg(
        long = "fork.state_key_prefix",
        name = "fork.state_key_prefix",
        env = "FORK_STATE_KEY_PREFIX",
        default_value = "gascope_fork_state",
        global = true
    )]
    fork_state_key_prefix: String,

    /// Path to the anvil binary, defaults to `anvil` on the path
    #[arg(
        long = "fork.anvil_path",
        name = "fork.anvil_path",
        env = "FORK_ANVIL_PATH",
        global = true
    )]
    fork_anvil_path: Option<String>,

    /// Upper bound on starting a fork
    #[arg(
        long = "fork.timeout_seconds",
        name = "fork.timeout_seconds",
        env = "FORK_TIMEOUT_SECONDS",
        default_value = "60",
        global = true
    )]
    fork_timeout_seconds: u64,

    /// Hex encoded runtime bytecode of the OP gas price oracle, injected when a fork lacks it
    #[arg(
        long = "l1_fee.gas_price_oracle_code",
        name = "l1_fee.gas_price_oracle_code",
        env = "L1_FEE_GAS_PRICE_ORACLE_CODE",
        global = true
    )]
    gas_price_oracle_code: Option<String>,

    /// Hex encoded runtime bytecode of the OP L1 attributes contract, injected when a fork
    /// lacks it
    #[arg(
        long = "l1_fee.l1_block_code",
        name = "l1_fee.l1_block_code",
        env = "L1_FEE_L1_BLOCK_CODE",
        global = true
    )]
    l1_block_code: Option<String>,
}

impl TryFrom<&CommonArgs> for FeeHistorySettings {
    type Error = anyhow::Error;

    fn try_from(value: &CommonArgs) -> Result<Self, Self::Error> {
        ensure!(
            (1..=1024).contains(&value.fee_history_blocks),
            "fee_history.blocks must be between 1 and 1024"
        );
        let percentiles: [f64; 3] = value
            .fee_history_percentiles
            .as_slice()
            .try_into()
            .context("fee_history.percentiles must contain exactly three values")?;
        ensure!(
            percentiles.iter().all(|p| (0.0..=100.0).contains(p))
                && percentiles.windows(2).all(|w| w[0] <= w[1]),
            "fee_history.percentiles must be ascending values between 0 and 100"
        );
        Ok(Self {
            blocks: value.fee_history_blocks,
            percentiles,
        })
    }
}

impl TryFrom<&CommonArgs> for EngineSettings {
    type Error = anyhow::Error;

    fn try_from(value: &CommonArgs) -> Result<Self, Self::Error> {
        let fork_timeout = Duration::from_secs(value.fork_timeout_seconds);
        Ok(Self {
            fee_max_age: Duration::from_secs(value.fee_max_age_seconds),
            local_fork_timeout: fork_timeout,
            fork: ForkSettings {
                state_key_prefix: value.fork_state_key_prefix.clone(),
                create_timeout: fork_timeout,
            },
            l1_fee: L1FeeSettings {
                gas_price_oracle_code: value
                    .gas_price_oracle_code
                    .as_deref()
                    .map(read_bytecode)
                    .transpose()?,
                l1_block_code: value.l1_block_code.as_deref().map(read_bytecode).transpose()?,
                create_timeout: fork_timeout,
            },
        })
    }
}

fn read_bytecode(path: &str) -> anyhow::Result<Bytes> {
    let contents = std::fs::read_to_string(Path::new(path))
        .with_context(|| format!("failed to read bytecode file {path}"))?;
    Bytes::from_str(contents.trim()).with_context(|| format!("invalid hex bytecode in {path}"))
}

fn construct_chains(common: &CommonArgs, specs: Vec<ChainSpec>) -> anyhow::Result<Chains> {
    let api_key = common.rpc_api_key.as_deref();
    let timeout = common.provider_client_timeout_seconds;
    let chains = specs
        .into_iter()
        .map(|spec| {
            let rpc_url = spec.rpc_url(api_key)?;
            let provider: Arc<dyn EvmProvider> =
                Arc::new(new_alloy_evm_provider(rpc_url.clone(), timeout));
            let underlying = spec
                .underlying
                .as_ref()
                .map(|underlying| -> anyhow::Result<Arc<dyn EvmProvider>> {
                    Ok(Arc::new(new_alloy_evm_provider(
                        underlying.rpc_url(api_key)?,
                        timeout,
                    )))
                })
                .transpose()?;
            Ok(Chain {
                spec,
                rpc_url,
                provider,
                underlying,
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(Chains::new(chains))
}

fn construct_engine(
    common: &CommonArgs,
    chains: Arc<Chains>,
    fee_cache: Arc<FeeCache>,
) -> anyhow::Result<SimulationEngine> {
    let settings = EngineSettings::try_from(common)?;
    let analyzer = FeeHistoryAnalyzer::new(common.try_into()?);

    let mut factory = AnvilForkFactory::new(settings.fork.create_timeout);
    if let Some(path) = &common.fork_anvil_path {
        factory = factory.with_anvil_path(path);
    }
    let store: Arc<dyn StateStore> = match &common.fork_state_dir {
        Some(dir) => Arc::new(FileStateStore::new(dir)),
        None => Arc::new(MemoryStateStore::default()),
    };

    Ok(SimulationEngine::new(
        chains,
        Arc::new(factory),
        store,
        analyzer,
        fee_cache,
        settings,
    ))
}

/// CLI options for the metrics server
#[derive(Debug, Args)]
#[command(next_help_heading = "Metrics")]
pub struct MetricsArgs {
    /// Port to listen on for metrics requests
    #[arg(
        long = "metrics.port",
        name = "metrics.port",
        env = "METRICS_PORT",
        default_value = "8080",
        global = true
    )]
    port: u16,

    /// Host to listen on for metrics requests
    #[arg(
        long = "metrics.host",
        name = "metrics.host",
        env = "METRICS_HOST",
        default_value = "0.0.0.0",
        global = true
    )]
    host: String,

    /// Tags for metrics
    ///
    /// Format: key1=value1,key2=value2,...
    #[arg(
        long = "metrics.tags",
        name = "metrics.tags",
        env = "METRICS_TAGS",
        default_values_t = Vec::<String>::new(),
        value_delimiter = ',',
        global = true
    )]
    tags: Vec<String>,

    /// Buckets for histogram metrics, in milliseconds
    #[arg(
        long = "metrics.histogram_buckets",
        name = "metrics.histogram_buckets",
        env = "METRICS_HISTOGRAM_BUCKETS",
        value_delimiter = ',',
        default_values_t = vec![
            1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0,
            1000.0, 2500.0, 5000.0, 10000.0, 30000.0, 60000.0,
        ],
        global = true
    )]
    buckets: Vec<f64>,
}

/// CLI options for logging
#[derive(Debug, Args)]
#[command(next_help_heading = "Logging")]
pub struct LogsArgs {
    /// Log file
    ///
    /// If not provided, logs will be written to stdout
    #[arg(
        long = "log.file",
        name = "log.file",
        env = "LOG_FILE",
        default_value = None,
        global = true
    )]
    file: Option<String>,

    /// Log JSON
    ///
    /// If set, logs will be written in JSON format
    #[arg(
        long = "log.json",
        name = "log.json",
        env = "LOG_JSON",
        required = false,
        num_args = 0,
        global = true
    )]
    json: bool,
}

/// CLI options
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    #[clap(subcommand)]
    command: Command,

    #[clap(flatten)]
    common: CommonArgs,

    #[clap(flatten)]
    metrics: MetricsArgs,

    #[clap(flatten)]
    logs: LogsArgs,
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("gascope").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["server", "--networks", "ethereum,optimism"]);
        assert!(matches!(cli.command, Command::Server(_)));
        assert_eq!(cli.common.networks, vec!["ethereum", "optimism"]);

        let fee_settings = FeeHistorySettings::try_from(&cli.common).unwrap();
        assert_eq!(fee_settings.blocks, 1024);
        assert_eq!(fee_settings.percentiles, [30.0, 60.0, 90.0]);

        let settings = EngineSettings::try_from(&cli.common).unwrap();
        assert_eq!(settings.fee_max_age, Duration::from_secs(12));
        assert_eq!(settings.fork.state_key_prefix, "gascope_fork_state");
        assert!(settings.l1_fee.gas_price_oracle_code.is_none());
    }

    #[test]
    fn test_unknown_network_rejected() {
        assert!(Cli::try_parse_from(["gascope", "server", "--networks", "dogechain"]).is_err());
    }

    #[test]
    fn test_invalid_percentiles() {
        let cli = parse(&["fees", "--fee_history.percentiles", "30,60"]);
        assert!(FeeHistorySettings::try_from(&cli.common).is_err());

        let cli = parse(&["fees", "--fee_history.percentiles", "90,60,30"]);
        assert!(FeeHistorySettings::try_from(&cli.common).is_err());

        let cli = parse(&["fees", "--fee_history.blocks", "2000"]);
        assert!(FeeHistorySettings::try_from(&cli.common).is_err());
    }

    #[test]
    fn test_read_bytecode() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0x6080604052").unwrap();
        let cli = parse(&[
            "server",
            "--l1_fee.gas_price_oracle_code",
            file.path().to_str().unwrap(),
        ]);
        let settings = EngineSettings::try_from(&cli.common).unwrap();
        assert_eq!(
            settings.l1_fee.gas_price_oracle_code.unwrap(),
            Bytes::from_static(&[0x60, 0x80, 0x60, 0x40, 0x52])
        );

        let cli = parse(&["server", "--l1_fee.l1_block_code", "/nonexistent/code.hex"]);
        assert!(EngineSettings::try_from(&cli.common).is_err());
    }

    #[test]
    fn test_construct_chains_requires_api_key() {
        let cli = parse(&["server"]);
        let spec = chain_spec::resolve_chain_spec(Some("base"), None, "GASCOPE_TEST_UNSET")
            .unwrap();
        assert!(construct_chains(&cli.common, vec![spec.clone()]).is_err());

        let cli = parse(&["server", "--rpc_api_key", "key"]);
        let chains = construct_chains(&cli.common, vec![spec]).unwrap();
        let chain = chains.get(8453).unwrap();
        assert!(chain.rpc_url.as_str().ends_with("/key"));
        assert!(chain.underlying.is_some());
    }
}
