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

use anyhow::{bail, ensure, Context};
use config::{Config, Environment, File, FileFormat};
use gascope_types::chain::{ChainSpec, RollupStack};
use itertools::Itertools;
use paste::paste;

const ENV_PREFIX: &str = "CHAIN";

/// Resolve every configured chain: one per hardcoded network and one for the spec file.
///
/// Each network can be overridden from the environment with `CHAIN_<NETWORK>_` variables, the
/// spec file with `CHAIN_` variables.
pub fn resolve_chain_specs(
    networks: &[String],
    file: Option<&str>,
) -> anyhow::Result<Vec<ChainSpec>> {
    let mut specs = networks
        .iter()
        .map(|network| {
            let network = network.to_lowercase();
            let prefix = format!("{ENV_PREFIX}_{}", network.to_uppercase());
            resolve_chain_spec(Some(&network), None, &prefix)
                .with_context(|| format!("failed to resolve network {network}"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    if let Some(file) = file {
        specs.push(
            resolve_chain_spec(None, Some(file), ENV_PREFIX)
                .with_context(|| format!("failed to resolve chain spec {file}"))?,
        );
    }

    ensure!(
        !specs.is_empty(),
        "at least one network or a chain spec file must be provided"
    );
    if let Some(id) = specs.iter().map(|s| s.id).duplicates().next() {
        bail!("chain id {id} is configured more than once");
    }
    Ok(specs)
}

/// Resolve a single chain spec from a hardcoded network and/or a chain spec file
pub fn resolve_chain_spec(
    network: Option<&str>,
    file: Option<&str>,
    env_prefix: &str,
) -> anyhow::Result<ChainSpec> {
    // the base network is looked up from the hierarchy of
    // - ENV
    // - file
    // - network
    let mut base_getter = Config::builder();
    if let Some(network) = network {
        base_getter = base_getter
            .add_source(File::from_str(hardcoded_spec(network)?, FileFormat::Toml));
    }
    if let Some(file) = file {
        base_getter = base_getter.add_source(File::with_name(file));
    }
    let base_config = base_getter
        .add_source(Environment::with_prefix(env_prefix))
        .build()
        .context("failed to build base chain config")?;
    let base = base_config.get::<String>("base").ok();

    // the spec is constructed from the hierarchy of
    // - ENV
    // - file
    // - network
    // - base (if defined)
    // - defaults
    let default = serde_json::to_string(&ChainSpec::default())?;
    let mut config_builder =
        Config::builder().add_source(File::from_str(default.as_str(), FileFormat::Json));
    if let Some(base) = base {
        config_builder = config_builder
            .add_source(File::from_str(hardcoded_spec(&base)?, FileFormat::Toml));
    }
    if let Some(network) = network {
        config_builder = config_builder
            .add_source(File::from_str(hardcoded_spec(network)?, FileFormat::Toml));
    }
    if let Some(file) = file {
        config_builder = config_builder.add_source(File::with_name(file));
    }
    let spec: ChainSpec = config_builder
        .add_source(Environment::with_prefix(env_prefix))
        .build()
        .context("failed to build chain config")?
        .try_deserialize()
        .context("failed to deserialize chain spec")?;

    validate(&spec)?;
    Ok(spec)
}

fn validate(spec: &ChainSpec) -> anyhow::Result<()> {
    ensure!(spec.id != 0, "chain {} must define a non-zero id", spec.name);
    ensure!(
        !spec.rpc_url_template.is_empty(),
        "chain {} must define an rpc url",
        spec.name
    );
    ensure!(
        spec.avg_block_time_millis > 0,
        "chain {} must define a non-zero block time",
        spec.name
    );
    match (&spec.rollup_stack, &spec.underlying) {
        (RollupStack::None, Some(_)) => {
            bail!("chain {} has an underlying chain but no rollup stack", spec.name)
        }
        (RollupStack::OpStack, None) => {
            bail!("op-stack chain {} must define its underlying chain", spec.name)
        }
        (_, Some(underlying)) => validate(underlying),
        _ => Ok(()),
    }
}

fn hardcoded_spec(network: &str) -> anyhow::Result<&'static str> {
    get_hardcoded_chain_spec(network)
        .with_context(|| format!("unknown hardcoded network: {network}"))
}

macro_rules! define_hardcoded_chain_specs {
    ($($network:ident),+) => {
        paste! {
            $(
                const [< $network:upper _SPEC >]: &str = include_str!(concat!("../../chain_specs/", stringify!($network), ".toml"));
            )+

            fn get_hardcoded_chain_spec(network: &str) -> Option<&'static str> {
                match network {
                    $(
                        stringify!($network) => Some([< $network:upper _SPEC >]),
                    )+
                    _ => None,
                }
            }

            pub const HARDCODED_CHAIN_SPECS: &[&'static str] = &[$(stringify!($network),)+];
        }
    };
}

define_hardcoded_chain_specs!(
    ethereum,
    ethereum_sepolia,
    optimism,
    optimism_sepolia,
    base,
    base_sepolia
);
