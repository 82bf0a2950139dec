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

use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use futures::future::try_join_all;
use gascope_sim::{Chains, FeeHistoryAnalyzer};

use super::CommonArgs;

/// CLI options for the fees command
#[derive(Args, Debug)]
pub struct FeesCliArgs {
    /// Only analyze this chain
    #[arg(long = "chain_id", name = "chain_id")]
    chain_id: Option<u64>,
}

/// Analyze the fee history of the selected chains and print the snapshots as JSON
pub async fn run(args: FeesCliArgs, common: CommonArgs, chains: Arc<Chains>) -> anyhow::Result<()> {
    let analyzer = FeeHistoryAnalyzer::new((&common).try_into()?);

    let mut selected = chains
        .iter()
        .filter(|chain| args.chain_id.map_or(true, |id| chain.spec.id == id))
        .collect::<Vec<_>>();
    if let Some(id) = args.chain_id {
        anyhow::ensure!(!selected.is_empty(), "chain {id} is not configured");
    }
    selected.sort_by_key(|chain| chain.spec.id);

    let configs = try_join_all(selected.into_iter().map(|chain| {
        let analyzer = &analyzer;
        async move {
            analyzer
                .analyze(chain)
                .await
                .with_context(|| format!("failed to analyze fees of chain {}", chain.spec.id))
        }
    }))
    .await?;

    println!("{}", serde_json::to_string_pretty(&configs)?);
    Ok(())
}
