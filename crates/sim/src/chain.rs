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

use std::{collections::HashMap, fmt, sync::Arc};

use gascope_provider::EvmProvider;
use gascope_types::chain::ChainSpec;
use url::Url;

/// A configured chain together with RPC access to it and to the chain it settles to
#[derive(Clone)]
pub struct Chain {
    /// Chain specification
    pub spec: ChainSpec,
    /// Resolved RPC endpoint, used to fork the chain
    pub rpc_url: Url,
    /// Provider for the chain
    pub provider: Arc<dyn EvmProvider>,
    /// Provider for the underlying chain, set iff the spec has an underlying chain
    pub underlying: Option<Arc<dyn EvmProvider>>,
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("id", &self.spec.id)
            .field("name", &self.spec.name)
            .field("rpc_url", &self.rpc_url.host_str())
            .finish()
    }
}

/// Configured chains by id
#[derive(Clone, Debug, Default)]
pub struct Chains {
    chains: HashMap<u64, Chain>,
}

impl Chains {
    /// Create from a list of chains
    pub fn new(chains: impl IntoIterator<Item = Chain>) -> Self {
        Self {
            chains: chains.into_iter().map(|c| (c.spec.id, c)).collect(),
        }
    }

    /// Get a chain by id
    pub fn get(&self, chain_id: u64) -> Option<&Chain> {
        self.chains.get(&chain_id)
    }

    /// Iterate over all chains
    pub fn iter(&self) -> impl Iterator<Item = &Chain> {
        self.chains.values()
    }
}
