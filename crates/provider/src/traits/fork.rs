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

//! Traits for forked execution contexts.

use alloy_primitives::{Address, Bytes, U256};
use gascope_types::{CallError, SimulationLog};
#[cfg(feature = "test-utils")]
use mockall::automock;
use serde::{Deserialize, Serialize};
use url::Url;

use super::error::ProviderResult;

/// A call to execute against a forked chain
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionCall {
    /// Caller
    pub from: Address,
    /// Target
    pub to: Address,
    /// Calldata
    pub data: Bytes,
    /// Native value
    pub value: U256,
    /// Top up the caller before executing so the value can always be paid
    pub skip_balance: bool,
    /// Apply the state changes of a successful call to the fork
    pub commit: bool,
}

/// Result of executing a call against a forked chain
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Return data, or revert data if the call failed
    pub output: Bytes,
    /// Gas used
    pub gas_used: u64,
    /// Logs emitted by the call and its subcalls
    pub logs: Vec<SimulationLog>,
    /// Set if the call did not succeed
    pub error: Option<CallError>,
}

/// State of an account on a forked chain
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    /// Native balance
    pub balance: U256,
    /// Nonce
    pub nonce: u64,
    /// Deployed code
    pub code: Bytes,
}

/// A mutable execution sandbox forked from a live chain.
///
/// All calls against one fork extend a single linear history. Methods that mutate the
/// fork take `&mut self`, callers are expected to serialize access.
#[cfg_attr(feature = "test-utils", automock)]
#[async_trait::async_trait]
pub trait ForkedChain: Send + Sync {
    /// Id of the forked chain
    fn chain_id(&self) -> u64;

    /// Block the fork was created or last reset at
    fn fork_block(&self) -> u64;

    /// Execute a call. Execution level failures are reported in [`ExecutionResult::error`],
    /// the error variant is reserved for failures to reach the fork.
    async fn execute(&mut self, call: ExecutionCall) -> ProviderResult<ExecutionResult>;

    /// Read balance, nonce and code of an account
    async fn read_account(&self, address: Address) -> ProviderResult<AccountState>;

    /// Get the code at an address
    async fn get_code(&self, address: Address) -> ProviderResult<Bytes>;

    /// Replace the code at an address
    async fn set_code(&mut self, address: Address, code: Bytes) -> ProviderResult<()>;

    /// Call a read only function without touching the fork's state
    async fn call_static(&self, to: Address, data: Bytes) -> ProviderResult<Bytes>;

    /// Discard all accumulated state and re-fork at `block`, or at the chain head if `None`.
    ///
    /// Returns the new fork block.
    async fn reset(&mut self, block: Option<u64>) -> ProviderResult<u64>;

    /// Serialize the accumulated state of the fork
    async fn dump_state(&self) -> ProviderResult<Bytes>;

    /// Restore state previously produced by [`ForkedChain::dump_state`]
    async fn load_state(&mut self, state: Bytes) -> ProviderResult<()>;
}

/// Creates forked execution contexts
#[cfg_attr(feature = "test-utils", automock)]
#[async_trait::async_trait]
pub trait ForkFactory: Send + Sync {
    /// Fork `chain_id` from `rpc_url` at its current head
    async fn create(&self, chain_id: u64, rpc_url: Url) -> ProviderResult<Box<dyn ForkedChain>>;
}
