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

use std::time::Duration;

use alloy_primitives::Bytes;
use alloy_provider::{Provider as AlloyProvider, ProviderBuilder};
use alloy_rpc_client::ClientBuilder;
use alloy_transport::layers::RetryBackoffLayer;
use evm::AlloyEvmProvider;
use gascope_types::CallError;
use provider_timeout::ProviderTimeoutLayer;
use url::Url;

use crate::EvmProvider;

pub(crate) mod evm;
pub(crate) mod fork;
mod provider_timeout;

/// Create a new alloy evm provider from a given RPC URL
pub fn new_alloy_evm_provider(
    rpc_url: Url,
    provider_client_timeout_seconds: u64,
) -> impl EvmProvider + Clone {
    AlloyEvmProvider::new(new_alloy_provider(
        rpc_url,
        provider_client_timeout_seconds,
    ))
}

/// Create a new alloy provider from a given RPC URL
pub fn new_alloy_provider(
    rpc_url: Url,
    provider_client_timeout_seconds: u64,
) -> impl AlloyProvider + Clone {
    // TODO: make retry limits configurable per chain
    let retry_layer = RetryBackoffLayer::new(10, 500, 1_000_000);
    let timeout_layer =
        ProviderTimeoutLayer::new(Duration::from_secs(provider_client_timeout_seconds));
    let client = ClientBuilder::default()
        .layer(retry_layer)
        .layer(timeout_layer)
        .http(rpc_url);
    ProviderBuilder::new().connect_client(client)
}

/// Classify a free text execution error reported by a node.
///
/// Nodes only report reverts as messages, this is the single place where the message is
/// inspected to tell an EVM revert from any other failure.
pub fn classify_execution_error(message: &str, data: Option<Bytes>) -> CallError {
    if message.to_ascii_lowercase().contains("revert") {
        CallError::revert(message, data)
    } else {
        CallError::execution(message)
    }
}
