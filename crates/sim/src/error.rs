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

use alloy_primitives::Address;
use gascope_provider::ProviderError;

/// Errors acquiring or resetting a forked chain
#[derive(Debug, thiserror::Error)]
pub enum ForkError {
    /// The chain's RPC endpoint could not be forked
    #[error("fork of chain {chain_id} unavailable: {reason}")]
    ForkUnavailable {
        /// Chain that could not be forked
        chain_id: u64,
        /// Underlying failure
        reason: String,
    },
    /// Saving or restoring fork state failed
    #[error("fork state persistence failed: {0}")]
    Persistence(String),
}

impl ForkError {
    pub(crate) fn unavailable(chain_id: u64, reason: impl ToString) -> Self {
        Self::ForkUnavailable {
            chain_id,
            reason: reason.to_string(),
        }
    }
}

/// Errors fetching fee history
#[derive(Debug, thiserror::Error)]
pub enum FeeError {
    /// The chain returned no usable fee history
    #[error("fee history unavailable: {0}")]
    FeeHistoryUnavailable(String),
    /// Provider error
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Errors that terminate a simulation request.
///
/// Execution failures and reverts are not errors, they are reported in the call outcome.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    /// The fork could not be acquired
    #[error(transparent)]
    Fork(#[from] ForkError),
    /// The request cannot be served as submitted
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Fee inputs could not be fetched
    #[error(transparent)]
    Fee(#[from] FeeError),
}

/// Errors of the L1 submission fee pipeline, one per step
#[derive(Debug, thiserror::Error)]
pub enum L1FeeError {
    /// The rollup's fee snapshot carries no fees of its underlying chain
    #[error("fees of the underlying chain of {0} unavailable")]
    MissingUnderlyingFees(u64),
    /// The throwaway L1 client could not be created
    #[error("L1 client unavailable: {0}")]
    ClientUnavailable(String),
    /// An oracle is absent and no bytecode is configured for it
    #[error("no bytecode available for oracle at {0}")]
    MissingBytecode(Address),
    /// Injecting the oracle contracts failed
    #[error("failed to ensure oracle contracts: {0}")]
    EnsureOracles(String),
    /// Reading the fee scalars from the gas price oracle failed
    #[error("failed to read fee scalars: {0}")]
    ReadScalars(String),
    /// The L1 attributes system call failed
    #[error("failed to set L1 block values: {0}")]
    SetBlockValues(String),
    /// Activating Ecotone failed
    #[error("failed to activate ecotone: {0}")]
    ActivateEcotone(String),
    /// The gas price oracle did not return an L1 fee
    #[error("failed to get L1 fee: {0}")]
    GetL1Fee(String),
}
