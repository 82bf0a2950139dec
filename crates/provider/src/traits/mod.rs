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

//! Traits for the provider module.

mod error;
pub use error::{ProviderError, ProviderResult};

mod evm;
#[cfg(feature = "test-utils")]
pub use evm::MockEvmProvider;
pub use evm::EvmProvider;

mod fork;
#[cfg(feature = "test-utils")]
pub use fork::{MockForkFactory, MockForkedChain};
pub use fork::{AccountState, ExecutionCall, ExecutionResult, ForkFactory, ForkedChain};

mod store;
pub use store::StateStore;

#[cfg(any(test, feature = "test-utils"))]
pub(crate) mod test_utils;
