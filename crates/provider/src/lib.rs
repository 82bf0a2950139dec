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

#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]
#![doc(test(
    no_crate_inject,
    attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))
))]

//! Gascope providers
//! A provider is a type that provides access to chain data and to forked execution contexts

mod alloy;
pub use alloy::{
    classify_execution_error, evm::AlloyEvmProvider, fork::AnvilFork, fork::AnvilForkFactory,
    new_alloy_evm_provider, new_alloy_provider,
};

pub mod op;

mod store;
pub use store::{FileStateStore, MemoryStateStore};

mod traits;
pub use alloy_rpc_types_eth::{BlockNumberOrTag, FeeHistory};
#[cfg(any(test, feature = "test-utils"))]
pub use traits::test_utils::*;
pub use traits::*;
