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

//! Simulation and fee estimation engine.
//!
//! Calls are simulated against one forked execution context per chain, priced with a fee
//! snapshot derived from the chain's fee history and, for rollups, the L1 data fee read
//! from the rollup's gas price oracle.

mod chain;
pub use chain::{Chain, Chains};

pub mod cost;

mod engine;
pub use engine::{
    EngineSettings, EstimateKind, LocalEstimateParams, SimulateParams, SimulationEngine,
    SimulationResult,
};

mod error;
pub use error::{FeeError, ForkError, L1FeeError, SimulationError};

mod fee_cache;
pub use fee_cache::{FeeCache, FeeRefreshTask};

pub mod fees;
pub use fees::{FeeHistoryAnalyzer, FeeHistorySettings};

mod fork;
pub use fork::{ForkGuard, ForkInfo, ForkManager, ForkSettings};

pub mod l1_fee;
pub use l1_fee::{L1FeeCalculator, L1FeeSettings};

mod simulator;
pub use simulator::{CallMode, CallSimulator, SimulatedCall};
