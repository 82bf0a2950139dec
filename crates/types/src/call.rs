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

use alloy_json_abi::JsonAbi;
use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

use crate::serde_dec;

/// A call to simulate against a forked chain
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    /// Caller
    pub from: Address,
    /// Target contract
    pub to: Address,
    /// Call input, either a function of a known interface or raw calldata
    #[serde(flatten)]
    pub input: CallInput,
    /// Native value sent with the call
    #[serde(with = "serde_dec::u256_str", default)]
    pub value: U256,
    /// Top up the caller so that native balance checks cannot fail
    #[serde(default)]
    pub skip_balance: bool,
}

/// Input of a [`CallRequest`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CallInput {
    /// Call a function by name with string encoded arguments against a known interface
    #[serde(rename_all = "camelCase")]
    Function {
        /// Interface of the target
        abi: JsonAbi,
        /// Function name
        function: String,
        /// Arguments, one string per input parameter
        #[serde(default)]
        args: Vec<String>,
    },
    /// Raw encoded calldata
    Raw {
        /// Calldata
        data: Bytes,
    },
}

/// Status of a simulated call
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CallStatus {
    /// No errors
    Success,
    /// The EVM reverted
    Revert,
    /// Anything else went wrong
    Failure,
}

/// Kind of a [`CallError`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CallErrorKind {
    /// EVM level revert
    Revert,
    /// Unexpected failure while preparing or executing the call
    Execution,
}

/// Structured error attached to a [`CallOutcome`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallError {
    /// Kind of the error
    pub kind: CallErrorKind,
    /// Human readable message
    pub message: String,
    /// Raw revert data, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Bytes>,
}

impl CallError {
    /// An unexpected execution error
    pub fn execution(message: impl Into<String>) -> Self {
        Self {
            kind: CallErrorKind::Execution,
            message: message.into(),
            data: None,
        }
    }

    /// An EVM revert
    pub fn revert(message: impl Into<String>, data: Option<Bytes>) -> Self {
        Self {
            kind: CallErrorKind::Revert,
            message: message.into(),
            data,
        }
    }
}

/// Return data of a simulated call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum ReturnData {
    /// Undecoded output
    Raw(Bytes),
    /// Output decoded against the function's outputs
    Decoded(Vec<serde_json::Value>),
}

impl Default for ReturnData {
    fn default() -> Self {
        Self::Raw(Bytes::new())
    }
}

/// Log emitted by a simulated call
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationLog {
    /// Emitting contract
    pub address: Address,
    /// Log topics
    pub topics: Vec<B256>,
    /// Log data
    pub data: Bytes,
}

/// Uniform result of one simulated call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallOutcome {
    /// Status classified from `errors`
    pub status: CallStatus,
    /// Gas used by the call
    pub gas_used: u64,
    /// Return data
    pub data: ReturnData,
    /// Emitted logs
    pub logs: Vec<SimulationLog>,
    /// Errors, empty on success
    pub errors: Vec<CallError>,
}

impl CallOutcome {
    /// Build an outcome, classifying the status from the errors
    pub fn new(
        gas_used: u64,
        data: ReturnData,
        logs: Vec<SimulationLog>,
        errors: Vec<CallError>,
    ) -> Self {
        Self {
            status: Self::classify(&errors),
            gas_used,
            data,
            logs,
            errors,
        }
    }

    /// Outcome of a call that could not be executed at all
    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(
            0,
            ReturnData::default(),
            vec![],
            vec![CallError::execution(message)],
        )
    }

    /// `success` when there are no errors, `revert` when any error is an EVM revert,
    /// `failure` otherwise
    pub fn classify(errors: &[CallError]) -> CallStatus {
        if errors.is_empty() {
            CallStatus::Success
        } else if errors.iter().any(|e| e.kind == CallErrorKind::Revert) {
            CallStatus::Revert
        } else {
            CallStatus::Failure
        }
    }

    /// True if the call succeeded
    pub fn is_success(&self) -> bool {
        self.status == CallStatus::Success
    }
}
