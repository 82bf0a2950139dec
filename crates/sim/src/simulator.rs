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

//! Executes call requests against a fork and normalizes the results.

use alloy_dyn_abi::{DynSolType, DynSolValue, FunctionExt, JsonAbiExt, Specifier};
use alloy_json_abi::Function;
use alloy_primitives::{hex, Bytes};
use anyhow::{bail, Context};
use gascope_provider::{ExecutionCall, ExecutionResult, ForkedChain};
use gascope_types::{CallInput, CallOutcome, CallRequest, CallStatus, ReturnData};
use metrics::Counter;
use metrics_derive::Metrics;
use serde_json::Value;
use tracing::{instrument, warn};

/// A call input resolved and encoded once per request
#[derive(Clone, Debug, PartialEq)]
pub enum CallMode {
    /// A function whose outputs are decoded
    Typed {
        /// Function definition
        function: Function,
        /// Encoded calldata
        data: Bytes,
    },
    /// Calldata whose output is returned as is
    Raw(Bytes),
}

impl CallMode {
    /// Resolve a call input.
    ///
    /// Functions that declare outputs take the typed path, functions without outputs and raw
    /// calldata take the raw path.
    pub fn resolve(input: &CallInput) -> anyhow::Result<Self> {
        match input {
            CallInput::Raw { data } => Ok(Self::Raw(data.clone())),
            CallInput::Function {
                abi,
                function,
                args,
            } => {
                let function = abi
                    .function(function)
                    .and_then(|overloads| overloads.iter().find(|f| f.inputs.len() == args.len()))
                    .with_context(|| {
                        format!("function {function} with {} arguments not found", args.len())
                    })?;
                let data: Bytes = encode_input(function, args)?.into();
                if function.outputs.is_empty() {
                    Ok(Self::Raw(data))
                } else {
                    Ok(Self::Typed {
                        function: function.clone(),
                        data,
                    })
                }
            }
        }
    }

    /// Encoded calldata
    pub fn data(&self) -> &Bytes {
        match self {
            Self::Typed { data, .. } => data,
            Self::Raw(data) => data,
        }
    }
}

fn encode_input(function: &Function, args: &[String]) -> anyhow::Result<Vec<u8>> {
    let values = function
        .inputs
        .iter()
        .zip(args)
        .map(|(param, arg)| {
            let ty: DynSolType = param
                .resolve()
                .with_context(|| format!("unsupported parameter type {}", param.ty))?;
            ty.coerce_str(arg)
                .with_context(|| format!("invalid value {arg:?} for parameter {}", param.name))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(function.abi_encode_input(&values)?)
}

fn decode_output(function: &Function, output: &[u8]) -> anyhow::Result<Vec<Value>> {
    if output.is_empty() {
        bail!("empty output");
    }
    Ok(function
        .abi_decode_output(output)?
        .iter()
        .map(to_json)
        .collect())
}

fn to_json(value: &DynSolValue) -> Value {
    match value {
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::Int(i, _) => Value::String(i.to_string()),
        DynSolValue::Uint(u, _) => Value::String(u.to_string()),
        DynSolValue::FixedBytes(word, size) => Value::String(hex::encode_prefixed(&word[..*size])),
        DynSolValue::Address(address) => Value::String(address.to_checksum(None)),
        DynSolValue::Bytes(bytes) => Value::String(hex::encode_prefixed(bytes)),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Array(values)
        | DynSolValue::FixedArray(values)
        | DynSolValue::Tuple(values) => Value::Array(values.iter().map(to_json).collect()),
        other => Value::String(format!("{other:?}")),
    }
}

/// Result of simulating one request
#[derive(Clone, Debug)]
pub struct SimulatedCall {
    /// Encoded calldata, `None` if the request could not be encoded
    pub data: Option<Bytes>,
    /// Normalized outcome
    pub outcome: CallOutcome,
}

#[derive(Metrics)]
#[metrics(scope = "call_simulator")]
struct SimulatorMetrics {
    #[metric(describe = "the number of simulated calls that succeeded.")]
    success: Counter,
    #[metric(describe = "the number of simulated calls that reverted.")]
    revert: Counter,
    #[metric(describe = "the number of simulated calls that failed.")]
    failure: Counter,
}

/// Simulates call requests against a forked chain
#[derive(Default)]
pub struct CallSimulator {
    metrics: SimulatorMetrics,
}

impl CallSimulator {
    /// Simulate `request` against `fork`, applying its state changes if `commit` is set and
    /// the call succeeds.
    ///
    /// Never fails: encoding errors and errors reaching the fork become a `failure` outcome
    /// with zero gas used and a single error.
    #[instrument(skip_all, fields(chain_id = fork.chain_id(), to = ?request.to, commit = commit))]
    pub async fn simulate(
        &self,
        fork: &mut dyn ForkedChain,
        request: &CallRequest,
        commit: bool,
    ) -> SimulatedCall {
        let simulated = match CallMode::resolve(&request.input) {
            Ok(mode) => {
                let call = ExecutionCall {
                    from: request.from,
                    to: request.to,
                    data: mode.data().clone(),
                    value: request.value,
                    skip_balance: request.skip_balance,
                    commit,
                };
                let outcome = match fork.execute(call).await {
                    Ok(result) => normalize(&mode, result),
                    Err(e) => {
                        warn!("execution failed unexpectedly: {e:?}");
                        CallOutcome::failure(e.to_string())
                    }
                };
                SimulatedCall {
                    data: Some(mode.data().clone()),
                    outcome,
                }
            }
            Err(e) => SimulatedCall {
                data: None,
                outcome: CallOutcome::failure(format!("{e:#}")),
            },
        };

        match simulated.outcome.status {
            CallStatus::Success => self.metrics.success.increment(1),
            CallStatus::Revert => self.metrics.revert.increment(1),
            CallStatus::Failure => self.metrics.failure.increment(1),
        }
        simulated
    }
}

fn normalize(mode: &CallMode, result: ExecutionResult) -> CallOutcome {
    let errors = result.error.into_iter().collect::<Vec<_>>();
    let data = match mode {
        CallMode::Typed { function, .. } if errors.is_empty() => {
            match decode_output(function, &result.output) {
                Ok(values) => ReturnData::Decoded(values),
                Err(e) => {
                    warn!("could not decode output of {}: {e:#}", function.name);
                    ReturnData::Raw(result.output)
                }
            }
        }
        _ => ReturnData::Raw(result.output),
    };
    CallOutcome::new(result.gas_used, data, result.logs, errors)
}
