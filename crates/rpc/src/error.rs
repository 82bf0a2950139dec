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

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use gascope_sim::{ForkError, SimulationError};
use serde::Serialize;

use crate::types::GasFeesResponse;

/// Errors returned by the HTTP API
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request cannot be served as submitted
    #[error("{0}")]
    InvalidRequest(String),
    /// The chain endpoint could not be forked
    #[error("{0}")]
    ForkUnavailable(String),
    /// The request ran past the server's timeout
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// Anything else
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<SimulationError> for ApiError {
    fn from(err: SimulationError) -> Self {
        match err {
            SimulationError::InvalidRequest(message) => Self::InvalidRequest(message),
            SimulationError::Fork(err @ ForkError::ForkUnavailable { .. }) => {
                Self::ForkUnavailable(err.to_string())
            }
            err => Self::Internal(err.into()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidRequest(rejection.body_text())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::ForkUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "InvalidRequest",
            Self::ForkUnavailable(_) => "ForkUnavailable",
            Self::Timeout(_) => "Timeout",
            Self::Internal(_) => "InternalError",
        }
    }

    fn message(&self) -> String {
        if let Self::Internal(err) = self {
            tracing::error!("Internal error: {err:?}");
        }
        format!("{self:#}")
    }
}

#[derive(Serialize)]
struct ErrorBody {
    status: u16,
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            status: status.as_u16(),
            error: self.kind(),
            message: self.message(),
        };
        (status, Json(body)).into_response()
    }
}

/// Failure of `/local-chain-estimate`.
///
/// Every failure is answered with a 500, the kind of failure is carried in `error`.
#[derive(Debug)]
pub(crate) struct EstimateError(pub(crate) ApiError);

impl From<ApiError> for EstimateError {
    fn from(err: ApiError) -> Self {
        Self(err)
    }
}

impl IntoResponse for EstimateError {
    fn into_response(self) -> Response {
        let status = StatusCode::INTERNAL_SERVER_ERROR;
        let body = ErrorBody {
            status: status.as_u16(),
            error: self.0.kind(),
            message: self.0.message(),
        };
        (status, Json(body)).into_response()
    }
}

/// Failure of `/chain-query/gas-fees`, answered in the same envelope as a success with no
/// `data`
#[derive(Debug)]
pub(crate) struct GasFeesError(pub(crate) ApiError);

impl From<ApiError> for GasFeesError {
    fn from(err: ApiError) -> Self {
        Self(err)
    }
}

impl IntoResponse for GasFeesError {
    fn into_response(self) -> Response {
        let status = self.0.status();
        let body = GasFeesResponse {
            status: status.as_u16(),
            data: None,
            error: Some(self.0.message()),
        };
        (status, Json(body)).into_response()
    }
}

macro_rules! impl_from_via_api_error {
    ($wrapper:ty, $($source:ty),+) => {
        $(
            impl From<$source> for $wrapper {
                fn from(err: $source) -> Self {
                    Self(err.into())
                }
            }
        )+
    };
}

impl_from_via_api_error!(EstimateError, SimulationError, anyhow::Error);
impl_from_via_api_error!(GasFeesError, SimulationError, anyhow::Error);
