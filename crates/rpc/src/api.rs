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

use std::sync::Arc;

use axum::{
    extract::{FromRequest, State},
    Json,
};
use gascope_sim::{
    ForkInfo, LocalEstimateParams, SimulateParams, SimulationEngine, SimulationResult,
};
use gascope_types::{GasFeesConfig, PriorityFees};
use tracing::instrument;

use crate::{
    error::{ApiError, EstimateError, GasFeesError},
    types::{
        AccountRequest, AccountView, ChainRequest, GasFeesData, GasFeesRequest, GasFeesResponse,
        HealthResponse, LocalEstimateRequest, LocalEstimateResponse, PriorityFeesRequest,
        SimulateRequest,
    },
};

type ApiResult<T> = Result<Json<T>, ApiError>;

/// JSON body whose rejections are reported as [`ApiError::InvalidRequest`]
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub(crate) struct ApiJson<T>(pub(crate) T);

#[instrument(skip_all)]
pub(crate) async fn local_chain_estimate(
    State(engine): State<Arc<SimulationEngine>>,
    request: Result<ApiJson<LocalEstimateRequest>, ApiError>,
) -> Result<Json<LocalEstimateResponse>, EstimateError> {
    let ApiJson(request) = request?;
    let outcome = engine
        .local_chain_estimate(LocalEstimateParams {
            fork_url: request.fork_url,
            from: request.from,
            to: request.target_contract,
            data: request.encoded_data,
            value: request.value,
            kind: request.kind,
        })
        .await?;
    Ok(Json(LocalEstimateResponse {
        status: outcome.status,
        gas_used: outcome.gas_used.to_string(),
        errors: outcome.errors,
    }))
}

#[instrument(skip_all)]
pub(crate) async fn gas_fees(
    State(engine): State<Arc<SimulationEngine>>,
    request: Result<ApiJson<GasFeesRequest>, ApiError>,
) -> Result<Json<GasFeesResponse>, GasFeesError> {
    let ApiJson(request) = request?;
    request.validate().map_err(ApiError::InvalidRequest)?;
    let spec = &engine.chain(request.chain_id)?.spec;
    let history = engine
        .fee_history(
            request.chain_id,
            request.block_count,
            &request.reward_percentiles,
        )
        .await?;
    let data = GasFeesData::new(spec, &history).map_err(anyhow::Error::from)?;
    Ok(Json(GasFeesResponse {
        status: 200,
        data: Some(data),
        error: None,
    }))
}

#[instrument(skip_all)]
pub(crate) async fn simulate(
    State(engine): State<Arc<SimulationEngine>>,
    ApiJson(request): ApiJson<SimulateRequest>,
) -> ApiResult<SimulationResult> {
    let result = engine
        .simulate(SimulateParams {
            chain_id: request.chain_id,
            call: request.call,
            native_token_price: request.native_token_price,
            priority_fee: request.priority_fee,
        })
        .await?;
    Ok(Json(result))
}

pub(crate) async fn fee_config(
    State(engine): State<Arc<SimulationEngine>>,
    ApiJson(request): ApiJson<ChainRequest>,
) -> ApiResult<GasFeesConfig> {
    Ok(Json(engine.fee_config(request.chain_id).await?))
}

pub(crate) async fn priority_fees(
    State(engine): State<Arc<SimulationEngine>>,
    ApiJson(request): ApiJson<PriorityFeesRequest>,
) -> ApiResult<PriorityFees> {
    Ok(Json(
        engine
            .priority_fees(request.chain_id, request.base_fee)
            .await?,
    ))
}

#[instrument(skip_all)]
pub(crate) async fn fork_reset(
    State(engine): State<Arc<SimulationEngine>>,
    ApiJson(request): ApiJson<ChainRequest>,
) -> ApiResult<ForkInfo> {
    Ok(Json(engine.reset(request.chain_id).await?))
}

pub(crate) async fn fork_account(
    State(engine): State<Arc<SimulationEngine>>,
    ApiJson(request): ApiJson<AccountRequest>,
) -> ApiResult<AccountView> {
    let account = engine
        .read_account(request.chain_id, request.address)
        .await?;
    Ok(Json(account.into()))
}

pub(crate) async fn health(State(engine): State<Arc<SimulationEngine>>) -> Json<HealthResponse> {
    let mut chains = engine.chains().iter().map(|c| c.spec.id).collect::<Vec<_>>();
    chains.sort_unstable();
    Json(HealthResponse {
        status: "ok",
        chains,
    })
}
