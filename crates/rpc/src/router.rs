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

use std::{sync::Arc, time::Duration};

use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use gascope_sim::SimulationEngine;

use crate::{api, error::ApiError, metrics::track_requests};

/// Routes of the HTTP API
pub fn router(engine: Arc<SimulationEngine>) -> Router {
    Router::new()
        .route("/local-chain-estimate", post(api::local_chain_estimate))
        .route("/chain-query/gas-fees", post(api::gas_fees))
        .route("/chain-query/fee-config", post(api::fee_config))
        .route("/chain-query/priority-fees", post(api::priority_fees))
        .route("/simulate", post(api::simulate))
        .route("/fork/reset", post(api::fork_reset))
        .route("/fork/account", post(api::fork_account))
        .route("/health", get(api::health))
        .layer(middleware::from_fn(track_requests))
        .with_state(engine)
}

/// Answers requests still running after `timeout` with a 408 error body
pub(crate) async fn enforce_timeout(
    State(timeout): State<Duration>,
    request: Request,
    next: Next,
) -> Response {
    match tokio::time::timeout(timeout, next.run(request)).await {
        Ok(response) => response,
        Err(_) => ApiError::Timeout(timeout).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use alloy_primitives::U256;
    use axum::{
        body::Body,
        http::{header, Method, Request, Response, StatusCode},
    };
    use chrono::Utc;
    use gascope_provider::{FakeForkFactory, FeeHistory, MemoryStateStore, MockEvmProvider};
    use gascope_sim::{Chain, Chains, EngineSettings, FeeCache, FeeHistoryAnalyzer};
    use gascope_types::{chain::ChainSpec, FeeRatioModel, GasFeesConfig, FEE_RATIO_PRECISION};
    use http_body_util::BodyExt as _;
    use serde_json::{json, Value};
    use tower::ServiceExt as _;

    use super::*;

    const GWEI: u128 = 1_000_000_000;

    struct TestApp {
        router: Router,
        factory: Arc<FakeForkFactory>,
    }

    impl TestApp {
        fn new() -> Self {
            let mut provider = MockEvmProvider::default();
            provider.expect_fee_history().returning(|blocks: u64, _, _| {
                Ok(FeeHistory {
                    oldest_block: 100,
                    base_fee_per_gas: vec![GWEI; blocks as usize + 1],
                    gas_used_ratio: vec![0.5; blocks as usize],
                    reward: Some(vec![vec![1, 2, 3]; blocks as usize]),
                    ..Default::default()
                })
            });
            let chain = Chain {
                spec: ChainSpec {
                    name: "Test".to_string(),
                    id: 1,
                    ..Default::default()
                },
                rpc_url: "http://localhost:8545".parse().unwrap(),
                provider: Arc::new(provider),
                underlying: None,
            };

            let cache = Arc::new(FeeCache::default());
            cache.insert(GasFeesConfig {
                chain_id: 1,
                next_base_fee: 10 * GWEI,
                ratios: FeeRatioModel {
                    low: U256::from(FEE_RATIO_PRECISION / 10),
                    mid: U256::from(FEE_RATIO_PRECISION / 5),
                    high: U256::from(FEE_RATIO_PRECISION / 2),
                    period_millis: 0,
                },
                priority_fee_per_gas: 2 * GWEI,
                underlying: None,
                missing_priority_fee_history: false,
                fetched_at: Utc::now(),
            });

            let factory = Arc::new(FakeForkFactory::new(100));
            let engine = SimulationEngine::new(
                Arc::new(Chains::new([chain])),
                factory.clone(),
                Arc::new(MemoryStateStore::default()),
                FeeHistoryAnalyzer::default(),
                cache,
                EngineSettings {
                    fee_max_age: Duration::from_secs(3600),
                    ..Default::default()
                },
            );
            Self {
                router: router(Arc::new(engine)),
                factory,
            }
        }

        async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
            let request = Request::builder()
                .method(Method::POST)
                .uri(path)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap();
            Self::json(self.router.clone().oneshot(request).await.unwrap()).await
        }

        async fn get(&self, path: &str) -> (StatusCode, Value) {
            let request = Request::builder().uri(path).body(Body::empty()).unwrap();
            Self::json(self.router.clone().oneshot(request).await.unwrap()).await
        }

        async fn json(response: Response<Body>) -> (StatusCode, Value) {
            let status = response.status();
            let body = response.into_body().collect().await.unwrap().to_bytes();
            (status, serde_json::from_slice(&body).unwrap())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout() {
        let router = Router::new()
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    "done"
                }),
            )
            .layer(middleware::from_fn_with_state(
                Duration::from_secs(1),
                enforce_timeout,
            ));
        let request = Request::builder().uri("/slow").body(Body::empty()).unwrap();

        let (status, body) = TestApp::json(router.oneshot(request).await.unwrap()).await;
        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
        assert_eq!(body["status"], 408);
        assert_eq!(body["error"], "Timeout");
        assert_eq!(body["message"], "request timed out after 1s");
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = TestApp::new().get("/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok", "chains": [1]}));
    }

    #[tokio::test]
    async fn test_local_chain_estimate() {
        let (status, body) = TestApp::new()
            .post(
                "/local-chain-estimate",
                json!({
                    "forkUrl": "http://localhost:8545",
                    "targetContract": "0x0000000000000000000000000000000000000707",
                    "encodedData": "0xd0e30db0",
                    "value": "1",
                    "type": "transaction",
                }),
            )
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["gasUsed"], "21064");
        assert_eq!(body["errors"], json!([]));
    }

    #[tokio::test]
    async fn test_local_chain_estimate_fork_unavailable() {
        let app = TestApp::new();
        app.factory.set_reachable(false);

        let (status, body) = app
            .post(
                "/local-chain-estimate",
                json!({
                    "forkUrl": "http://localhost:8545",
                    "targetContract": "0x0000000000000000000000000000000000000707",
                    "encodedData": "0x",
                }),
            )
            .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], 500);
        assert_eq!(body["error"], "ForkUnavailable");
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let app = TestApp::new();

        let (status, body) = app
            .post("/local-chain-estimate", json!({"forkUrl": 5}))
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], 500);
        assert_eq!(body["error"], "InvalidRequest");

        let (status, body) = app
            .post("/chain-query/fee-config", json!({"chainId": "one"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], 400);
        assert_eq!(body["error"], "InvalidRequest");

        let (status, body) = app
            .post("/chain-query/gas-fees", json!({"blockCount": 2}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], 400);
        assert_eq!(body["data"], Value::Null);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_gas_fees() {
        let (status, body) = TestApp::new()
            .post(
                "/chain-query/gas-fees",
                json!({"chainId": 1, "blockCount": 2, "rewardPercentiles": [30, 60, 90]}),
            )
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], 200);
        assert_eq!(body["error"], Value::Null);
        assert_eq!(body["data"]["hasChainPriorityFee"], true);
        assert_eq!(body["data"]["avgBlockTime"], 12.0);
        assert_eq!(body["data"]["gasControls"]["step"], "100000000");

        let history: Value =
            serde_json::from_str(body["data"]["feeHistory"].as_str().unwrap()).unwrap();
        assert_eq!(history["oldestBlock"], "100");
        assert_eq!(history["baseFeePerGas"], json!(["1000000000", "1000000000", "1000000000"]));
        assert_eq!(history["reward"][1], json!(["1", "2", "3"]));
    }

    #[tokio::test]
    async fn test_gas_fees_unknown_chain() {
        let (status, body) = TestApp::new()
            .post(
                "/chain-query/gas-fees",
                json!({"chainId": 5, "blockCount": 2, "rewardPercentiles": [50]}),
            )
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body,
            json!({"status": 400, "data": null, "error": "unknown chain 5"})
        );
    }

    #[tokio::test]
    async fn test_priority_fees() {
        let (status, body) = TestApp::new()
            .post(
                "/chain-query/priority-fees",
                json!({"chainId": 1, "baseFee": "100000000000"}),
            )
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"low": "10000000000", "mid": "20000000000", "high": "50000000000"})
        );
    }

    #[tokio::test]
    async fn test_simulate_and_reset() {
        let app = TestApp::new();
        let alice = "0x00000000000000000000000000000000000a11ce";
        let token = "0x0000000000000000000000000000000000000707";

        let (status, body) = app
            .post(
                "/simulate",
                json!({
                    "chainId": 1,
                    "from": alice,
                    "to": token,
                    "data": "0x1234",
                    "value": "5",
                    "skipBalance": true,
                    "nativeTokenPrice": "2000000000000000000000",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"]["status"], "success");
        assert_eq!(body["fees"]["priorityFeePerGas"], "2000000000");
        let gas_used = body["outcome"]["gasUsed"].as_u64().unwrap();
        assert_eq!(
            body["cost"]["native"]["root"],
            (gas_used as u128 * 12 * GWEI).to_string()
        );

        let (_, account) = app
            .post("/fork/account", json!({"chainId": 1, "address": token}))
            .await;
        assert_eq!(account["balance"], "5");

        let (status, info) = app.post("/fork/reset", json!({"chainId": 1})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(info["chainId"], 1);
        assert_eq!(info["forkBlock"], 100);

        let (_, account) = app
            .post("/fork/account", json!({"chainId": 1, "address": token}))
            .await;
        assert_eq!(account["balance"], "0");
    }
}
