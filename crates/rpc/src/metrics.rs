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

use std::time::{Duration, Instant};

use axum::{extract::Request, middleware::Next, response::Response};

/// Records request counts, latency and errors per path
pub(crate) async fn track_requests(request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let started_at = Instant::now();
    RpcMetrics::increment_num_requests(path.clone());
    RpcMetrics::increment_open_requests(path.clone());

    let response = next.run(request).await;

    RpcMetrics::record_request_latency(path.clone(), started_at.elapsed());
    RpcMetrics::decrement_open_requests(path.clone());
    if !response.status().is_success() {
        RpcMetrics::increment_rpc_error_count(path);
    }
    response
}

struct RpcMetrics {}

impl RpcMetrics {
    fn increment_num_requests(path: String) {
        metrics::counter!("rpc_num_requests", "path" => path).increment(1);
    }

    fn increment_open_requests(path: String) {
        metrics::gauge!("rpc_open_requests", "path" => path).increment(1_f64);
    }

    fn decrement_open_requests(path: String) {
        metrics::gauge!("rpc_open_requests", "path" => path).decrement(1_f64);
    }

    fn increment_rpc_error_count(path: String) {
        metrics::counter!("rpc_error_count", "path" => path).increment(1);
    }

    fn record_request_latency(path: String, latency: Duration) {
        metrics::histogram!("rpc_request_latency", "path" => path).record(latency.as_millis() as f64);
    }
}
