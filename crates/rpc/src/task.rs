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

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use axum::{
    http::{HeaderValue, Method},
    middleware,
};
use gascope_sim::SimulationEngine;
use gascope_utils::task::Task;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::info;

use crate::router::{enforce_timeout, router};

/// HTTP server arguments.
#[derive(Debug)]
pub struct Args {
    /// Port to listen on.
    pub port: u16,
    /// Host to listen on.
    pub host: String,
    /// Allowed CORS origins, `*` allows any.
    pub cors_domains: Vec<String>,
    /// Request timeout.
    pub request_timeout: Duration,
}

/// HTTP server task.
pub struct RpcTask {
    args: Args,
    engine: Arc<SimulationEngine>,
}

#[async_trait]
impl Task for RpcTask {
    async fn run(self: Box<Self>, shutdown_token: CancellationToken) -> anyhow::Result<()> {
        let addr: SocketAddr = format_socket_addr(&self.args.host, self.args.port).parse()?;
        tracing::info!("Starting rpc server on {}", addr);

        let app = router(self.engine.clone())
            .layer(middleware::from_fn_with_state(
                self.args.request_timeout,
                enforce_timeout,
            ))
            .layer(cors_layer(&self.args.cors_domains)?);
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;

        info!("Started RPC server");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_token.cancelled_owned())
            .await?;
        tracing::info!("Server shutdown");
        Ok(())
    }
}

impl RpcTask {
    /// Creates a new HTTP server task.
    pub fn new(args: Args, engine: Arc<SimulationEngine>) -> Self {
        Self { args, engine }
    }

    /// Converts the task into a boxed trait object.
    pub fn boxed(self) -> Box<dyn Task> {
        Box::new(self)
    }
}

fn format_socket_addr(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

fn cors_layer(domains: &[String]) -> anyhow::Result<CorsLayer> {
    let origin = if domains.is_empty() || domains.iter().any(|d| d == "*") {
        AllowOrigin::from(Any)
    } else {
        let origins = domains
            .iter()
            .map(|d| HeaderValue::from_str(d).with_context(|| format!("invalid cors domain {d}")))
            .collect::<anyhow::Result<Vec<_>>>()?;
        AllowOrigin::list(origins)
    };
    Ok(CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .allow_origin(origin))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_socket_addr() {
        assert_eq!(format_socket_addr("0.0.0.0", 3000), "0.0.0.0:3000");
        assert_eq!(format_socket_addr("::1", 3000), "[::1]:3000");
        assert!(format_socket_addr("::1", 3000)
            .parse::<SocketAddr>()
            .is_ok());
    }

    #[test]
    fn test_cors_layer() {
        assert!(cors_layer(&["*".to_string()]).is_ok());
        assert!(cors_layer(&["https://app.example.com".to_string()]).is_ok());
        assert!(cors_layer(&["bad\ndomain".to_string()]).is_err());
    }
}
