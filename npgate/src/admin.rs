//! Admin server for health checks and metrics.
//!
//! Runs on its own port (default 8081), separate from the TLS-terminated
//! webhook listener, and serves:
//!
//! - `GET /health` and `GET /ready` from the core lifecycle router
//! - `GET /metrics` in OpenMetrics text format

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::ServerError;
use crate::ports::admin_port;
use npgate_core::lifecycle::{LifecycleManager, health_router};

/// Admin server configuration.
#[derive(Debug, Clone)]
pub struct AdminServerConfig {
    /// Port to listen on
    pub port: u16,
    /// Bind address
    pub bind_addr: String,
}

impl Default for AdminServerConfig {
    fn default() -> Self {
        Self {
            port: admin_port(),
            bind_addr: "0.0.0.0".to_string(),
        }
    }
}

impl AdminServerConfig {
    /// Config with a custom port and the default bind address.
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// `addr:port` string for binding.
    pub fn bind_string(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

/// Shared state for the admin server.
#[derive(Clone)]
pub struct AdminState {
    /// Lifecycle manager for health checks.
    pub lifecycle: Arc<LifecycleManager>,
    /// Registry rendered by `/metrics`.
    pub prom_registry: Arc<Registry>,
}

/// Admin server for health checks and metrics.
pub struct AdminServer {
    config: AdminServerConfig,
    state: AdminState,
}

impl AdminServer {
    /// Creates an admin server.
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        prom_registry: Arc<Registry>,
        config: AdminServerConfig,
    ) -> Self {
        Self {
            config,
            state: AdminState {
                lifecycle,
                prom_registry,
            },
        }
    }

    /// Router merging the lifecycle probes with `/metrics`.
    pub fn router(&self) -> Router {
        let metrics_router = Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(self.state.clone());

        health_router(self.state.lifecycle.clone()).merge(metrics_router)
    }

    /// Serves until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Bind` or `ServerError::Serve`.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ServerError> {
        let addr = self.config.bind_string();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;

        info!(addr = %addr, "Admin server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("Admin server shutting down");
            })
            .await
            .map_err(ServerError::Serve)
    }
}

async fn metrics_handler(State(state): State<AdminState>) -> impl IntoResponse {
    let mut buffer = String::new();

    if let Err(e) = prometheus_client::encoding::text::encode(&mut buffer, &state.prom_registry) {
        error!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {e}"),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        buffer,
    )
        .into_response()
}
