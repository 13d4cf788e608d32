//! Health and readiness probe handlers.
//!
//! - `/health` (liveness): 200 while the process is alive
//! - `/ready` (readiness): 200 only when every check passes
//!
//! | Endpoint | Condition | Status |
//! |----------|-----------|--------|
//! | /health  | Process alive | 200 |
//! | /health  | Process stopped | 503 |
//! | /ready   | All checks pass | 200 |
//! | /ready   | Any check fails | 503 |
//! | /ready   | Shutting down | 503 |

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use std::sync::Arc;

use super::{LifecycleManager, LifecycleState};

// ============================================================================
// Response Types
// ============================================================================

/// Health probe response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Health status ("healthy")
    pub status: &'static str,
    /// Service version
    pub version: &'static str,
    /// Uptime in seconds
    pub uptime_seconds: u64,
}

/// Unhealthy response.
#[derive(Debug, Serialize)]
pub struct UnhealthyResponse {
    /// Health status ("unhealthy")
    pub status: &'static str,
    /// Reason for unhealthy status
    pub reason: String,
}

/// Readiness checks result.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessChecks {
    /// Configuration is loaded and validated
    pub config_loaded: bool,
    /// Last store reachability check succeeded
    pub store_reachable: bool,
    /// Request watcher and sweeper are running
    pub controllers_started: bool,
}

impl ReadinessChecks {
    /// Returns true if all checks pass.
    #[must_use]
    pub fn all_pass(&self) -> bool {
        self.config_loaded && self.store_reachable && self.controllers_started
    }

    /// Returns the first failing check name.
    #[must_use]
    pub fn first_failure(&self) -> Option<&'static str> {
        if !self.config_loaded {
            Some("config_loaded")
        } else if !self.store_reachable {
            Some("store_reachable")
        } else if !self.controllers_started {
            Some("controllers_started")
        } else {
            None
        }
    }
}

/// Readiness probe response.
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    /// Readiness status ("ready" or "not_ready")
    pub status: &'static str,
    /// Individual check results
    pub checks: ReadinessChecks,
    /// Reason for not ready (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ============================================================================
// Router
// ============================================================================

/// Create the health/readiness router.
///
/// - `GET /health` - Liveness probe
/// - `GET /ready` - Readiness probe
pub fn health_router(lifecycle: Arc<LifecycleManager>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(readiness_handler))
        .with_state(lifecycle)
}

// ============================================================================
// Handlers
// ============================================================================

/// Liveness: read-only, never touches the store.
async fn health_handler(State(lifecycle): State<Arc<LifecycleManager>>) -> Response {
    if matches!(lifecycle.state(), LifecycleState::Stopped) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(UnhealthyResponse {
                status: "unhealthy",
                reason: "service_stopped".to_string(),
            }),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy",
            version: lifecycle.version(),
            uptime_seconds: lifecycle.uptime_seconds(),
        }),
    )
        .into_response()
}

async fn readiness_handler(State(lifecycle): State<Arc<LifecycleManager>>) -> Response {
    if lifecycle.is_shutting_down() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "not_ready",
                checks: lifecycle.readiness_checks(),
                reason: Some("shutting_down".to_string()),
            }),
        )
            .into_response();
    }

    let checks = lifecycle.readiness_checks();

    if checks.all_pass() && lifecycle.is_ready() {
        return (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ready",
                checks,
                reason: None,
            }),
        )
            .into_response();
    }

    let reason = match checks.first_failure() {
        Some("store_reachable") => Some(match lifecycle.store_error() {
            Some(err) => format!("store_reachable: {err}"),
            None => "store_reachable".to_string(),
        }),
        Some(failed) => Some(failed.to_string()),
        None => Some(format!("lifecycle_state: {}", lifecycle.state())),
    };
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ReadinessResponse {
            status: "not_ready",
            checks,
            reason,
        }),
    )
        .into_response()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleConfig;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde::Deserialize;
    use tower::ServiceExt;

    // Production types use &'static str, which can't be deserialized.

    #[derive(Debug, Deserialize)]
    struct TestHealthResponse {
        status: String,
        version: String,
    }

    #[derive(Debug, Deserialize)]
    struct TestReadinessChecks {
        config_loaded: bool,
        store_reachable: bool,
        controllers_started: bool,
    }

    #[derive(Debug, Deserialize)]
    struct TestReadinessResponse {
        status: String,
        checks: TestReadinessChecks,
        reason: Option<String>,
    }

    fn ready_lifecycle() -> Arc<LifecycleManager> {
        let lifecycle = Arc::new(LifecycleManager::new(LifecycleConfig::default()));
        lifecycle.mark_config_loaded();
        lifecycle.update_store_health(true, None);
        lifecycle.mark_controllers_started();
        lifecycle.mark_ready();
        lifecycle
    }

    async fn probe(lifecycle: Arc<LifecycleManager>, uri: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = health_router(lifecycle).oneshot(req).await.unwrap();
        let status = resp.status();
        (status, resp.into_body().collect().await.unwrap().to_bytes().to_vec())
    }

    #[tokio::test]
    async fn test_health_during_startup() {
        let lifecycle = Arc::new(LifecycleManager::new(LifecycleConfig::default()));
        let (status, body) = probe(lifecycle, "/health").await;
        assert_eq!(status, StatusCode::OK);

        let json: TestHealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(json.status, "healthy");
        assert_eq!(json.version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_health_during_shutdown() {
        let lifecycle = ready_lifecycle();
        lifecycle.begin_shutdown();
        let (status, _) = probe(lifecycle, "/health").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_when_stopped() {
        let lifecycle = Arc::new(LifecycleManager::new(LifecycleConfig::default()));
        lifecycle.mark_stopped();
        let (status, _) = probe(lifecycle, "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_ready_during_startup() {
        let lifecycle = Arc::new(LifecycleManager::new(LifecycleConfig::default()));
        let (status, body) = probe(lifecycle, "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let json: TestReadinessResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(json.status, "not_ready");
        assert_eq!(json.reason.as_deref(), Some("config_loaded"));
    }

    #[tokio::test]
    async fn test_ready_all_checks_pass() {
        let (status, body) = probe(ready_lifecycle(), "/ready").await;
        assert_eq!(status, StatusCode::OK);

        let json: TestReadinessResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(json.status, "ready");
        assert!(json.checks.config_loaded);
        assert!(json.checks.store_reachable);
        assert!(json.checks.controllers_started);
        assert!(json.reason.is_none());
    }

    #[tokio::test]
    async fn test_ready_store_unreachable_reports_error() {
        let lifecycle = ready_lifecycle();
        lifecycle.update_store_health(false, Some("connection refused".into()));

        let (status, body) = probe(lifecycle, "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let json: TestReadinessResponse = serde_json::from_slice(&body).unwrap();
        assert!(!json.checks.store_reachable);
        assert_eq!(
            json.reason.as_deref(),
            Some("store_reachable: connection refused")
        );
    }

    #[tokio::test]
    async fn test_ready_checks_pass_but_still_starting() {
        let lifecycle = Arc::new(LifecycleManager::new(LifecycleConfig::default()));
        lifecycle.mark_config_loaded();
        lifecycle.update_store_health(true, None);
        lifecycle.mark_controllers_started();

        let (status, body) = probe(lifecycle, "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let json: TestReadinessResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(json.reason.as_deref(), Some("lifecycle_state: starting"));
    }

    #[tokio::test]
    async fn test_ready_during_shutdown() {
        let lifecycle = ready_lifecycle();
        lifecycle.begin_shutdown();

        let (status, body) = probe(lifecycle, "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let json: TestReadinessResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(json.reason.as_deref(), Some("shutting_down"));
    }
}
