//! Operational lifecycle management.
//!
//! This module provides lifecycle management including:
//! - Startup sequencing with readiness checks
//! - Health and readiness probes for Kubernetes
//! - Graceful shutdown with admission request draining
//! - Periodic store reachability checks
//!
//! ## Lifecycle States
//!
//! ```text
//! Starting → Ready → ShuttingDown → Stopped
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use arc_swap::{ArcSwap, ArcSwapOption};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::BoundedStore;

pub mod health;

pub use health::{HealthResponse, ReadinessChecks, ReadinessResponse, health_router};

/// Request name used for reachability probes; never created.
const PROBE_REQUEST_NAME: &str = "npgate-reachability-probe";

// ============================================================================
// Lifecycle State
// ============================================================================

/// Lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Initialization in progress
    Starting,
    /// Serving admission reviews and reconciling
    Ready,
    /// Draining, rejecting new reviews
    ShuttingDown,
    /// Shutdown complete
    Stopped,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Ready => write!(f, "ready"),
            Self::ShuttingDown => write!(f, "shutting_down"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for lifecycle management.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Time to wait for in-flight admission reviews on shutdown (default: 10s)
    pub drain_timeout: Duration,
    /// Interval between store reachability checks (default: 30s)
    pub store_check_interval: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(10),
            store_check_interval: Duration::from_secs(30),
        }
    }
}

// ============================================================================
// Lifecycle Manager
// ============================================================================

/// Central coordination point for the operational lifecycle.
///
/// All state is atomic or swapped lock-free, so probes never contend with
/// admission traffic.
pub struct LifecycleManager {
    /// Current lifecycle state
    state: ArcSwap<LifecycleState>,

    /// When the service started
    started_at: Instant,

    /// Shutdown cancellation token (shared with background tasks)
    shutdown_token: CancellationToken,

    /// In-flight admission reviews (for draining)
    active_requests: AtomicUsize,

    /// Whether configuration is loaded and validated
    config_loaded: AtomicBool,

    /// Whether the last store check succeeded
    store_reachable: AtomicBool,

    /// Error from the last failed store check
    store_error: ArcSwapOption<String>,

    /// Whether the request watcher and sweeper are running
    controllers_started: AtomicBool,

    /// Configuration
    config: LifecycleConfig,

    /// Version string (from Cargo.toml)
    version: &'static str,
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("state", &self.state())
            .field("active_requests", &self.active_request_count())
            .field("checks", &self.readiness_checks())
            .finish()
    }
}

impl LifecycleManager {
    /// Creates a new lifecycle manager in the `Starting` state.
    #[must_use]
    pub fn new(config: LifecycleConfig) -> Self {
        Self {
            state: ArcSwap::new(Arc::new(LifecycleState::Starting)),
            started_at: Instant::now(),
            shutdown_token: CancellationToken::new(),
            active_requests: AtomicUsize::new(0),
            config_loaded: AtomicBool::new(false),
            store_reachable: AtomicBool::new(false),
            store_error: ArcSwapOption::empty(),
            controllers_started: AtomicBool::new(false),
            config,
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        **self.state.load()
    }

    /// Returns true if the service is ready to accept traffic.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self.state(), LifecycleState::Ready)
    }

    /// Returns true if the service is shutting down or stopped.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        matches!(
            self.state(),
            LifecycleState::ShuttingDown | LifecycleState::Stopped
        )
    }

    /// Transition to Ready state.
    pub fn mark_ready(&self) {
        self.state.store(Arc::new(LifecycleState::Ready));
        info!(
            version = %self.version,
            startup_duration_ms = self.started_at.elapsed().as_millis(),
            "npgate ready"
        );
    }

    /// Mark configuration as loaded and validated.
    pub fn mark_config_loaded(&self) {
        self.config_loaded.store(true, Ordering::SeqCst);
    }

    /// Mark the request watcher and sweeper as running.
    pub fn mark_controllers_started(&self) {
        self.controllers_started.store(true, Ordering::SeqCst);
    }

    /// Record the outcome of a store reachability check.
    pub fn update_store_health(&self, reachable: bool, error: Option<String>) {
        let was = self.store_reachable.swap(reachable, Ordering::SeqCst);
        self.store_error.store(error.map(Arc::new));
        if was && !reachable {
            warn!("Approval store became unreachable");
        } else if !was && reachable {
            info!("Approval store reachable");
        }
    }

    /// Error from the last failed store check, if any.
    #[must_use]
    pub fn store_error(&self) -> Option<String> {
        self.store_error.load().as_deref().cloned()
    }

    /// Returns a clone of the shutdown token.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Begin graceful shutdown: set ShuttingDown and cancel the shutdown token.
    pub fn begin_shutdown(&self) {
        self.state.store(Arc::new(LifecycleState::ShuttingDown));
        self.shutdown_token.cancel();
        info!(
            active_requests = self.active_requests.load(Ordering::SeqCst),
            "Shutdown initiated"
        );
    }

    /// Track an in-flight admission review (returns RAII guard).
    ///
    /// Returns `None` once shutdown has begun.
    #[must_use]
    pub fn track_request(self: &Arc<Self>) -> Option<RequestGuard> {
        if self.is_shutting_down() {
            return None;
        }
        self.active_requests.fetch_add(1, Ordering::SeqCst);
        Some(RequestGuard {
            manager: Arc::clone(self),
        })
    }

    /// Returns the current active request count.
    #[must_use]
    pub fn active_request_count(&self) -> usize {
        self.active_requests.load(Ordering::SeqCst)
    }

    /// Returns uptime in seconds.
    #[must_use]
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Returns the version string.
    #[must_use]
    pub fn version(&self) -> &'static str {
        self.version
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Get readiness checks status.
    #[must_use]
    pub fn readiness_checks(&self) -> ReadinessChecks {
        ReadinessChecks {
            config_loaded: self.config_loaded.load(Ordering::SeqCst),
            store_reachable: self.store_reachable.load(Ordering::SeqCst),
            controllers_started: self.controllers_started.load(Ordering::SeqCst),
        }
    }

    /// Drain in-flight admission reviews, polling every 100ms.
    pub async fn drain_requests(&self) -> DrainResult {
        let deadline = tokio::time::Instant::now() + self.config.drain_timeout;

        loop {
            let active = self.active_requests.load(Ordering::SeqCst);
            if active == 0 {
                return DrainResult::Complete;
            }
            if tokio::time::Instant::now() > deadline {
                warn!(
                    active_requests = active,
                    "Drain timeout exceeded, forcing shutdown"
                );
                return DrainResult::Timeout { remaining: active };
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Mark as stopped.
    pub fn mark_stopped(&self) {
        self.state.store(Arc::new(LifecycleState::Stopped));
    }

    /// Checks store reachability once and records the result.
    pub async fn check_store(&self, store: &BoundedStore) {
        match store.get_request(PROBE_REQUEST_NAME).await {
            Ok(_) => self.update_store_health(true, None),
            Err(err) => {
                debug!(error = %err, "Store reachability check failed");
                self.update_store_health(false, Some(err.to_string()));
            }
        }
    }

    /// Spawns a task that checks store reachability every
    /// `store_check_interval` until shutdown.
    pub fn spawn_store_health_checker(
        self: &Arc<Self>,
        store: BoundedStore,
    ) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        let shutdown = self.shutdown_token();
        let interval = self.config.store_check_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => manager.check_store(&store).await,
                }
            }
        })
    }
}

// ============================================================================
// Request Guard
// ============================================================================

/// RAII guard decrementing the in-flight counter on drop.
pub struct RequestGuard {
    manager: Arc<LifecycleManager>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.manager.active_requests.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Drain Result
// ============================================================================

/// Result of draining requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainResult {
    /// All requests completed before timeout
    Complete,
    /// Timeout reached with remaining requests
    Timeout {
        /// Number of requests still active
        remaining: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError};

    #[test]
    fn test_lifecycle_state_transitions() {
        let lifecycle = LifecycleManager::new(LifecycleConfig::default());
        assert_eq!(lifecycle.state(), LifecycleState::Starting);
        assert!(!lifecycle.is_ready());

        lifecycle.mark_ready();
        assert!(lifecycle.is_ready());

        lifecycle.begin_shutdown();
        assert_eq!(lifecycle.state(), LifecycleState::ShuttingDown);
        assert!(lifecycle.is_shutting_down());
        assert!(lifecycle.shutdown_token().is_cancelled());

        lifecycle.mark_stopped();
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
        assert!(lifecycle.is_shutting_down());
    }

    #[test]
    fn test_request_tracking_rejects_during_shutdown() {
        let lifecycle = Arc::new(LifecycleManager::new(LifecycleConfig::default()));
        lifecycle.mark_ready();

        let guard = lifecycle.track_request();
        assert!(guard.is_some());
        assert_eq!(lifecycle.active_request_count(), 1);
        drop(guard);
        assert_eq!(lifecycle.active_request_count(), 0);

        lifecycle.begin_shutdown();
        assert!(lifecycle.track_request().is_none());
    }

    #[test]
    fn test_readiness_checks() {
        let lifecycle = LifecycleManager::new(LifecycleConfig::default());
        assert_eq!(lifecycle.readiness_checks().first_failure(), Some("config_loaded"));

        lifecycle.mark_config_loaded();
        lifecycle.update_store_health(true, None);
        assert_eq!(
            lifecycle.readiness_checks().first_failure(),
            Some("controllers_started")
        );

        lifecycle.mark_controllers_started();
        assert!(lifecycle.readiness_checks().all_pass());
    }

    #[tokio::test]
    async fn test_check_store_records_failure() {
        let memory = Arc::new(MemoryStore::new());
        let store = BoundedStore::new(memory.clone(), Duration::from_secs(1));
        let lifecycle = LifecycleManager::new(LifecycleConfig::default());

        lifecycle.check_store(&store).await;
        assert!(lifecycle.readiness_checks().store_reachable);

        memory.inject_failure(
            "get_request",
            StoreError::Unavailable {
                reason: "apiserver down".into(),
            },
        );
        lifecycle.check_store(&store).await;
        assert!(!lifecycle.readiness_checks().store_reachable);
        assert!(lifecycle.store_error().unwrap().contains("apiserver down"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_times_out() {
        let lifecycle = Arc::new(LifecycleManager::new(LifecycleConfig {
            drain_timeout: Duration::from_millis(300),
            ..LifecycleConfig::default()
        }));
        lifecycle.mark_ready();
        let _guard = lifecycle.track_request();
        assert_eq!(
            lifecycle.drain_requests().await,
            DrainResult::Timeout { remaining: 1 }
        );
    }
}
