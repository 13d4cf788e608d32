//! Background reconcilers.
//!
//! - the request controller watches approval CSRs and runs the grant
//!   materializer for each change
//! - the sweep loop runs the orphan sweeper on a fixed interval
//!
//! Both stop when the shutdown token is cancelled.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use k8s_openapi::api::certificates::v1::CertificateSigningRequest;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use npgate_core::config::GateConfig;
use npgate_core::telemetry::GateMetrics;
use npgate_core::{
    GateError, GrantMaterializer, MaterializeOutcome, OrphanSweeper, Requeue, requeue_for,
};

use crate::kube_store::KubeStore;

/// Shared state for the request controller.
pub struct Context {
    /// Materializer invoked per request
    pub materializer: GrantMaterializer,
    /// Backoff settings
    pub config: Arc<GateConfig>,
    /// Optional metrics sink
    pub metrics: Option<Arc<GateMetrics>>,
}

/// Reconciles one approval request.
pub async fn reconcile(
    csr: Arc<CertificateSigningRequest>,
    ctx: Arc<Context>,
) -> Result<Action, GateError> {
    let name = csr.name_any();
    let outcome = ctx.materializer.materialize(&name).await?;
    match outcome {
        MaterializeOutcome::Created | MaterializeOutcome::Updated => {
            info!(request = %name, outcome = ?outcome, "Approval token written");
        }
        _ => debug!(request = %name, outcome = ?outcome, "Approval request reconciled"),
    }
    Ok(Action::await_change())
}

/// Maps a reconcile failure to a requeue.
pub fn error_policy(
    csr: Arc<CertificateSigningRequest>,
    err: &GateError,
    ctx: Arc<Context>,
) -> Action {
    let class = err.class();
    if let Some(metrics) = &ctx.metrics {
        metrics.record_reconcile_error("materializer", class);
    }
    match requeue_for(err, &ctx.config) {
        Requeue::After(delay) => {
            debug!(
                request = %csr.name_any(),
                class = class.as_str(),
                error = %err,
                retry_in = ?delay,
                "Requeueing approval request"
            );
            Action::requeue(delay)
        }
        Requeue::Done => {
            warn!(
                request = %csr.name_any(),
                error = %err,
                "Approval request cannot be materialized"
            );
            Action::await_change()
        }
    }
}

/// Runs the request controller until `shutdown` is cancelled.
pub async fn run_request_controller(client: Client, ctx: Arc<Context>, shutdown: CancellationToken) {
    let requests: Api<CertificateSigningRequest> = Api::all(client);
    let watch = watcher::Config::default().labels(&KubeStore::approval_selector());

    info!("Starting approval request controller");
    Controller::new(requests, watch)
        .graceful_shutdown_on(shutdown.cancelled_owned())
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => debug!(request = %object.name, "Reconciled"),
                Err(err) => debug!(error = %err, "Reconcile did not complete"),
            }
        })
        .await;
    info!("Approval request controller stopped");
}

/// Runs the orphan sweeper every `interval` until `shutdown` is cancelled.
///
/// The first sweep runs immediately.
pub async fn run_sweeper(
    sweeper: OrphanSweeper,
    interval: Duration,
    shutdown: CancellationToken,
    metrics: Option<Arc<GateMetrics>>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(interval = ?interval, "Starting orphan sweeper");
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match sweeper.sweep().await {
            Ok(report) if report.orphaned > 0 => info!(
                scanned = report.scanned,
                removed = report.removed,
                failed = report.failed,
                "Orphan sweep finished"
            ),
            Ok(_) => {}
            Err(err) => {
                if let Some(metrics) = &metrics {
                    metrics.record_reconcile_error("sweeper", err.class());
                }
                warn!(error = %err, "Orphan sweep failed");
            }
        }
    }
    info!("Orphan sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;
    use npgate_core::store::StoreError;
    use npgate_core::{BoundedStore, MemoryStore};
    use prometheus_client::registry::Registry;

    const REQUEST: &str = "np-approval-team-a-allow-web";

    fn csr(name: &str) -> Arc<CertificateSigningRequest> {
        Arc::new(CertificateSigningRequest {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            ..CertificateSigningRequest::default()
        })
    }

    fn context(store: Arc<MemoryStore>, metrics: Option<Arc<GateMetrics>>) -> Arc<Context> {
        let config = Arc::new(GateConfig::default());
        let bounded = BoundedStore::new(store, config.store.timeout);
        Arc::new(Context {
            materializer: GrantMaterializer::new(bounded, config.clone()),
            config,
            metrics,
        })
    }

    #[tokio::test]
    async fn test_reconcile_absent_request_awaits_change() {
        let ctx = context(Arc::new(MemoryStore::new()), None);
        let action = reconcile(csr(REQUEST), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn test_store_failure_surfaces_as_error() {
        let store = Arc::new(MemoryStore::new());
        store.inject_failure(
            "get_request",
            StoreError::Unavailable {
                reason: "apiserver down".into(),
            },
        );
        let ctx = context(store, None);
        assert!(reconcile(csr(REQUEST), ctx).await.is_err());
    }

    #[test]
    fn test_error_policy_requeues_by_class() {
        let mut registry = Registry::default();
        let metrics = Arc::new(GateMetrics::new(&mut registry));
        let ctx = context(Arc::new(MemoryStore::new()), Some(metrics));

        let not_ready = GateError::NotReady {
            request: REQUEST.into(),
        };
        assert_eq!(
            error_policy(csr(REQUEST), &not_ready, ctx.clone()),
            Action::requeue(Duration::from_secs(30))
        );

        let malformed = GateError::malformed("approval request", "missing annotation");
        assert_eq!(
            error_policy(csr(REQUEST), &malformed, ctx),
            Action::await_change()
        );

        let mut encoded = String::new();
        prometheus_client::encoding::text::encode(&mut encoded, &registry).unwrap();
        assert!(encoded.contains(r#"component="materializer",class="not_ready""#));
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_shutdown() {
        let config = GateConfig::default();
        let store = BoundedStore::new(Arc::new(MemoryStore::new()), config.store.timeout);
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        tokio::time::timeout(
            Duration::from_secs(1),
            run_sweeper(
                OrphanSweeper::new(store),
                Duration::from_secs(60),
                shutdown,
                None,
            ),
        )
        .await
        .unwrap();
    }
}
