//! Prometheus metrics using prometheus-client crate.
//!
//! [`GateMetrics`] registers every metric the gate exports. The binary
//! encodes the registry on `/metrics` of the admin port in OpenMetrics text
//! format. Counter names are registered without the `_total` suffix because
//! the encoder appends it.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;
use std::time::Duration;

use crate::error::ErrorClass;

// ─────────────────────────────────────────────────────────────────────────────
// Label Sets
// ─────────────────────────────────────────────────────────────────────────────

/// Labels for admission decision counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DecisionLabels {
    /// Admission operation (`create`, `update`, `delete`, `connect`)
    pub operation: String,
    /// `allowed` or `denied`
    pub outcome: String,
    /// Short reason code (`approved`, `excluded`, `not_approved`, `error`, ...)
    pub reason: String,
}

/// Labels for approval request creation counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    /// `new` for a first request, `superseded` when replacing a stale one
    pub trigger: String,
}

/// Labels for token materialization counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct MaterializeLabels {
    /// `created` or `updated`
    pub action: String,
}

/// Labels for reconcile error counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileErrorLabels {
    /// `materializer` or `sweeper`
    pub component: String,
    /// Error class (`transient`, `not_ready`, `permanent`)
    pub class: String,
}

/// Admission latency buckets in milliseconds.
const ADMISSION_BUCKETS: &[f64] = &[
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0, 10000.0,
];

// ─────────────────────────────────────────────────────────────────────────────
// GateMetrics
// ─────────────────────────────────────────────────────────────────────────────

/// Prometheus metrics for the approval gate.
///
/// All metric names use the `npgate_` prefix.
#[derive(Debug)]
pub struct GateMetrics {
    /// Admission decisions by operation, outcome and reason.
    pub admission_decisions_total: Family<DecisionLabels, Counter>,

    /// Approval requests created by the gate.
    pub approval_requests_created_total: Family<RequestLabels, Counter>,

    /// Approval tokens written by the materializer.
    pub tokens_materialized_total: Family<MaterializeLabels, Counter>,

    /// Reconcile failures by component and class.
    pub reconcile_errors_total: Family<ReconcileErrorLabels, Counter>,

    /// Orphaned approval tokens removed by the sweeper.
    pub orphans_removed_total: Counter,

    /// End-to-end admission latency in milliseconds.
    pub admission_duration_ms: Histogram,
}

impl GateMetrics {
    /// Create and register all metrics with the given registry.
    pub fn new(registry: &mut Registry) -> Self {
        let admission_decisions_total = Family::<DecisionLabels, Counter>::default();
        registry.register(
            "npgate_admission_decisions",
            "Admission decisions by operation, outcome and reason",
            admission_decisions_total.clone(),
        );

        let approval_requests_created_total = Family::<RequestLabels, Counter>::default();
        registry.register(
            "npgate_approval_requests_created",
            "Approval requests created by the admission gate",
            approval_requests_created_total.clone(),
        );

        let tokens_materialized_total = Family::<MaterializeLabels, Counter>::default();
        registry.register(
            "npgate_tokens_materialized",
            "Approval tokens written after a grant",
            tokens_materialized_total.clone(),
        );

        let reconcile_errors_total = Family::<ReconcileErrorLabels, Counter>::default();
        registry.register(
            "npgate_reconcile_errors",
            "Reconcile failures by component and error class",
            reconcile_errors_total.clone(),
        );

        let orphans_removed_total = Counter::default();
        registry.register(
            "npgate_orphans_removed",
            "Orphaned approval tokens removed",
            orphans_removed_total.clone(),
        );

        let admission_duration_ms = Histogram::new(ADMISSION_BUCKETS.iter().copied());
        registry.register(
            "npgate_admission_duration_ms",
            "End-to-end admission latency in milliseconds",
            admission_duration_ms.clone(),
        );

        Self {
            admission_decisions_total,
            approval_requests_created_total,
            tokens_materialized_total,
            reconcile_errors_total,
            orphans_removed_total,
            admission_duration_ms,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Recording helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// Record one admission decision and its latency.
    pub fn record_admission(&self, operation: &str, allowed: bool, reason: &str, elapsed: Duration) {
        self.admission_decisions_total
            .get_or_create(&DecisionLabels {
                operation: operation.to_string(),
                outcome: if allowed { "allowed" } else { "denied" }.to_string(),
                reason: reason.to_string(),
            })
            .inc();
        self.admission_duration_ms
            .observe(elapsed.as_secs_f64() * 1000.0);
    }

    /// Record a created approval request.
    pub fn record_request_created(&self, superseded: bool) {
        self.approval_requests_created_total
            .get_or_create(&RequestLabels {
                trigger: if superseded { "superseded" } else { "new" }.to_string(),
            })
            .inc();
    }

    /// Record a written approval token.
    pub fn record_materialized(&self, updated: bool) {
        self.tokens_materialized_total
            .get_or_create(&MaterializeLabels {
                action: if updated { "updated" } else { "created" }.to_string(),
            })
            .inc();
    }

    /// Record a reconcile failure.
    pub fn record_reconcile_error(&self, component: &str, class: ErrorClass) {
        self.reconcile_errors_total
            .get_or_create(&ReconcileErrorLabels {
                component: component.to_string(),
                class: class.as_str().to_string(),
            })
            .inc();
    }

    /// Record removed orphans.
    pub fn record_orphans_removed(&self, count: u64) {
        self.orphans_removed_total.inc_by(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(registry: &Registry) -> String {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, registry).unwrap();
        buffer
    }

    #[test]
    fn test_metrics_registration() {
        let mut registry = Registry::default();
        let _metrics = GateMetrics::new(&mut registry);
        let text = encode(&registry);
        assert!(text.contains("npgate_orphans_removed_total"));
        assert!(text.contains("npgate_admission_duration_ms"));
    }

    #[test]
    fn test_admission_recording() {
        let mut registry = Registry::default();
        let metrics = GateMetrics::new(&mut registry);
        metrics.record_admission("create", false, "not_approved", Duration::from_millis(3));
        metrics.record_admission("delete", true, "delete", Duration::from_millis(1));

        let text = encode(&registry);
        assert!(text.contains(
            r#"npgate_admission_decisions_total{operation="create",outcome="denied",reason="not_approved"} 1"#
        ));
        assert!(text.contains("npgate_admission_duration_ms_count 2"));
    }

    #[test]
    fn test_reconcile_recording() {
        let mut registry = Registry::default();
        let metrics = GateMetrics::new(&mut registry);
        metrics.record_materialized(false);
        metrics.record_materialized(true);
        metrics.record_reconcile_error("sweeper", ErrorClass::Transient);
        metrics.record_orphans_removed(2);

        let text = encode(&registry);
        assert!(text.contains(r#"npgate_tokens_materialized_total{action="created"} 1"#));
        assert!(text.contains(
            r#"npgate_reconcile_errors_total{component="sweeper",class="transient"} 1"#
        ));
        assert!(text.contains("npgate_orphans_removed_total 2"));
    }
}
