//! Metrics for the approval gate.

mod prom_metrics;

pub use prom_metrics::{
    DecisionLabels, GateMetrics, MaterializeLabels, ReconcileErrorLabels, RequestLabels,
};
