//! Mapping from reconcile errors to requeue decisions.

use std::time::Duration;

use crate::config::GateConfig;
use crate::error::{ErrorClass, GateError};

/// What a reconciler should do after a failed pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Do not retry; wait for the next change event
    Done,
    /// Retry after the given delay
    After(Duration),
}

/// Chooses the requeue for `err`.
///
/// Transient failures back off by `reconcile.transient_backoff`, a granted
/// request still waiting on its artifact by `approval.artifact_wait`.
/// Permanent failures are not retried.
#[must_use]
pub fn requeue_for(err: &GateError, config: &GateConfig) -> Requeue {
    match err.class() {
        ErrorClass::Transient => Requeue::After(config.reconcile.transient_backoff),
        ErrorClass::NotReady => Requeue::After(config.approval.artifact_wait),
        ErrorClass::Permanent => Requeue::Done,
    }
}
