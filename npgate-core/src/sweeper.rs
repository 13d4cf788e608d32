//! Orphan sweeper: retires approval tokens whose request is gone.
//!
//! A token is retired when its originating request no longer exists, when it
//! carries no request cross-reference at all, or when someone already asked
//! for its deletion. Retiring always clears the protection guard and persists
//! that change before issuing the delete, so a token can never be left stuck
//! behind its own finalizer.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::approval::ApprovalToken;
use crate::error::GateError;
use crate::store::{BoundedStore, StoreError};
use crate::telemetry::GateMetrics;

/// Why a token is being retired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrphanReason {
    /// The referenced approval request no longer exists
    RequestGone,
    /// The token names no approval request
    NoReference,
    /// Deletion was requested while the guard was attached
    DeletionRequested,
}

impl OrphanReason {
    /// Returns the reason as a static string for logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RequestGone => "request_gone",
            Self::NoReference => "no_reference",
            Self::DeletionRequested => "deletion_requested",
        }
    }
}

/// Counters from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Approval tokens examined
    pub scanned: usize,
    /// Tokens found orphaned
    pub orphaned: usize,
    /// Orphans successfully retired
    pub removed: usize,
    /// Tokens whose check or retirement failed
    pub failed: usize,
}

/// Periodically reconciles approval tokens against their requests.
#[derive(Debug, Clone)]
pub struct OrphanSweeper {
    store: BoundedStore,
    metrics: Option<Arc<GateMetrics>>,
}

impl OrphanSweeper {
    /// Creates a sweeper over `store`.
    #[must_use]
    pub fn new(store: BoundedStore) -> Self {
        Self {
            store,
            metrics: None,
        }
    }

    /// Attaches Prometheus metrics.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<GateMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Runs one sweep over every approval token.
    ///
    /// Failures on one token are counted and logged; they never stop the
    /// sweep. Only a failure to list tokens is returned as an error.
    pub async fn sweep(&self) -> Result<SweepReport, GateError> {
        let tokens = self.store.list_tokens().await?;
        let mut report = SweepReport::default();

        for token in tokens.iter().filter(|t| t.has_gate_type()) {
            report.scanned += 1;

            if token.deletion_requested && !token.guarded {
                // Released earlier; the remaining finalizers are not ours.
                debug!(
                    token = %token.key(),
                    finalizers = ?token.foreign_finalizers,
                    "Approval token awaiting foreign finalizers"
                );
                continue;
            }

            let reason = match self.classify(token).await {
                Ok(Some(reason)) => reason,
                Ok(None) => continue,
                Err(err) => {
                    report.failed += 1;
                    self.record_failure(&err);
                    warn!(token = %token.key(), error = %err, "Failed to check approval token");
                    continue;
                }
            };

            report.orphaned += 1;
            match self.retire(token).await {
                Ok(()) => {
                    report.removed += 1;
                    info!(
                        token = %token.key(),
                        reason = reason.as_str(),
                        "Removed orphaned approval token"
                    );
                }
                Err(err) => {
                    report.failed += 1;
                    self.record_failure(&err);
                    warn!(
                        token = %token.key(),
                        reason = reason.as_str(),
                        error = %err,
                        "Failed to remove orphaned approval token"
                    );
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_orphans_removed(report.removed as u64);
        }
        debug!(
            scanned = report.scanned,
            orphaned = report.orphaned,
            removed = report.removed,
            failed = report.failed,
            "Sweep complete"
        );
        Ok(report)
    }

    /// Decides whether `token` should be retired.
    pub async fn classify(&self, token: &ApprovalToken) -> Result<Option<OrphanReason>, GateError> {
        if token.deletion_requested {
            return Ok(Some(OrphanReason::DeletionRequested));
        }
        let Some(request) = token.request_name() else {
            return Ok(Some(OrphanReason::NoReference));
        };
        match self.store.get_request(&request).await? {
            Some(_) => Ok(None),
            None => Ok(Some(OrphanReason::RequestGone)),
        }
    }

    /// Clears the guard, persists, then deletes.
    ///
    /// Every path that removes an approval token goes through here. A token
    /// that already lost its guard (an earlier retire failed between the two
    /// steps) is deleted directly; one that vanished counts as retired.
    pub async fn retire(&self, token: &ApprovalToken) -> Result<(), GateError> {
        if token.guarded {
            let mut released = token.clone();
            released.guarded = false;
            match self.store.update_token(&released).await {
                Ok(_) | Err(StoreError::NotFound { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }
        self.store
            .delete_token(&token.namespace, &token.name)
            .await?;
        Ok(())
    }

    fn record_failure(&self, err: &GateError) {
        if let Some(metrics) = &self.metrics {
            metrics.record_reconcile_error("sweeper", err.class());
        }
    }
}
