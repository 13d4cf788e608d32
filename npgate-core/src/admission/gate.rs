//! The admission gate.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{AdmissionDecision, DecisionReason, Operation, RequestOutcome, TokenVerdict};
use crate::approval::{
    ApprovalRequest, ApprovalToken, Fingerprint, PolicyIdentity, PolicyObject, RequestState,
    certificate_request_pem, request_name,
};
use crate::config::GateConfig;
use crate::error::GateError;
use crate::store::{BoundedStore, StoreError};
use crate::telemetry::GateMetrics;

/// Decides whether a network policy mutation may proceed.
///
/// Holds no per-policy state: every call reads the token and request fresh,
/// so any number of concurrent admissions are safe.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    store: BoundedStore,
    config: Arc<GateConfig>,
    metrics: Option<Arc<GateMetrics>>,
}

impl AdmissionGate {
    /// Creates a gate over `store`.
    #[must_use]
    pub fn new(store: BoundedStore, config: Arc<GateConfig>) -> Self {
        Self {
            store,
            config,
            metrics: None,
        }
    }

    /// Attaches Prometheus metrics.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<GateMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Reviews one mutation under the configured admission deadline.
    ///
    /// Never returns an error: failures deny.
    pub async fn admit(
        &self,
        operation: Operation,
        old: Option<&PolicyObject>,
        new: Option<&PolicyObject>,
    ) -> AdmissionDecision {
        self.admit_within(operation, old, new, self.config.admission.timeout)
            .await
    }

    /// Reviews one mutation under an explicit deadline.
    ///
    /// The caller's deadline (the API server's webhook timeout) may be shorter
    /// than the configured one; the smaller wins.
    pub async fn admit_within(
        &self,
        operation: Operation,
        old: Option<&PolicyObject>,
        new: Option<&PolicyObject>,
        budget: Duration,
    ) -> AdmissionDecision {
        let started = Instant::now();
        let budget = budget.min(self.config.admission.timeout);
        let decision = self.decide(operation, old, new, budget).await;

        if let Some(metrics) = &self.metrics {
            metrics.record_admission(
                operation.as_str(),
                decision.allowed,
                decision.reason.as_str(),
                started.elapsed(),
            );
        }
        decision
    }

    async fn decide(
        &self,
        operation: Operation,
        old: Option<&PolicyObject>,
        new: Option<&PolicyObject>,
        budget: Duration,
    ) -> AdmissionDecision {
        if !operation.is_gated() {
            if let Some(policy) = old.or(new) {
                debug!(
                    policy = %policy.identity,
                    operation = %operation,
                    "Allowing ungated operation"
                );
            }
            return AdmissionDecision::allow(DecisionReason::Ungated);
        }

        let Some(policy) = new else {
            warn!(operation = %operation, "Admission review carries no object");
            return AdmissionDecision::deny(
                DecisionReason::Error,
                format!("{operation} review carries no NetworkPolicy object"),
            );
        };

        if self.config.is_excluded(&policy.identity.namespace) {
            info!(
                policy = %policy.identity,
                operation = %operation,
                "Namespace excluded from approval, allowing"
            );
            return AdmissionDecision::allow(DecisionReason::Excluded);
        }

        match tokio::time::timeout(budget, self.evaluate(policy)).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(err)) => {
                warn!(
                    policy = %policy.identity,
                    operation = %operation,
                    error = %err,
                    "Admission failed, denying"
                );
                AdmissionDecision::deny(
                    DecisionReason::Error,
                    format!(
                        "NetworkPolicy {} could not be checked for approval: {err}",
                        policy.identity
                    ),
                )
            }
            Err(_) => {
                let err = GateError::DeadlineExceeded(budget);
                warn!(
                    policy = %policy.identity,
                    operation = %operation,
                    error = %err,
                    "Admission deadline exceeded, denying"
                );
                AdmissionDecision::deny(
                    DecisionReason::Error,
                    format!(
                        "NetworkPolicy {} could not be checked for approval: {err}",
                        policy.identity
                    ),
                )
            }
        }
    }

    async fn evaluate(&self, policy: &PolicyObject) -> Result<AdmissionDecision, GateError> {
        let fingerprint = policy.fingerprint()?;
        let name = request_name(&self.config.naming.prefix, &policy.identity);

        let token = self
            .store
            .get_token(&policy.identity.namespace, &name)
            .await?;
        let verdict = verify_token(token.as_ref(), &fingerprint);

        if verdict == TokenVerdict::Approved {
            debug!(
                policy = %policy.identity,
                fingerprint = %fingerprint.short(),
                "Fingerprint approved, allowing"
            );
            return Ok(AdmissionDecision::allow(DecisionReason::Approved));
        }

        let outcome = self
            .ensure_request(&name, &policy.identity, &fingerprint)
            .await?;

        info!(
            policy = %policy.identity,
            fingerprint = %fingerprint.short(),
            verdict = verdict.as_str(),
            request = %name,
            outcome = outcome.as_str(),
            "NetworkPolicy not approved, denying"
        );

        Ok(denial(&policy.identity, &name, verdict, &outcome))
    }

    /// Makes sure a request vouching for `fingerprint` exists under `name`.
    ///
    /// Store read failures propagate; creation failures are folded into the
    /// outcome so the denial can report them.
    async fn ensure_request(
        &self,
        name: &str,
        identity: &PolicyIdentity,
        fingerprint: &Fingerprint,
    ) -> Result<RequestOutcome, GateError> {
        let Some(existing) = self.store.get_request(name).await? else {
            return self.create_request(name, identity, fingerprint, false).await;
        };

        if !existing.is_gate_request() {
            return Ok(RequestOutcome::Foreign);
        }

        if existing.fingerprint().as_ref() == Some(fingerprint) {
            return Ok(existing_outcome(&existing));
        }

        // Stale request for other content. Replace it rather than re-annotate:
        // a granted request must never come to vouch for a new fingerprint.
        info!(
            request = %name,
            policy = %identity,
            state = %RequestState::of(&existing),
            "Superseding approval request for outdated content"
        );
        match self
            .store
            .delete_request(name, existing.resource_version.as_deref())
            .await
        {
            Ok(()) => {}
            Err(err @ StoreError::Conflict { .. }) => {
                // Lost the race to another admission; fine if it filed our content.
                return Ok(match self.store.get_request(name).await? {
                    Some(current)
                        if current.is_gate_request()
                            && current.fingerprint().as_ref() == Some(fingerprint) =>
                    {
                        debug!(request = %name, "Approval request superseded concurrently");
                        existing_outcome(&current)
                    }
                    _ => RequestOutcome::CreateFailed(err.to_string()),
                });
            }
            Err(err) => return Err(err.into()),
        }
        self.create_request(name, identity, fingerprint, true).await
    }

    async fn create_request(
        &self,
        name: &str,
        identity: &PolicyIdentity,
        fingerprint: &Fingerprint,
        superseding: bool,
    ) -> Result<RequestOutcome, GateError> {
        let payload = certificate_request_pem(name)?;
        let request = ApprovalRequest::for_policy(
            name.to_string(),
            identity,
            fingerprint,
            payload,
            &self.config.approval.signer_name,
        );

        match self.store.create_request(&request).await {
            Ok(_) => {
                info!(
                    request = %name,
                    policy = %identity,
                    fingerprint = %fingerprint.short(),
                    "Created approval request"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_request_created(superseding);
                }
                Ok(if superseding {
                    RequestOutcome::Superseded
                } else {
                    RequestOutcome::Created
                })
            }
            Err(StoreError::AlreadyExists { .. }) => {
                debug!(request = %name, "Approval request created concurrently");
                Ok(RequestOutcome::Created)
            }
            Err(err) => {
                warn!(request = %name, error = %err, "Failed to create approval request");
                Ok(RequestOutcome::CreateFailed(err.to_string()))
            }
        }
    }
}

/// Outcome for a gate request that already vouches for the candidate.
fn existing_outcome(request: &ApprovalRequest) -> RequestOutcome {
    match RequestState::of(request) {
        RequestState::Pending => RequestOutcome::Pending,
        RequestState::Granted => RequestOutcome::Granted,
        state @ (RequestState::Denied | RequestState::Failed) => RequestOutcome::Rejected(state),
    }
}

/// Checks a stored token against the candidate fingerprint.
#[must_use]
pub fn verify_token(token: Option<&ApprovalToken>, candidate: &Fingerprint) -> TokenVerdict {
    let Some(token) = token else {
        return TokenVerdict::Missing;
    };
    if !token.has_gate_type() {
        return TokenVerdict::WrongType;
    }
    if token.fingerprint().as_ref() != Some(candidate) {
        return TokenVerdict::Drifted;
    }
    if token.artifact().is_none() {
        return TokenVerdict::MissingArtifact;
    }
    TokenVerdict::Approved
}

fn denial(
    identity: &PolicyIdentity,
    name: &str,
    verdict: TokenVerdict,
    outcome: &RequestOutcome,
) -> AdmissionDecision {
    let lead = if verdict == TokenVerdict::Drifted {
        format!("NetworkPolicy {identity} has changed since it was last approved.")
    } else {
        format!("NetworkPolicy {identity} has not been approved yet.")
    };

    let (reason, hint) = match outcome {
        RequestOutcome::Created | RequestOutcome::Pending | RequestOutcome::Superseded => (
            DecisionReason::NotApproved,
            format!(
                "Approval request created: {name}. Please ask an administrator to approve the request"
            ),
        ),
        RequestOutcome::Granted => (
            DecisionReason::NotApproved,
            format!(
                "Approval request {name} has been approved and its approval token is being issued. Retry shortly"
            ),
        ),
        RequestOutcome::Rejected(state) => (
            DecisionReason::Rejected,
            format!(
                "Approval request {name} for this content was {state}. Ask an administrator to delete it to request approval again"
            ),
        ),
        RequestOutcome::Foreign => (
            DecisionReason::Error,
            format!(
                "Approval request name {name} is taken by a request not managed by the approval gate"
            ),
        ),
        RequestOutcome::CreateFailed(err) => (
            DecisionReason::Error,
            format!("Failed to create approval request {name}: {err}"),
        ),
    };

    AdmissionDecision::deny(reason, format!("{lead} {hint}")).with_request(name)
}
