//! Grant materializer: turns a granted approval request into an approval token.
//!
//! Triggered per request name by the request watcher. Each call reads the
//! request fresh and converges the token towards it, so replays and
//! duplicate events are harmless.

use std::sync::Arc;
use tracing::{debug, info};

use crate::approval::{
    ApprovalToken, GrantReadiness, RequestState, request_name,
};
use crate::config::GateConfig;
use crate::error::GateError;
use crate::store::{BoundedStore, ResourceKind, StoreError};
use crate::telemetry::GateMetrics;

/// Result of one materialization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterializeOutcome {
    /// Request no longer exists
    Absent,
    /// Request is not managed by the gate
    Ignored,
    /// Request is still waiting on an approver
    Pending,
    /// Request was denied or failed; nothing to write
    Rejected(RequestState),
    /// Token written for the first time
    Created,
    /// Existing token overwritten with the granted content
    Updated,
    /// Token already reflects the grant
    Unchanged,
}

/// Writes approval tokens for granted requests.
#[derive(Debug, Clone)]
pub struct GrantMaterializer {
    store: BoundedStore,
    config: Arc<GateConfig>,
    metrics: Option<Arc<GateMetrics>>,
}

impl GrantMaterializer {
    /// Creates a materializer over `store`.
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

    /// Converges the token for `name` towards the request's current state.
    ///
    /// # Errors
    ///
    /// - `GateError::NotReady` when granted without an artifact
    /// - `GateError::Malformed` when the request lacks its identity or
    ///   fingerprint annotations, or a same-named record is not a token
    /// - `GateError::Store` on store failures, including a token whose
    ///   deletion is still in progress (retriable conflict)
    pub async fn materialize(&self, name: &str) -> Result<MaterializeOutcome, GateError> {
        let Some(request) = self.store.get_request(name).await? else {
            debug!(request = %name, "Approval request gone, nothing to materialize");
            return Ok(MaterializeOutcome::Absent);
        };

        if !request.is_gate_request() {
            return Ok(MaterializeOutcome::Ignored);
        }

        let artifact = match GrantReadiness::of(&request) {
            GrantReadiness::Pending => {
                debug!(request = %name, "Approval request pending");
                return Ok(MaterializeOutcome::Pending);
            }
            GrantReadiness::Terminal(state) => {
                info!(request = %name, state = %state, "Approval request turned down, no token written");
                return Ok(MaterializeOutcome::Rejected(state));
            }
            GrantReadiness::AwaitingArtifact => {
                return Err(GateError::NotReady {
                    request: name.to_string(),
                });
            }
            GrantReadiness::Ready(artifact) => artifact,
        };

        let subject = format!("approval request {name}");
        let identity = request.target().ok_or_else(|| {
            GateError::malformed(&subject, "missing policy name or namespace annotation")
        })?;
        let fingerprint = request.fingerprint().ok_or_else(|| {
            GateError::malformed(&subject, "missing or invalid approval-hash annotation")
        })?;
        let token_name = request_name(&self.config.naming.prefix, &identity);

        let outcome = match self
            .store
            .get_token(&identity.namespace, &token_name)
            .await?
        {
            None => {
                let token = ApprovalToken::materialize(
                    &identity,
                    &token_name,
                    name,
                    &fingerprint,
                    artifact,
                );
                match self.store.create_token(&token).await {
                    Ok(_) => MaterializeOutcome::Created,
                    Err(StoreError::AlreadyExists { .. }) => {
                        return Err(StoreError::Conflict {
                            kind: ResourceKind::Token,
                            name: token.key(),
                        }
                        .into());
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            Some(existing) => {
                if !existing.has_gate_type() {
                    return Err(GateError::malformed(
                        format!("secret {}", existing.key()),
                        format!(
                            "exists with type '{}' and cannot hold an approval",
                            existing.type_marker
                        ),
                    ));
                }
                if existing.deletion_requested {
                    // Recreate once the sweeper has finished retiring it.
                    return Err(StoreError::Conflict {
                        kind: ResourceKind::Token,
                        name: existing.key(),
                    }
                    .into());
                }

                let mut desired = existing.clone();
                desired.overwrite(&identity, name, &fingerprint, artifact);
                if desired == existing {
                    MaterializeOutcome::Unchanged
                } else {
                    self.store.update_token(&desired).await?;
                    MaterializeOutcome::Updated
                }
            }
        };

        if matches!(
            outcome,
            MaterializeOutcome::Created | MaterializeOutcome::Updated
        ) {
            info!(
                request = %name,
                policy = %identity,
                token = %token_name,
                fingerprint = %fingerprint.short(),
                updated = outcome == MaterializeOutcome::Updated,
                "Approval token materialized"
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_materialized(outcome == MaterializeOutcome::Updated);
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::{
        ApprovalRequest, Fingerprint, PolicyIdentity, keys,
    };
    use crate::error::ErrorClass;
    use crate::store::MemoryStore;

    const NAME: &str = "np-approval-default-test-policy";

    fn setup() -> (Arc<MemoryStore>, GrantMaterializer) {
        let store = Arc::new(MemoryStore::new());
        let config = Arc::new(GateConfig::default());
        let materializer =
            GrantMaterializer::new(BoundedStore::new(store.clone(), config.store.timeout), config);
        (store, materializer)
    }

    fn fingerprint() -> Fingerprint {
        Fingerprint::parse(&"d".repeat(64)).unwrap()
    }

    fn request() -> ApprovalRequest {
        ApprovalRequest::for_policy(
            NAME.into(),
            &PolicyIdentity::new("default", "test-policy"),
            &fingerprint(),
            b"pem".to_vec(),
            keys::DEFAULT_SIGNER,
        )
    }

    #[tokio::test]
    async fn test_unlabeled_request_is_ignored() {
        let (store, materializer) = setup();
        let mut req = request();
        req.labels.clear();
        store.insert_request(req);
        store.grant(NAME, b"cert");
        assert_eq!(
            materializer.materialize(NAME).await.unwrap(),
            MaterializeOutcome::Ignored
        );
        assert_eq!(store.token_count(), 0);
    }

    #[tokio::test]
    async fn test_absent_request() {
        let (_, materializer) = setup();
        assert_eq!(
            materializer.materialize(NAME).await.unwrap(),
            MaterializeOutcome::Absent
        );
    }

    #[tokio::test]
    async fn test_pending_request_writes_nothing() {
        let (store, materializer) = setup();
        store.insert_request(request());
        assert_eq!(
            materializer.materialize(NAME).await.unwrap(),
            MaterializeOutcome::Pending
        );
        assert_eq!(store.token_count(), 0);
    }

    #[tokio::test]
    async fn test_granted_request_creates_guarded_token() {
        let (store, materializer) = setup();
        store.insert_request(request());
        store.grant(NAME, b"cert");

        assert_eq!(
            materializer.materialize(NAME).await.unwrap(),
            MaterializeOutcome::Created
        );
        let token = store.token("default", NAME).unwrap();
        assert!(token.guarded);
        assert!(token.has_gate_type());
        assert_eq!(token.fingerprint(), Some(fingerprint()));
        assert_eq!(token.artifact(), Some(&b"cert"[..]));
        assert_eq!(token.request_name().as_deref(), Some(NAME));

        assert_eq!(
            materializer.materialize(NAME).await.unwrap(),
            MaterializeOutcome::Unchanged
        );
    }

    #[tokio::test]
    async fn test_existing_token_is_overwritten() {
        let (store, materializer) = setup();
        let old = Fingerprint::parse(&"0".repeat(64)).unwrap();
        store.insert_token(ApprovalToken::materialize(
            &PolicyIdentity::new("default", "test-policy"),
            NAME,
            "older-request",
            &old,
            b"old-cert",
        ));
        store.insert_request(request());
        store.grant(NAME, b"new-cert");

        assert_eq!(
            materializer.materialize(NAME).await.unwrap(),
            MaterializeOutcome::Updated
        );
        let token = store.token("default", NAME).unwrap();
        assert_eq!(token.fingerprint(), Some(fingerprint()));
        assert_eq!(token.artifact(), Some(&b"new-cert"[..]));
        assert_eq!(token.request_name().as_deref(), Some(NAME));
    }

    #[tokio::test]
    async fn test_granted_without_artifact_is_not_ready() {
        let (store, materializer) = setup();
        store.insert_request(request());
        store.grant(NAME, b"");

        let err = materializer.materialize(NAME).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::NotReady);

        store.issue(NAME, b"cert");
        assert_eq!(
            materializer.materialize(NAME).await.unwrap(),
            MaterializeOutcome::Created
        );
    }

    #[tokio::test]
    async fn test_missing_annotations_is_permanent() {
        let (store, materializer) = setup();
        let mut req = request();
        req.annotations.remove(keys::ANNOTATION_POLICY_NAMESPACE);
        store.insert_request(req);
        store.grant(NAME, b"cert");

        let err = materializer.materialize(NAME).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Permanent);
        assert_eq!(store.token_count(), 0);
    }

    #[tokio::test]
    async fn test_denied_request_writes_nothing() {
        let (store, materializer) = setup();
        store.insert_request(request());
        store.deny(NAME);
        assert_eq!(
            materializer.materialize(NAME).await.unwrap(),
            MaterializeOutcome::Rejected(RequestState::Denied)
        );
        assert_eq!(store.token_count(), 0);
    }

    #[tokio::test]
    async fn test_token_being_deleted_is_retried() {
        let (store, materializer) = setup();
        let mut token = ApprovalToken::materialize(
            &PolicyIdentity::new("default", "test-policy"),
            NAME,
            NAME,
            &fingerprint(),
            b"cert",
        );
        token.deletion_requested = true;
        store.insert_token(token);
        store.insert_request(request());
        store.grant(NAME, b"cert");

        let err = materializer.materialize(NAME).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Transient);
    }

    #[tokio::test]
    async fn test_foreign_secret_is_not_clobbered() {
        let (store, materializer) = setup();
        store.insert_token(ApprovalToken {
            namespace: "default".into(),
            name: NAME.into(),
            type_marker: "Opaque".into(),
            ..ApprovalToken::default()
        });
        store.insert_request(request());
        store.grant(NAME, b"cert");

        let err = materializer.materialize(NAME).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Permanent);
        assert_eq!(store.token("default", NAME).unwrap().type_marker, "Opaque");
    }
}
