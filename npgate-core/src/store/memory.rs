//! In-memory approval store with cluster-like concurrency semantics.
//!
//! Behaves like the API server where it matters to the gate: monotonically
//! increasing resource versions, version-checked updates, and two-phase
//! deletion of tokens that still carry finalizers. Besides backing the test
//! suites it also serves `--memory-store` local runs of the binary.
//!
//! Approver actions (`grant`, `deny`, ...) are exposed as inherent methods so
//! tests can drive the external side of the workflow.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

use super::{ApprovalStore, ResourceKind, StoreError};
use crate::approval::{ApprovalRequest, ApprovalToken, RequestCondition, keys};

type TokenKey = (String, String);

/// In-memory [`ApprovalStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Requests keyed by name
    requests: DashMap<String, ApprovalRequest>,
    /// Tokens keyed by (namespace, name)
    tokens: DashMap<TokenKey, ApprovalToken>,
    /// Source of resource versions
    version: AtomicU64,
    /// Artificial latency applied before every call, in milliseconds
    latency_ms: AtomicU64,
    /// Failures injected per operation name
    failures: DashMap<&'static str, StoreError>,
    /// Successful request creations (for testing)
    requests_created: AtomicUsize,
    /// `create_request` calls that found the name taken (for testing)
    request_collisions: AtomicUsize,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    async fn enter(&self, operation: &'static str) -> Result<(), StoreError> {
        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if let Some(err) = self.failures.get(operation) {
            debug!(operation, "MemoryStore returning injected failure");
            return Err(err.clone());
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Test controls
    // ------------------------------------------------------------------------

    /// Delays every subsequent call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::Relaxed);
    }

    /// Makes every call to `operation` fail with `err` until cleared.
    pub fn inject_failure(&self, operation: &'static str, err: StoreError) {
        self.failures.insert(operation, err);
    }

    /// Removes all injected failures.
    pub fn clear_failures(&self) {
        self.failures.clear();
    }

    /// Number of successful `create_request` calls.
    #[must_use]
    pub fn requests_created(&self) -> usize {
        self.requests_created.load(Ordering::SeqCst)
    }

    /// Number of `create_request` calls rejected with `AlreadyExists`.
    #[must_use]
    pub fn request_collisions(&self) -> usize {
        self.request_collisions.load(Ordering::SeqCst)
    }

    /// Number of stored requests.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    /// Number of stored tokens.
    #[must_use]
    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    /// Returns a stored request without going through the trait.
    #[must_use]
    pub fn request(&self, name: &str) -> Option<ApprovalRequest> {
        self.requests.get(name).map(|r| r.clone())
    }

    /// Returns a stored token without going through the trait.
    #[must_use]
    pub fn token(&self, namespace: &str, name: &str) -> Option<ApprovalToken> {
        self.tokens
            .get(&(namespace.to_string(), name.to_string()))
            .map(|t| t.clone())
    }

    /// Approves a request and issues `artifact` (pass empty to approve without signing).
    ///
    /// Returns `false` if the request does not exist.
    pub fn grant(&self, name: &str, artifact: &[u8]) -> bool {
        self.mutate_request(name, |req| {
            req.conditions.push(RequestCondition::holds(keys::CONDITION_APPROVED));
            if !artifact.is_empty() {
                req.artifact = Some(artifact.to_vec());
            }
        })
    }

    /// Issues the artifact for an already approved request.
    pub fn issue(&self, name: &str, artifact: &[u8]) -> bool {
        self.mutate_request(name, |req| req.artifact = Some(artifact.to_vec()))
    }

    /// Denies a request.
    pub fn deny(&self, name: &str) -> bool {
        self.mutate_request(name, |req| {
            req.conditions.push(RequestCondition::holds(keys::CONDITION_DENIED));
        })
    }

    /// Marks a request as failed by the signer.
    pub fn fail(&self, name: &str) -> bool {
        self.mutate_request(name, |req| {
            req.conditions.push(RequestCondition::holds(keys::CONDITION_FAILED));
        })
    }

    /// Withdraws a request regardless of version.
    pub fn remove_request(&self, name: &str) -> bool {
        self.requests.remove(name).is_some()
    }

    /// Inserts a request as-is, assigning a fresh version.
    pub fn insert_request(&self, mut request: ApprovalRequest) -> ApprovalRequest {
        request.resource_version = Some(self.next_version());
        self.requests.insert(request.name.clone(), request.clone());
        request
    }

    /// Inserts a token as-is, assigning a fresh version.
    pub fn insert_token(&self, mut token: ApprovalToken) -> ApprovalToken {
        token.resource_version = Some(self.next_version());
        self.tokens.insert(
            (token.namespace.clone(), token.name.clone()),
            token.clone(),
        );
        token
    }

    fn mutate_request(&self, name: &str, f: impl FnOnce(&mut ApprovalRequest)) -> bool {
        let version = self.next_version();
        match self.requests.get_mut(name) {
            Some(mut req) => {
                f(&mut req);
                req.resource_version = Some(version);
                true
            }
            None => false,
        }
    }
}

fn has_finalizers(token: &ApprovalToken) -> bool {
    token.guarded || !token.foreign_finalizers.is_empty()
}

#[async_trait]
impl ApprovalStore for MemoryStore {
    async fn get_request(&self, name: &str) -> Result<Option<ApprovalRequest>, StoreError> {
        self.enter("get_request").await?;
        Ok(self.request(name))
    }

    async fn create_request(&self, request: &ApprovalRequest) -> Result<ApprovalRequest, StoreError> {
        self.enter("create_request").await?;
        match self.requests.entry(request.name.clone()) {
            Entry::Occupied(_) => {
                self.request_collisions.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::AlreadyExists {
                    kind: ResourceKind::Request,
                    name: request.name.clone(),
                })
            }
            Entry::Vacant(slot) => {
                let mut stored = request.clone();
                stored.resource_version = Some(self.next_version());
                slot.insert(stored.clone());
                self.requests_created.fetch_add(1, Ordering::SeqCst);
                Ok(stored)
            }
        }
    }

    async fn delete_request(
        &self,
        name: &str,
        expected_version: Option<&str>,
    ) -> Result<(), StoreError> {
        self.enter("delete_request").await?;
        let Entry::Occupied(slot) = self.requests.entry(name.to_string()) else {
            return Ok(());
        };
        let stale = expected_version
            .is_some_and(|expected| slot.get().resource_version.as_deref() != Some(expected));
        if stale {
            return Err(StoreError::Conflict {
                kind: ResourceKind::Request,
                name: name.to_string(),
            });
        }
        slot.remove();
        Ok(())
    }

    async fn get_token(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ApprovalToken>, StoreError> {
        self.enter("get_token").await?;
        Ok(self.token(namespace, name))
    }

    async fn create_token(&self, token: &ApprovalToken) -> Result<ApprovalToken, StoreError> {
        self.enter("create_token").await?;
        match self
            .tokens
            .entry((token.namespace.clone(), token.name.clone()))
        {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists {
                kind: ResourceKind::Token,
                name: token.key(),
            }),
            Entry::Vacant(slot) => {
                let mut stored = token.clone();
                stored.deletion_requested = false;
                stored.resource_version = Some(self.next_version());
                slot.insert(stored.clone());
                Ok(stored)
            }
        }
    }

    async fn update_token(&self, token: &ApprovalToken) -> Result<ApprovalToken, StoreError> {
        self.enter("update_token").await?;
        let Entry::Occupied(mut slot) = self
            .tokens
            .entry((token.namespace.clone(), token.name.clone()))
        else {
            return Err(StoreError::NotFound {
                kind: ResourceKind::Token,
                name: token.key(),
            });
        };

        let current = slot.get();
        if token.resource_version.is_some() && token.resource_version != current.resource_version {
            return Err(StoreError::Conflict {
                kind: ResourceKind::Token,
                name: token.key(),
            });
        }
        if current.deletion_requested && token.guarded && !current.guarded {
            return Err(StoreError::Rejected {
                operation: "update_token",
                reason: "no new finalizers can be added while deletion is pending".into(),
            });
        }

        let mut stored = token.clone();
        stored.deletion_requested = current.deletion_requested;
        stored.resource_version = Some(self.next_version());

        if stored.deletion_requested && !has_finalizers(&stored) {
            slot.remove();
        } else {
            slot.insert(stored.clone());
        }
        Ok(stored)
    }

    async fn delete_token(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.enter("delete_token").await?;
        let Entry::Occupied(mut slot) = self
            .tokens
            .entry((namespace.to_string(), name.to_string()))
        else {
            return Ok(());
        };
        if has_finalizers(slot.get()) {
            let version = self.next_version();
            let token = slot.get_mut();
            token.deletion_requested = true;
            token.resource_version = Some(version);
        } else {
            slot.remove();
        }
        Ok(())
    }

    async fn list_tokens(&self) -> Result<Vec<ApprovalToken>, StoreError> {
        self.enter("list_tokens").await?;
        let mut tokens: Vec<ApprovalToken> = self
            .tokens
            .iter()
            .filter(|t| {
                t.labels
                    .get(keys::LABEL_APPROVAL)
                    .is_some_and(|v| v == "true")
            })
            .map(|t| t.clone())
            .collect();
        tokens.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        Ok(tokens)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::{Fingerprint, PolicyIdentity};

    fn token(guarded: bool) -> ApprovalToken {
        let fp = Fingerprint::parse(&"b".repeat(64)).unwrap();
        let mut t = ApprovalToken::materialize(
            &PolicyIdentity::new("default", "p"),
            "np-approval-default-p",
            "np-approval-default-p",
            &fp,
            b"cert",
        );
        t.guarded = guarded;
        t
    }

    #[tokio::test]
    async fn test_create_request_twice_conflicts() {
        let store = MemoryStore::new();
        let req = ApprovalRequest {
            name: "r".into(),
            ..ApprovalRequest::default()
        };
        let stored = store.create_request(&req).await.unwrap();
        assert!(stored.resource_version.is_some());
        assert!(matches!(
            store.create_request(&req).await,
            Err(StoreError::AlreadyExists { .. })
        ));
        assert_eq!(store.requests_created(), 1);
    }

    #[tokio::test]
    async fn test_delete_request_checks_version() {
        let store = MemoryStore::new();
        let stored = store
            .create_request(&ApprovalRequest {
                name: "r".into(),
                ..ApprovalRequest::default()
            })
            .await
            .unwrap();
        assert!(store.grant("r", b"cert"));
        let stale = stored.resource_version.as_deref();
        assert!(matches!(
            store.delete_request("r", stale).await,
            Err(StoreError::Conflict { .. })
        ));
        store.delete_request("r", None).await.unwrap();
        store.delete_request("r", None).await.unwrap();
        assert_eq!(store.request_count(), 0);
    }

    #[tokio::test]
    async fn test_update_token_rejects_stale_version() {
        let store = MemoryStore::new();
        let created = store.create_token(&token(true)).await.unwrap();
        let mut first = created.clone();
        first.guarded = false;
        store.update_token(&first).await.unwrap();

        let mut stale = created;
        stale.foreign_finalizers.push("x".into());
        assert!(matches!(
            store.update_token(&stale).await,
            Err(StoreError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_guarded_token_delete_is_two_phase() {
        let store = MemoryStore::new();
        store.create_token(&token(true)).await.unwrap();

        store.delete_token("default", "np-approval-default-p").await.unwrap();
        let pending = store.token("default", "np-approval-default-p").unwrap();
        assert!(pending.deletion_requested);

        let mut released = pending;
        released.guarded = false;
        store.update_token(&released).await.unwrap();
        assert_eq!(store.token_count(), 0);
    }

    #[tokio::test]
    async fn test_unguarded_token_delete_is_immediate() {
        let store = MemoryStore::new();
        store.create_token(&token(false)).await.unwrap();
        store.delete_token("default", "np-approval-default-p").await.unwrap();
        assert_eq!(store.token_count(), 0);
    }

    #[tokio::test]
    async fn test_guard_cannot_be_readded_during_deletion() {
        let store = MemoryStore::new();
        let mut t = token(false);
        t.foreign_finalizers.push("example.com/hold".into());
        store.create_token(&t).await.unwrap();
        store.delete_token("default", "np-approval-default-p").await.unwrap();

        let mut regrab = store.token("default", "np-approval-default-p").unwrap();
        regrab.guarded = true;
        assert!(matches!(
            store.update_token(&regrab).await,
            Err(StoreError::Rejected { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_tokens_filters_by_label() {
        let store = MemoryStore::new();
        store.create_token(&token(true)).await.unwrap();
        store.insert_token(ApprovalToken {
            namespace: "default".into(),
            name: "unrelated".into(),
            ..ApprovalToken::default()
        });
        let listed = store.list_tokens().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "np-approval-default-p");
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = MemoryStore::new();
        store.inject_failure(
            "list_tokens",
            StoreError::Unavailable {
                reason: "boom".into(),
            },
        );
        assert!(store.list_tokens().await.is_err());
        store.clear_failures();
        assert!(store.list_tokens().await.is_ok());
    }
}
