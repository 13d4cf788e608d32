//! Storage abstraction for approval requests and approval tokens.
//!
//! The gate never talks to the cluster directly. Everything goes through
//! [`ApprovalStore`], implemented by [`MemoryStore`] here and by the
//! Kubernetes-backed adapter in the binary crate.
//!
//! ## Semantics every implementation must provide
//!
//! - Reads return `Ok(None)` for absent objects; not-found is never an error.
//! - `create_*` fails with `AlreadyExists` if the name is taken.
//! - `update_token` and `delete_request` with an expected version fail with
//!   `Conflict` when the stored version differs.
//! - Deleting a guarded token only marks it `deletion_requested`; the token
//!   disappears once an update clears the guard.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::approval::{ApprovalRequest, ApprovalToken};

// ============================================================================
// Store Errors
// ============================================================================

/// Kind of record a store operation touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Certificate signing request
    Request,
    /// Approval secret
    Token,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Request => "approval request",
            Self::Token => "approval token",
        })
    }
}

/// Errors from approval stores.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Object vanished between read and write
    #[error("{kind} {name} not found")]
    NotFound {
        /// Kind of record
        kind: ResourceKind,
        /// Record name
        name: String,
    },

    /// Create collided with an existing object
    #[error("{kind} {name} already exists")]
    AlreadyExists {
        /// Kind of record
        kind: ResourceKind,
        /// Record name
        name: String,
    },

    /// Stored version differs from the one the caller read
    #[error("{kind} {name} was modified concurrently")]
    Conflict {
        /// Kind of record
        kind: ResourceKind,
        /// Record name
        name: String,
    },

    /// Call exceeded its time budget
    #[error("store operation {operation} timed out after {after:?}")]
    Timeout {
        /// Operation name
        operation: &'static str,
        /// Budget that was exceeded
        after: Duration,
    },

    /// Backend unreachable or returned a server error
    #[error("store unavailable: {reason}")]
    Unavailable {
        /// Description of the failure
        reason: String,
    },

    /// Backend refused the request (validation, authorization)
    #[error("store rejected {operation}: {reason}")]
    Rejected {
        /// Operation name
        operation: &'static str,
        /// Description of the rejection
        reason: String,
    },
}

impl StoreError {
    /// Returns whether retrying the same call may succeed.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Conflict { .. }
            | Self::Timeout { .. }
            | Self::Unavailable { .. }
            | Self::NotFound { .. } => true,
            Self::AlreadyExists { .. } | Self::Rejected { .. } => false,
        }
    }
}

// ============================================================================
// Store Trait
// ============================================================================

/// Durable storage for approval requests (cluster-scoped) and tokens (namespaced).
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    /// Reads a request by name.
    async fn get_request(&self, name: &str) -> Result<Option<ApprovalRequest>, StoreError>;

    /// Creates a request; fails with `AlreadyExists` if the name is taken.
    async fn create_request(&self, request: &ApprovalRequest) -> Result<ApprovalRequest, StoreError>;

    /// Deletes a request, optionally only if its version still matches.
    ///
    /// Deleting an absent request succeeds.
    async fn delete_request(&self, name: &str, expected_version: Option<&str>)
    -> Result<(), StoreError>;

    /// Reads a token by namespace and name.
    async fn get_token(&self, namespace: &str, name: &str)
    -> Result<Option<ApprovalToken>, StoreError>;

    /// Creates a token; fails with `AlreadyExists` if the name is taken.
    async fn create_token(&self, token: &ApprovalToken) -> Result<ApprovalToken, StoreError>;

    /// Replaces a token, checking `token.resource_version`.
    async fn update_token(&self, token: &ApprovalToken) -> Result<ApprovalToken, StoreError>;

    /// Requests deletion of a token. Absent tokens are not an error.
    async fn delete_token(&self, namespace: &str, name: &str) -> Result<(), StoreError>;

    /// Lists every token carrying the approval label, across namespaces.
    async fn list_tokens(&self) -> Result<Vec<ApprovalToken>, StoreError>;

    /// Returns the store name for logging.
    fn name(&self) -> &'static str;
}

// ============================================================================
// Bounded Store
// ============================================================================

/// Wraps a store so every call runs under the same time budget.
///
/// An elapsed budget surfaces as a retriable `StoreError::Timeout`.
#[derive(Clone)]
pub struct BoundedStore {
    inner: Arc<dyn ApprovalStore>,
    timeout: Duration,
}

impl fmt::Debug for BoundedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedStore")
            .field("store", &self.inner.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl BoundedStore {
    /// Wraps `inner` with a per-call `timeout`.
    #[must_use]
    pub fn new(inner: Arc<dyn ApprovalStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// Per-call budget.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Name of the wrapped backend.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                operation,
                after: self.timeout,
            }),
        }
    }

    /// See [`ApprovalStore::get_request`].
    pub async fn get_request(&self, name: &str) -> Result<Option<ApprovalRequest>, StoreError> {
        self.bounded("get_request", self.inner.get_request(name))
            .await
    }

    /// See [`ApprovalStore::create_request`].
    pub async fn create_request(
        &self,
        request: &ApprovalRequest,
    ) -> Result<ApprovalRequest, StoreError> {
        self.bounded("create_request", self.inner.create_request(request))
            .await
    }

    /// See [`ApprovalStore::delete_request`].
    pub async fn delete_request(
        &self,
        name: &str,
        expected_version: Option<&str>,
    ) -> Result<(), StoreError> {
        self.bounded(
            "delete_request",
            self.inner.delete_request(name, expected_version),
        )
        .await
    }

    /// See [`ApprovalStore::get_token`].
    pub async fn get_token(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ApprovalToken>, StoreError> {
        self.bounded("get_token", self.inner.get_token(namespace, name))
            .await
    }

    /// See [`ApprovalStore::create_token`].
    pub async fn create_token(&self, token: &ApprovalToken) -> Result<ApprovalToken, StoreError> {
        self.bounded("create_token", self.inner.create_token(token))
            .await
    }

    /// See [`ApprovalStore::update_token`].
    pub async fn update_token(&self, token: &ApprovalToken) -> Result<ApprovalToken, StoreError> {
        self.bounded("update_token", self.inner.update_token(token))
            .await
    }

    /// See [`ApprovalStore::delete_token`].
    pub async fn delete_token(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.bounded("delete_token", self.inner.delete_token(namespace, name))
            .await
    }

    /// See [`ApprovalStore::list_tokens`].
    pub async fn list_tokens(&self) -> Result<Vec<ApprovalToken>, StoreError> {
        self.bounded("list_tokens", self.inner.list_tokens()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        let conflict = StoreError::Conflict {
            kind: ResourceKind::Token,
            name: "x".into(),
        };
        let rejected = StoreError::Rejected {
            operation: "create_request",
            reason: "forbidden".into(),
        };
        assert!(conflict.is_retriable());
        assert!(!rejected.is_retriable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_store_times_out() {
        let memory = Arc::new(MemoryStore::new());
        memory.set_latency(Duration::from_secs(10));
        let store = BoundedStore::new(memory, Duration::from_secs(1));

        let err = store.get_request("anything").await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Timeout {
                operation: "get_request",
                ..
            }
        ));
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn test_bounded_store_passes_through() {
        let store = BoundedStore::new(Arc::new(MemoryStore::new()), Duration::from_secs(1));
        assert!(store.get_request("absent").await.unwrap().is_none());
        assert!(store.list_tokens().await.unwrap().is_empty());
    }
}
