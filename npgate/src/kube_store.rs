//! Kubernetes-backed approval store.
//!
//! Approval requests are `certificates.k8s.io/v1` CertificateSigningRequests
//! (cluster-scoped); approval tokens are Secrets in the policy's namespace.
//! API status codes are mapped onto `StoreError` so the core can classify
//! them; 404 on reads becomes `Ok(None)`.

use async_trait::async_trait;
use k8s_openapi::api::certificates::v1::CertificateSigningRequest;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, ListParams, PostParams, Preconditions};
use kube::{Client, Error as KubeError};
use tracing::debug;

use npgate_core::approval::{ApprovalRequest, ApprovalToken, keys};
use npgate_core::store::{ApprovalStore, ResourceKind, StoreError};

use crate::convert::{csr_from_request, request_from_csr, secret_from_token, token_from_secret};

/// [`ApprovalStore`] over the Kubernetes API.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    requests: Api<CertificateSigningRequest>,
}

impl KubeStore {
    /// Creates a store using `client`.
    pub fn new(client: Client) -> Self {
        Self {
            requests: Api::all(client.clone()),
            client,
        }
    }

    fn tokens(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Label selector shared by approval requests and approval tokens.
    pub fn approval_selector() -> String {
        format!("{}=true", keys::LABEL_APPROVAL)
    }
}

/// Classifies a Kubernetes client error.
///
/// - 404 → NotFound
/// - 409 with reason `AlreadyExists` → AlreadyExists, other 409 → Conflict
/// - 400/403/422 → Rejected (RBAC, admission, validation)
/// - 429, 5xx, transport failures → Unavailable
pub fn classify_api_error(
    err: KubeError,
    operation: &'static str,
    kind: ResourceKind,
    name: &str,
) -> StoreError {
    let KubeError::Api(response) = err else {
        return StoreError::Unavailable {
            reason: format!("{operation}: {err}"),
        };
    };
    match response.code {
        404 => StoreError::NotFound {
            kind,
            name: name.to_string(),
        },
        409 if response.reason == "AlreadyExists" => StoreError::AlreadyExists {
            kind,
            name: name.to_string(),
        },
        409 => StoreError::Conflict {
            kind,
            name: name.to_string(),
        },
        400 | 403 | 422 => StoreError::Rejected {
            operation,
            reason: response.message,
        },
        _ => StoreError::Unavailable {
            reason: format!("{operation}: HTTP {}: {}", response.code, response.message),
        },
    }
}

/// A cluster-wide list has no single object to name.
fn list_tokens_error(err: KubeError) -> StoreError {
    classify_api_error(err, "list_tokens", ResourceKind::Token, "*")
}

fn is_not_found(err: &KubeError) -> bool {
    matches!(err, KubeError::Api(response) if response.code == 404)
}

#[async_trait]
impl ApprovalStore for KubeStore {
    async fn get_request(&self, name: &str) -> Result<Option<ApprovalRequest>, StoreError> {
        self.requests
            .get_opt(name)
            .await
            .map(|csr| csr.as_ref().map(request_from_csr))
            .map_err(|e| classify_api_error(e, "get_request", ResourceKind::Request, name))
    }

    async fn create_request(&self, request: &ApprovalRequest) -> Result<ApprovalRequest, StoreError> {
        let mut csr = csr_from_request(request);
        csr.metadata.resource_version = None;
        self.requests
            .create(&PostParams::default(), &csr)
            .await
            .map(|created| request_from_csr(&created))
            .map_err(|e| {
                classify_api_error(e, "create_request", ResourceKind::Request, &request.name)
            })
    }

    async fn delete_request(
        &self,
        name: &str,
        expected_version: Option<&str>,
    ) -> Result<(), StoreError> {
        let params = DeleteParams {
            preconditions: expected_version.map(|v| Preconditions {
                resource_version: Some(v.to_string()),
                uid: None,
            }),
            ..DeleteParams::default()
        };
        match self.requests.delete(name, &params).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                debug!(request = %name, "Approval request already gone");
                Ok(())
            }
            Err(e) => Err(classify_api_error(
                e,
                "delete_request",
                ResourceKind::Request,
                name,
            )),
        }
    }

    async fn get_token(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ApprovalToken>, StoreError> {
        self.tokens(namespace)
            .get_opt(name)
            .await
            .map(|secret| secret.as_ref().map(token_from_secret))
            .map_err(|e| {
                classify_api_error(
                    e,
                    "get_token",
                    ResourceKind::Token,
                    &format!("{namespace}/{name}"),
                )
            })
    }

    async fn create_token(&self, token: &ApprovalToken) -> Result<ApprovalToken, StoreError> {
        let mut secret = secret_from_token(token);
        secret.metadata.resource_version = None;
        self.tokens(&token.namespace)
            .create(&PostParams::default(), &secret)
            .await
            .map(|created| token_from_secret(&created))
            .map_err(|e| classify_api_error(e, "create_token", ResourceKind::Token, &token.key()))
    }

    async fn update_token(&self, token: &ApprovalToken) -> Result<ApprovalToken, StoreError> {
        let secret = secret_from_token(token);
        self.tokens(&token.namespace)
            .replace(&token.name, &PostParams::default(), &secret)
            .await
            .map(|updated| token_from_secret(&updated))
            .map_err(|e| classify_api_error(e, "update_token", ResourceKind::Token, &token.key()))
    }

    async fn delete_token(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        match self
            .tokens(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(classify_api_error(
                e,
                "delete_token",
                ResourceKind::Token,
                &format!("{namespace}/{name}"),
            )),
        }
    }

    async fn list_tokens(&self) -> Result<Vec<ApprovalToken>, StoreError> {
        let all: Api<Secret> = Api::all(self.client.clone());
        let params = ListParams::default().labels(&Self::approval_selector());
        let list = all.list(&params).await.map_err(list_tokens_error)?;
        Ok(list.items.iter().map(token_from_secret).collect())
    }

    fn name(&self) -> &'static str {
        "kubernetes"
    }
}
