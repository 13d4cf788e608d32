//! Conversions between Kubernetes objects and gate records.
//!
//! The core never sees `k8s-openapi` types. CSRs become `ApprovalRequest`s,
//! Secrets become `ApprovalToken`s, and NetworkPolicies become
//! `PolicyObject`s at this boundary, and back.

use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use k8s_openapi::api::certificates::v1::{
    CertificateSigningRequest, CertificateSigningRequestCondition, CertificateSigningRequestSpec,
};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::admission;
use thiserror::Error;

use npgate_core::admission::Operation;
use npgate_core::approval::{
    ApprovalRequest, ApprovalToken, PolicyIdentity, PolicyObject, RequestCondition, keys,
};

/// Errors mapping a NetworkPolicy into a policy object.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// Neither the object nor the review names the policy
    #[error("NetworkPolicy has no name")]
    MissingName,

    /// Neither the object nor the review names the namespace
    #[error("NetworkPolicy {name} has no namespace")]
    MissingNamespace {
        /// Policy name
        name: String,
    },

    /// The policy body could not be encoded
    #[error("failed to encode NetworkPolicy spec: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Maps an admission operation onto the gate's.
pub fn operation(op: &admission::Operation) -> Operation {
    match op {
        admission::Operation::Create => Operation::Create,
        admission::Operation::Update => Operation::Update,
        admission::Operation::Delete => Operation::Delete,
        admission::Operation::Connect => Operation::Connect,
    }
}

/// Builds a policy object from a NetworkPolicy.
///
/// The review's namespace and name fill in for metadata that is not set yet
/// (namespace on create, name for `generateName`).
pub fn policy_object(
    policy: &NetworkPolicy,
    review_namespace: Option<&str>,
    review_name: &str,
) -> Result<PolicyObject, ConvertError> {
    let name = policy
        .metadata
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .or(Some(review_name).filter(|n| !n.is_empty()))
        .ok_or(ConvertError::MissingName)?;
    let namespace = policy
        .metadata
        .namespace
        .as_deref()
        .filter(|n| !n.is_empty())
        .or(review_namespace.filter(|n| !n.is_empty()))
        .ok_or_else(|| ConvertError::MissingNamespace {
            name: name.to_string(),
        })?;

    let spec = serde_json::to_value(policy.spec.clone().unwrap_or_default())?;
    Ok(PolicyObject::new(PolicyIdentity::new(namespace, name), spec))
}

// ============================================================================
// Certificate signing requests
// ============================================================================

/// Reads a CSR into an approval request.
pub fn request_from_csr(csr: &CertificateSigningRequest) -> ApprovalRequest {
    let meta = &csr.metadata;
    let status = csr.status.as_ref();

    let conditions = status
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| {
            conds
                .iter()
                .map(|c| RequestCondition {
                    kind: c.type_.clone(),
                    status: c.status.eq_ignore_ascii_case("true"),
                    reason: c.reason.clone(),
                    message: c.message.clone(),
                })
                .collect()
        })
        .unwrap_or_default();

    ApprovalRequest {
        name: meta.name.clone().unwrap_or_default(),
        labels: meta.labels.clone().unwrap_or_default(),
        annotations: meta.annotations.clone().unwrap_or_default(),
        payload: csr.spec.request.0.clone(),
        signer_name: csr.spec.signer_name.clone(),
        usages: csr.spec.usages.clone().unwrap_or_default(),
        conditions,
        artifact: status
            .and_then(|s| s.certificate.as_ref())
            .map(|b| b.0.clone()),
        resource_version: meta.resource_version.clone(),
    }
}

/// Renders an approval request as a CSR for creation.
///
/// Status is owned by approvers and the signer and is never written.
pub fn csr_from_request(request: &ApprovalRequest) -> CertificateSigningRequest {
    CertificateSigningRequest {
        metadata: ObjectMeta {
            name: Some(request.name.clone()),
            labels: non_empty(&request.labels),
            annotations: non_empty(&request.annotations),
            resource_version: request.resource_version.clone(),
            ..ObjectMeta::default()
        },
        spec: CertificateSigningRequestSpec {
            request: ByteString(request.payload.clone()),
            signer_name: request.signer_name.clone(),
            usages: Some(request.usages.clone()),
            ..CertificateSigningRequestSpec::default()
        },
        status: None,
    }
}

/// Renders a condition back into its Kubernetes form.
pub fn csr_condition(condition: &RequestCondition) -> CertificateSigningRequestCondition {
    CertificateSigningRequestCondition {
        type_: condition.kind.clone(),
        status: if condition.status { "True" } else { "False" }.to_string(),
        reason: condition.reason.clone(),
        message: condition.message.clone(),
        ..CertificateSigningRequestCondition::default()
    }
}

// ============================================================================
// Secrets
// ============================================================================

/// Reads a Secret into an approval token.
pub fn token_from_secret(secret: &Secret) -> ApprovalToken {
    let meta = &secret.metadata;
    let finalizers = meta.finalizers.clone().unwrap_or_default();
    let guarded = finalizers.iter().any(|f| f == keys::TOKEN_GUARD);
    let foreign_finalizers = finalizers
        .into_iter()
        .filter(|f| f != keys::TOKEN_GUARD)
        .collect();

    ApprovalToken {
        namespace: meta.namespace.clone().unwrap_or_default(),
        name: meta.name.clone().unwrap_or_default(),
        type_marker: secret.type_.clone().unwrap_or_default(),
        data: secret
            .data
            .as_ref()
            .map(|data| {
                data.iter()
                    .map(|(k, v)| (k.clone(), v.0.clone()))
                    .collect()
            })
            .unwrap_or_default(),
        labels: meta.labels.clone().unwrap_or_default(),
        annotations: meta.annotations.clone().unwrap_or_default(),
        guarded,
        foreign_finalizers,
        deletion_requested: meta.deletion_timestamp.is_some(),
        resource_version: meta.resource_version.clone(),
    }
}

/// Renders an approval token as a Secret for create or replace.
///
/// The guard is written as a finalizer alongside any foreign ones; the
/// resource version travels along so replaces are optimistic.
pub fn secret_from_token(token: &ApprovalToken) -> Secret {
    let mut finalizers = token.foreign_finalizers.clone();
    if token.guarded {
        finalizers.push(keys::TOKEN_GUARD.to_string());
    }
    let data: BTreeMap<String, ByteString> = token
        .data
        .iter()
        .map(|(k, v)| (k.clone(), ByteString(v.clone())))
        .collect();

    Secret {
        metadata: ObjectMeta {
            name: Some(token.name.clone()),
            namespace: Some(token.namespace.clone()),
            labels: non_empty(&token.labels),
            annotations: non_empty(&token.annotations),
            finalizers: Some(finalizers),
            resource_version: token.resource_version.clone(),
            ..ObjectMeta::default()
        },
        type_: Some(token.type_marker.clone()),
        data: Some(data),
        ..Secret::default()
    }
}

fn non_empty(map: &BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    if map.is_empty() {
        None
    } else {
        Some(map.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::certificates::v1::CertificateSigningRequestStatus;
    use k8s_openapi::api::networking::v1::NetworkPolicySpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, Time};
    use npgate_core::approval::{Fingerprint, RequestState};

    fn network_policy(namespace: Option<&str>, labels: BTreeMap<String, String>) -> NetworkPolicy {
        NetworkPolicy {
            metadata: ObjectMeta {
                name: Some("allow-web".into()),
                namespace: namespace.map(str::to_string),
                labels: Some(labels),
                resource_version: Some("42".into()),
                ..ObjectMeta::default()
            },
            spec: Some(NetworkPolicySpec {
                pod_selector: LabelSelector {
                    match_labels: Some(BTreeMap::from([("app".into(), "web".into())])),
                    ..LabelSelector::default()
                },
                policy_types: Some(vec!["Ingress".into()]),
                ..NetworkPolicySpec::default()
            }),
        }
    }

    #[test]
    fn test_policy_object_uses_review_namespace_as_fallback() {
        let np = network_policy(None, BTreeMap::new());
        let policy = policy_object(&np, Some("team-a"), "allow-web").unwrap();
        assert_eq!(policy.identity, PolicyIdentity::new("team-a", "allow-web"));
        assert_eq!(policy.spec["podSelector"]["matchLabels"]["app"], "web");
    }

    #[test]
    fn test_metadata_does_not_affect_fingerprint() {
        let plain = network_policy(Some("team-a"), BTreeMap::new());
        let labelled = network_policy(
            Some("team-a"),
            BTreeMap::from([("owner".into(), "alice".into())]),
        );
        let a = policy_object(&plain, None, "").unwrap().fingerprint().unwrap();
        let b = policy_object(&labelled, None, "").unwrap().fingerprint().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_policy_without_namespace_is_rejected() {
        let np = network_policy(None, BTreeMap::new());
        assert!(matches!(
            policy_object(&np, None, "allow-web"),
            Err(ConvertError::MissingNamespace { .. })
        ));
    }

    #[test]
    fn test_csr_round_trip_keeps_request_fields() {
        let identity = PolicyIdentity::new("team-a", "allow-web");
        let fp = Fingerprint::parse(&"a".repeat(64)).unwrap();
        let request = ApprovalRequest::for_policy(
            "np-approval-team-a-allow-web".into(),
            &identity,
            &fp,
            b"-----BEGIN CERTIFICATE REQUEST-----".to_vec(),
            keys::DEFAULT_SIGNER,
        );

        let csr = csr_from_request(&request);
        assert_eq!(csr.spec.signer_name, keys::DEFAULT_SIGNER);
        assert!(csr.status.is_none());

        let back = request_from_csr(&csr);
        assert_eq!(back, request);
        assert_eq!(back.target(), Some(identity));
    }

    #[test]
    fn test_csr_status_maps_conditions_and_certificate() {
        let mut csr = csr_from_request(&ApprovalRequest {
            name: "r".into(),
            ..ApprovalRequest::default()
        });
        csr.status = Some(CertificateSigningRequestStatus {
            certificate: Some(ByteString(b"cert".to_vec())),
            conditions: Some(vec![csr_condition(&RequestCondition::holds(
                keys::CONDITION_APPROVED,
            ))]),
        });

        let request = request_from_csr(&csr);
        assert_eq!(RequestState::of(&request), RequestState::Granted);
        assert_eq!(request.artifact.as_deref(), Some(&b"cert"[..]));
    }

    #[test]
    fn test_false_condition_does_not_hold() {
        let mut csr = csr_from_request(&ApprovalRequest::default());
        let mut approved = csr_condition(&RequestCondition::holds(keys::CONDITION_APPROVED));
        approved.status = "False".into();
        csr.status = Some(CertificateSigningRequestStatus {
            certificate: None,
            conditions: Some(vec![approved]),
        });
        assert_eq!(
            RequestState::of(&request_from_csr(&csr)),
            RequestState::Pending
        );
    }

    #[test]
    fn test_secret_round_trip_splits_finalizers() {
        let identity = PolicyIdentity::new("team-a", "allow-web");
        let fp = Fingerprint::parse(&"b".repeat(64)).unwrap();
        let mut token = ApprovalToken::materialize(&identity, "n", "n", &fp, b"cert");
        token.foreign_finalizers = vec!["example.com/backup".into()];

        let secret = secret_from_token(&token);
        assert_eq!(secret.type_.as_deref(), Some(keys::TOKEN_TYPE));
        let finalizers = secret.metadata.finalizers.clone().unwrap();
        assert!(finalizers.contains(&keys::TOKEN_GUARD.to_string()));
        assert!(finalizers.contains(&"example.com/backup".to_string()));

        let back = token_from_secret(&secret);
        assert_eq!(back, token);
        assert_eq!(back.fingerprint(), Some(fp));
    }

    #[test]
    fn test_long_policy_name_stays_out_of_labels() {
        // Policy names may run to 253 characters; label values stop at 63.
        let long_name = format!("allow-{}", "w".repeat(120));
        let identity = PolicyIdentity::new("team-a", &long_name);
        let fp = Fingerprint::parse(&"c".repeat(64)).unwrap();
        let name = format!("np-approval-team-a-{long_name}");
        let token = ApprovalToken::materialize(&identity, &name, &name, &fp, b"cert");

        let secret = secret_from_token(&token);
        let labels = secret.metadata.labels.clone().unwrap_or_default();
        assert!(labels.values().all(|v| v.len() <= 63), "{labels:?}");
        assert_eq!(
            labels.get(keys::LABEL_APPROVAL).map(String::as_str),
            Some("true")
        );
        let annotations = secret.metadata.annotations.clone().unwrap();
        assert_eq!(
            annotations.get(keys::ANNOTATION_TOKEN_POLICY_NAME),
            Some(&long_name)
        );
    }

    #[test]
    fn test_deletion_timestamp_marks_deletion_requested() {
        let mut secret = secret_from_token(&ApprovalToken::default());
        secret.metadata.deletion_timestamp = Some(Time(k8s_openapi::chrono::Utc::now()));
        assert!(token_from_secret(&secret).deletion_requested);
    }
}
