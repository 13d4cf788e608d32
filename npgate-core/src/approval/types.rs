//! Domain records exchanged between the gate, the store and the reconcilers.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use super::fingerprint::{Fingerprint, FingerprintError, fingerprint};
use super::keys;

// ============================================================================
// Policy
// ============================================================================

/// Namespace and name of a network policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolicyIdentity {
    /// Namespace the policy lives in
    pub namespace: String,
    /// Policy name, unique within its namespace
    pub name: String,
}

impl PolicyIdentity {
    /// Creates an identity from namespace and name.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PolicyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A network policy as seen by the gate: identity plus opaque `spec` content.
///
/// Metadata other than identity (labels, annotations, resource version) is
/// deliberately absent so it can never leak into the fingerprint.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyObject {
    /// Where the policy lives
    pub identity: PolicyIdentity,
    /// The policy's `spec`, as decoded from the admission payload
    pub spec: Value,
}

impl PolicyObject {
    /// Creates a policy object.
    pub fn new(identity: PolicyIdentity, spec: Value) -> Self {
        Self { identity, spec }
    }

    /// Computes this policy's content fingerprint.
    ///
    /// # Errors
    ///
    /// Returns `FingerprintError` if the policy content cannot be encoded.
    pub fn fingerprint(&self) -> Result<Fingerprint, FingerprintError> {
        fingerprint(&self.identity, &self.spec)
    }
}

// ============================================================================
// Approval Request
// ============================================================================

/// One status condition on an approval request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestCondition {
    /// Condition type (`Approved`, `Denied`, `Failed`)
    pub kind: String,
    /// Whether the condition holds
    pub status: bool,
    /// Machine-readable reason
    pub reason: Option<String>,
    /// Human-readable message
    pub message: Option<String>,
}

impl RequestCondition {
    /// Creates a condition that holds.
    pub fn holds(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            status: true,
            reason: None,
            message: None,
        }
    }
}

/// Out-of-band request asking an approver to vouch for one fingerprint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApprovalRequest {
    /// Cluster-scoped name, derived from the policy identity
    pub name: String,
    /// Labels; the approval label marks gate-owned requests
    pub labels: BTreeMap<String, String>,
    /// Annotations carrying the fingerprint and target identity
    pub annotations: BTreeMap<String, String>,
    /// PEM-encoded PKCS#10 certificate request
    pub payload: Vec<u8>,
    /// Signer expected to issue the artifact
    pub signer_name: String,
    /// Requested key usages
    pub usages: Vec<String>,
    /// Status conditions set by approvers and the signer
    pub conditions: Vec<RequestCondition>,
    /// Signed artifact, present once the signer has issued it
    pub artifact: Option<Vec<u8>>,
    /// Opaque version for guarded deletes; `None` before first persist
    pub resource_version: Option<String>,
}

impl ApprovalRequest {
    /// Builds a fresh request vouching for `fingerprint` on behalf of `identity`.
    #[must_use]
    pub fn for_policy(
        name: String,
        identity: &PolicyIdentity,
        fingerprint: &Fingerprint,
        payload: Vec<u8>,
        signer_name: &str,
    ) -> Self {
        let labels = BTreeMap::from([(keys::LABEL_APPROVAL.to_string(), "true".to_string())]);
        let annotations = BTreeMap::from([
            (
                keys::ANNOTATION_APPROVAL_HASH.to_string(),
                fingerprint.to_string(),
            ),
            (
                keys::ANNOTATION_POLICY_NAME.to_string(),
                identity.name.clone(),
            ),
            (
                keys::ANNOTATION_POLICY_NAMESPACE.to_string(),
                identity.namespace.clone(),
            ),
        ]);
        Self {
            name,
            labels,
            annotations,
            payload,
            signer_name: signer_name.to_string(),
            usages: keys::REQUEST_USAGES.iter().map(ToString::to_string).collect(),
            conditions: Vec::new(),
            artifact: None,
            resource_version: None,
        }
    }

    /// Whether the request carries the approval label.
    #[must_use]
    pub fn is_gate_request(&self) -> bool {
        self.labels
            .get(keys::LABEL_APPROVAL)
            .is_some_and(|v| v == "true")
    }

    /// Fingerprint this request vouches for, if the annotation is well-formed.
    #[must_use]
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.annotations
            .get(keys::ANNOTATION_APPROVAL_HASH)
            .and_then(|raw| Fingerprint::parse(raw))
    }

    /// Policy this request targets, if both identity annotations are present.
    #[must_use]
    pub fn target(&self) -> Option<PolicyIdentity> {
        let name = self.annotations.get(keys::ANNOTATION_POLICY_NAME)?;
        let namespace = self.annotations.get(keys::ANNOTATION_POLICY_NAMESPACE)?;
        if name.is_empty() || namespace.is_empty() {
            return None;
        }
        Some(PolicyIdentity::new(namespace.clone(), name.clone()))
    }

    /// Whether a condition of `kind` is present and holds.
    #[must_use]
    pub fn has_condition(&self, kind: &str) -> bool {
        self.conditions.iter().any(|c| c.kind == kind && c.status)
    }
}

// ============================================================================
// Approval Token
// ============================================================================

/// Durable record that a fingerprint was approved for one policy identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApprovalToken {
    /// Namespace of the governed policy
    pub namespace: String,
    /// Token name, equal to the originating request name
    pub name: String,
    /// Type marker; only `networkpolicy.webhook.io/approval` is trusted
    pub type_marker: String,
    /// Data map holding fingerprint, artifact and request cross-reference
    pub data: BTreeMap<String, Vec<u8>>,
    /// Labels used to list tokens
    pub labels: BTreeMap<String, String>,
    /// Annotations cross-referencing request and policy
    pub annotations: BTreeMap<String, String>,
    /// Whether the protection finalizer is attached
    pub guarded: bool,
    /// Finalizers owned by other controllers, preserved verbatim
    pub foreign_finalizers: Vec<String>,
    /// Set once a delete has been requested while finalizers remain
    pub deletion_requested: bool,
    /// Opaque version for optimistic updates; `None` before first persist
    pub resource_version: Option<String>,
}

impl ApprovalToken {
    /// Builds a guarded token recording that `request` was granted with `artifact`.
    #[must_use]
    pub fn materialize(
        identity: &PolicyIdentity,
        name: &str,
        request_name: &str,
        fingerprint: &Fingerprint,
        artifact: &[u8],
    ) -> Self {
        let mut token = Self {
            namespace: identity.namespace.clone(),
            name: name.to_string(),
            ..Self::default()
        };
        token.overwrite(identity, request_name, fingerprint, artifact);
        token
    }

    /// Overwrites everything a grant controls, keeping version and foreign finalizers.
    ///
    /// The previous fingerprint and artifact are discarded, never merged.
    pub fn overwrite(
        &mut self,
        identity: &PolicyIdentity,
        request_name: &str,
        fingerprint: &Fingerprint,
        artifact: &[u8],
    ) {
        self.type_marker = keys::TOKEN_TYPE.to_string();
        self.data = BTreeMap::from([
            (keys::DATA_HASH.to_string(), fingerprint.as_str().as_bytes().to_vec()),
            (keys::DATA_CERTIFICATE.to_string(), artifact.to_vec()),
            (keys::DATA_REQUEST_NAME.to_string(), request_name.as_bytes().to_vec()),
        ]);
        self.labels
            .insert(keys::LABEL_APPROVAL.to_string(), "true".to_string());
        self.annotations
            .insert(keys::ANNOTATION_REQUEST_NAME.to_string(), request_name.to_string());
        self.annotations.insert(
            keys::ANNOTATION_APPROVAL_HASH.to_string(),
            fingerprint.to_string(),
        );
        self.annotations.insert(
            keys::ANNOTATION_TOKEN_POLICY_NAME.to_string(),
            identity.name.clone(),
        );
        self.annotations.insert(
            keys::ANNOTATION_TOKEN_POLICY_NAMESPACE.to_string(),
            identity.namespace.clone(),
        );
        self.guarded = true;
    }

    /// Whether the type marker identifies a gate-issued token.
    #[must_use]
    pub fn has_gate_type(&self) -> bool {
        self.type_marker == keys::TOKEN_TYPE
    }

    /// Stored approved fingerprint, if present and well-formed.
    #[must_use]
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.data
            .get(keys::DATA_HASH)
            .and_then(|raw| Fingerprint::from_bytes(raw))
    }

    /// Stored artifact, if present and non-empty.
    #[must_use]
    pub fn artifact(&self) -> Option<&[u8]> {
        self.data
            .get(keys::DATA_CERTIFICATE)
            .map(Vec::as_slice)
            .filter(|bytes| !bytes.is_empty())
    }

    /// Name of the request this token was materialized from.
    ///
    /// The annotation wins; the data key is consulted for tokens written
    /// before annotations were attached.
    #[must_use]
    pub fn request_name(&self) -> Option<String> {
        if let Some(name) = self
            .annotations
            .get(keys::ANNOTATION_REQUEST_NAME)
            .filter(|n| !n.is_empty())
        {
            return Some(name.clone());
        }
        self.data
            .get(keys::DATA_REQUEST_NAME)
            .and_then(|raw| std::str::from_utf8(raw).ok())
            .filter(|n| !n.is_empty())
            .map(str::to_string)
    }

    /// `namespace/name` for log lines.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy() -> PolicyObject {
        PolicyObject::new(
            PolicyIdentity::new("team-a", "allow-dns"),
            json!({"podSelector": {}}),
        )
    }

    #[test]
    fn test_request_for_policy_carries_identity() {
        let p = policy();
        let fp = p.fingerprint().unwrap();
        let req = ApprovalRequest::for_policy(
            "np-approval-team-a-allow-dns".into(),
            &p.identity,
            &fp,
            b"pem".to_vec(),
            keys::DEFAULT_SIGNER,
        );
        assert!(req.is_gate_request());
        assert_eq!(req.fingerprint(), Some(fp));
        assert_eq!(req.target(), Some(p.identity));
        assert_eq!(req.usages.len(), 3);
        assert_eq!(req.signer_name, keys::DEFAULT_SIGNER);
    }

    #[test]
    fn test_request_without_identity_annotations_has_no_target() {
        let mut req = ApprovalRequest::default();
        req.annotations
            .insert(keys::ANNOTATION_POLICY_NAME.into(), "x".into());
        assert!(req.target().is_none());
        assert!(!req.is_gate_request());
    }

    #[test]
    fn test_token_overwrite_replaces_previous_grant() {
        let p = policy();
        let old = Fingerprint::parse(&"a".repeat(64)).unwrap();
        let mut token = ApprovalToken::materialize(&p.identity, "n", "req-1", &old, b"old-cert");
        token.foreign_finalizers.push("example.com/keep".into());
        token.resource_version = Some("7".into());

        let new = p.fingerprint().unwrap();
        token.overwrite(&p.identity, "req-2", &new, b"new-cert");

        assert_eq!(token.fingerprint(), Some(new));
        assert_eq!(token.artifact(), Some(&b"new-cert"[..]));
        assert_eq!(token.request_name().as_deref(), Some("req-2"));
        assert_eq!(token.foreign_finalizers, vec!["example.com/keep".to_string()]);
        assert_eq!(token.resource_version.as_deref(), Some("7"));
        assert!(token.guarded);
        assert!(token.has_gate_type());
    }

    #[test]
    fn test_empty_artifact_is_absent() {
        let p = policy();
        let fp = p.fingerprint().unwrap();
        let token = ApprovalToken::materialize(&p.identity, "n", "r", &fp, b"");
        assert!(token.artifact().is_none());
    }

    #[test]
    fn test_request_name_falls_back_to_data() {
        let mut token = ApprovalToken::default();
        token
            .data
            .insert(keys::DATA_REQUEST_NAME.into(), b"from-data".to_vec());
        assert_eq!(token.request_name().as_deref(), Some("from-data"));
    }
}
