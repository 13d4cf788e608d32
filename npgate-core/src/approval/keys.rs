//! Well-known label, annotation, data and finalizer keys.
//!
//! These strings are the wire contract shared by the admission gate, the
//! grant materializer and anything an administrator scripts against the
//! cluster. Changing one orphans every record written with the old value.

/// Label marking a certificate signing request as part of the approval workflow.
pub const LABEL_APPROVAL: &str = "networkpolicy.webhook.io/approval";

/// Request annotation carrying the fingerprint the request vouches for.
pub const ANNOTATION_APPROVAL_HASH: &str = "networkpolicy.webhook.io/approval-hash";

/// Request annotation carrying the target policy name.
pub const ANNOTATION_POLICY_NAME: &str = "networkpolicy.webhook.io/name";

/// Request annotation carrying the target policy namespace.
pub const ANNOTATION_POLICY_NAMESPACE: &str = "networkpolicy.webhook.io/namespace";

/// Token annotation naming the originating request.
pub const ANNOTATION_REQUEST_NAME: &str = "networkpolicy.webhook.io/csr-name";

/// Token annotation carrying the policy name.
pub const ANNOTATION_TOKEN_POLICY_NAME: &str = "networkpolicy.webhook.io/np-name";

/// Token annotation carrying the policy namespace.
pub const ANNOTATION_TOKEN_POLICY_NAMESPACE: &str = "networkpolicy.webhook.io/np-namespace";

/// Type marker identifying a secret as an approval token.
pub const TOKEN_TYPE: &str = "networkpolicy.webhook.io/approval";

/// Finalizer protecting an approval token from deletion without cleanup.
pub const TOKEN_GUARD: &str = "networkpolicy.webhook.io/approval-protection";

/// Token data key holding the approved fingerprint.
pub const DATA_HASH: &str = "hash";

/// Token data key holding the signed certificate.
pub const DATA_CERTIFICATE: &str = "tls.crt";

/// Token data key holding the originating request name.
pub const DATA_REQUEST_NAME: &str = "csr-name";

/// Signer used for approval requests unless configured otherwise.
pub const DEFAULT_SIGNER: &str = "kubernetes.io/kube-apiserver-client";

/// Key usages requested for every approval certificate.
pub const REQUEST_USAGES: [&str; 3] = ["digital signature", "key encipherment", "client auth"];

/// Status condition type meaning the request was granted.
pub const CONDITION_APPROVED: &str = "Approved";

/// Status condition type meaning the request was denied.
pub const CONDITION_DENIED: &str = "Denied";

/// Status condition type meaning signing failed after approval.
pub const CONDITION_FAILED: &str = "Failed";
