//! Admission gate for network policy mutations.
//!
//! ## Decision flow
//!
//! ```text
//!   DELETE / CONNECT ─────────────────────────────────────────────▶ allow
//!   CREATE / UPDATE
//!     ├─ namespace excluded ──────────────────────────────────────▶ allow
//!     ├─ fingerprint(policy) == token.hash && token has artifact ─▶ allow
//!     └─ otherwise: ensure approval request for fingerprint ──────▶ deny
//!   any error or deadline exceeded ───────────────────────────────▶ deny
//! ```
//!
//! ## Module Organization
//!
//! - `mod.rs` - Operation, decision and verdict types
//! - `gate.rs` - `AdmissionGate` implementation

mod gate;

pub use gate::{AdmissionGate, verify_token};

use std::fmt;

use crate::approval::RequestState;

// ============================================================================
// Operation
// ============================================================================

/// Admission operation being reviewed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Object creation
    Create,
    /// Object update
    Update,
    /// Object deletion
    Delete,
    /// Connect (exec/proxy); never gated
    Connect,
}

impl Operation {
    /// Returns the operation as a static string for logs and metric labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Connect => "connect",
        }
    }

    /// Whether this operation is subject to approval.
    #[must_use]
    pub fn is_gated(self) -> bool {
        matches!(self, Self::Create | Self::Update)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Decision
// ============================================================================

/// Why a decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecisionReason {
    /// Token fingerprint matches and carries an artifact
    Approved,
    /// Operation is never gated
    Ungated,
    /// Policy namespace is excluded from the gate
    Excluded,
    /// No valid approval; a request exists or was created
    NotApproved,
    /// Approval request for this content was denied or failed
    Rejected,
    /// Gate could not decide (store failure, deadline, bad input)
    Error,
}

impl DecisionReason {
    /// Returns the reason as a static string for logs and metric labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Ungated => "ungated",
            Self::Excluded => "excluded",
            Self::NotApproved => "not_approved",
            Self::Rejected => "rejected",
            Self::Error => "error",
        }
    }
}

/// Outcome of one admission review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionDecision {
    /// Whether the mutation may proceed
    pub allowed: bool,
    /// Why
    pub reason: DecisionReason,
    /// Human-readable remediation hint on denial
    pub message: Option<String>,
    /// Approval request the caller should get approved, when relevant
    pub request_name: Option<String>,
}

impl AdmissionDecision {
    /// Allows the mutation.
    #[must_use]
    pub fn allow(reason: DecisionReason) -> Self {
        Self {
            allowed: true,
            reason,
            message: None,
            request_name: None,
        }
    }

    /// Denies the mutation with a message.
    #[must_use]
    pub fn deny(reason: DecisionReason, message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason,
            message: Some(message.into()),
            request_name: None,
        }
    }

    /// Attaches the request name to a decision.
    #[must_use]
    pub fn with_request(mut self, name: impl Into<String>) -> Self {
        self.request_name = Some(name.into());
        self
    }
}

// ============================================================================
// Token Verdict
// ============================================================================

/// Result of checking a stored token against a candidate fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenVerdict {
    /// Fingerprint matches and an artifact is present
    Approved,
    /// No token for this policy
    Missing,
    /// A same-named record exists without the approval type marker
    WrongType,
    /// Token approves different content
    Drifted,
    /// Fingerprint matches but the artifact is empty
    MissingArtifact,
}

impl TokenVerdict {
    /// Returns the verdict as a static string for logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Missing => "missing",
            Self::WrongType => "wrong_type",
            Self::Drifted => "drifted",
            Self::MissingArtifact => "missing_artifact",
        }
    }
}

// ============================================================================
// Request Outcome
// ============================================================================

/// What the gate did about the approval request on a denial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A request for this fingerprint now exists (created here or concurrently)
    Created,
    /// A pending request for this fingerprint already existed
    Pending,
    /// A stale request was replaced by one for this fingerprint
    Superseded,
    /// The request for this fingerprint is approved; its token is not written yet
    Granted,
    /// The request for this fingerprint was denied or failed
    Rejected(RequestState),
    /// The derived name belongs to a request the gate does not manage
    Foreign,
    /// Creating or replacing the request failed
    CreateFailed(String),
}

impl RequestOutcome {
    /// Returns the outcome as a static string for logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Pending => "pending",
            Self::Superseded => "superseded",
            Self::Granted => "granted",
            Self::Rejected(_) => "rejected",
            Self::Foreign => "foreign",
            Self::CreateFailed(_) => "create_failed",
        }
    }
}
