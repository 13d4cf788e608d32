//! Approval request lifecycle as observed from status conditions.
//!
//! ```text
//!   (absent) ──create──▶ Pending ──approve──▶ Granted ──sign──▶ artifact issued
//!      ▲                    │  └──deny──▶ Denied
//!      │                    └────────────────────▶ Failed (signer gave up)
//!      └──────────── delete from any state (Withdrawn) ──────────────┘
//! ```
//!
//! Denied and Failed are terminal: the gate never recreates a request for a
//! fingerprint that was explicitly turned down.

use std::fmt;

use super::keys;
use super::types::ApprovalRequest;

/// Decisive state of an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    /// No decisive condition yet
    Pending,
    /// `Approved=True`
    Granted,
    /// `Denied=True`
    Denied,
    /// `Failed=True`
    Failed,
}

impl RequestState {
    /// Reads the state from a request's conditions.
    ///
    /// Denied and Failed take precedence over Approved: a request can carry
    /// `Approved=True` and `Failed=True` when the signer rejects it after
    /// approval, and that request will never produce an artifact.
    #[must_use]
    pub fn of(request: &ApprovalRequest) -> Self {
        if request.has_condition(keys::CONDITION_DENIED) {
            Self::Denied
        } else if request.has_condition(keys::CONDITION_FAILED) {
            Self::Failed
        } else if request.has_condition(keys::CONDITION_APPROVED) {
            Self::Granted
        } else {
            Self::Pending
        }
    }

    /// Whether no further transition is expected.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Denied | Self::Failed)
    }

    /// Returns the state as a static string for logs and metric labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Granted => "granted",
            Self::Denied => "denied",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a materializer can do with a request right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantReadiness<'a> {
    /// Still waiting on an approver
    Pending,
    /// Turned down; nothing will ever be materialized
    Terminal(RequestState),
    /// Approved but the signer has not issued the artifact yet
    AwaitingArtifact,
    /// Approved with the artifact available
    Ready(&'a [u8]),
}

impl<'a> GrantReadiness<'a> {
    /// Classifies a request for materialization.
    #[must_use]
    pub fn of(request: &'a ApprovalRequest) -> Self {
        match RequestState::of(request) {
            RequestState::Pending => Self::Pending,
            state @ (RequestState::Denied | RequestState::Failed) => Self::Terminal(state),
            RequestState::Granted => match request.artifact.as_deref() {
                Some(bytes) if !bytes.is_empty() => Self::Ready(bytes),
                _ => Self::AwaitingArtifact,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::RequestCondition;

    fn with(conditions: &[&str]) -> ApprovalRequest {
        ApprovalRequest {
            conditions: conditions.iter().map(|c| RequestCondition::holds(*c)).collect(),
            ..ApprovalRequest::default()
        }
    }

    #[test]
    fn test_state_from_conditions() {
        assert_eq!(RequestState::of(&with(&[])), RequestState::Pending);
        assert_eq!(RequestState::of(&with(&["Approved"])), RequestState::Granted);
        assert_eq!(RequestState::of(&with(&["Denied"])), RequestState::Denied);
        assert_eq!(
            RequestState::of(&with(&["Approved", "Failed"])),
            RequestState::Failed
        );
    }

    #[test]
    fn test_false_condition_is_ignored() {
        let mut req = with(&["Approved"]);
        req.conditions[0].status = false;
        assert_eq!(RequestState::of(&req), RequestState::Pending);
    }

    #[test]
    fn test_readiness_requires_non_empty_artifact() {
        let mut req = with(&["Approved"]);
        assert_eq!(GrantReadiness::of(&req), GrantReadiness::AwaitingArtifact);
        req.artifact = Some(Vec::new());
        assert_eq!(GrantReadiness::of(&req), GrantReadiness::AwaitingArtifact);
        req.artifact = Some(b"cert".to_vec());
        assert_eq!(GrantReadiness::of(&req), GrantReadiness::Ready(b"cert"));
    }

    #[test]
    fn test_terminal_states() {
        assert!(RequestState::Denied.is_terminal());
        assert!(RequestState::Failed.is_terminal());
        assert!(!RequestState::Granted.is_terminal());
        assert_eq!(
            GrantReadiness::of(&with(&["Denied"])),
            GrantReadiness::Terminal(RequestState::Denied)
        );
    }
}
