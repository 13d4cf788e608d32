//! Error taxonomy shared by the admission gate and the reconcilers.
//!
//! Every failure falls into one of three classes that decide what happens
//! next. Admission turns all of them into a denial; reconcilers map them to a
//! requeue decision (see [`crate::reconcile`]).

use std::time::Duration;
use thiserror::Error;

use crate::approval::{FingerprintError, PayloadError};
use crate::store::StoreError;

/// How a failure should be handled by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Timeouts, conflicts, unavailability: retry with backoff
    Transient,
    /// Approved but the artifact has not been issued yet: retry later
    NotReady,
    /// Retrying will fail the same way: log and stop
    Permanent,
}

impl ErrorClass {
    /// Returns the class as a static string for metric labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::NotReady => "not_ready",
            Self::Permanent => "permanent",
        }
    }
}

/// Errors raised by gate operations.
#[derive(Debug, Error)]
pub enum GateError {
    /// A store call failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Policy content could not be fingerprinted
    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),

    /// Certificate request payload could not be generated
    #[error(transparent)]
    Payload(#[from] PayloadError),

    /// Request was granted but carries no artifact yet
    #[error("approval request {request} is approved but its certificate has not been issued yet")]
    NotReady {
        /// Request name
        request: String,
    },

    /// A record is missing fields the gate relies on
    #[error("{subject} is malformed: {reason}")]
    Malformed {
        /// What was malformed (`approval request foo`)
        subject: String,
        /// What is missing or invalid
        reason: String,
    },

    /// The whole operation exceeded its deadline
    #[error("operation exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),
}

impl GateError {
    /// Shorthand for a malformed record.
    pub fn malformed(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            subject: subject.into(),
            reason: reason.into(),
        }
    }

    /// Classifies this error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Store(err) if err.is_retriable() => ErrorClass::Transient,
            Self::Store(_) => ErrorClass::Permanent,
            Self::DeadlineExceeded(_) => ErrorClass::Transient,
            Self::NotReady { .. } => ErrorClass::NotReady,
            Self::Fingerprint(_) | Self::Payload(_) | Self::Malformed { .. } => {
                ErrorClass::Permanent
            }
        }
    }
}
