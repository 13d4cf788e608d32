//! Approval domain: policies, fingerprints, requests and tokens.
//!
//! ## Module Organization
//!
//! - `types.rs` - Policy, request and token records
//! - `fingerprint.rs` - Canonical hashing of policy content
//! - `request.rs` - Request lifecycle states
//! - `naming.rs` - Deterministic request/token names
//! - `payload.rs` - Certificate request generation
//! - `keys.rs` - Label, annotation and data keys

pub mod fingerprint;
pub mod keys;
pub mod naming;
pub mod payload;
pub mod request;
pub mod types;

pub use fingerprint::{Fingerprint, FingerprintError, canonical_json, fingerprint};
pub use naming::request_name;
pub use payload::{PayloadError, certificate_request_pem};
pub use request::{GrantReadiness, RequestState};
pub use types::{ApprovalRequest, ApprovalToken, PolicyIdentity, PolicyObject, RequestCondition};
