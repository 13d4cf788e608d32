//! npgate core: approval state machine for gated NetworkPolicy changes.
//!
//! A NetworkPolicy create or update is admitted only when an approval token
//! for the policy carries the fingerprint of exactly the content being
//! submitted. Otherwise the gate files an approval request for that content
//! and denies. Once an administrator grants the request, the materializer
//! writes the token; the sweeper retires tokens whose request is gone.
//!
//! This crate is cluster-agnostic. All persistence goes through
//! [`store::ApprovalStore`]; the `npgate` binary supplies the Kubernetes
//! adapter, the webhook server and the controllers.
//!
//! # Modules
//!
//! - [`approval`] - Fingerprints, request and token records, naming
//! - [`admission`] - Allow/deny decision for one admission review
//! - [`materializer`] - Granted request → approval token
//! - [`sweeper`] - Orphaned token cleanup
//! - [`reconcile`] - Error class → requeue mapping
//! - [`store`] - Store trait, timeout wrapper, in-memory store
//! - [`config`] - YAML configuration
//! - [`lifecycle`] - Readiness, health probes, shutdown
//! - [`telemetry`] - Prometheus metrics

pub mod admission;
pub mod approval;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod materializer;
pub mod reconcile;
pub mod store;
pub mod sweeper;
pub mod telemetry;

pub use admission::{AdmissionDecision, AdmissionGate, DecisionReason, Operation};
pub use approval::{Fingerprint, PolicyIdentity, PolicyObject, fingerprint};
pub use error::{ErrorClass, GateError};
pub use materializer::{GrantMaterializer, MaterializeOutcome};
pub use reconcile::{Requeue, requeue_for};
pub use store::{ApprovalStore, BoundedStore, MemoryStore, StoreError};
pub use sweeper::{OrphanSweeper, SweepReport};
