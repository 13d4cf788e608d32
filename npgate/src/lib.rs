//! Kubernetes-facing half of the NetworkPolicy approval gate.
//!
//! Hosts the admission webhook, the Kubernetes approval store, the CSR
//! controller and sweep loop, and the admin server. Gate semantics live in
//! `npgate-core`.

pub mod admin;
pub mod controller;
pub mod convert;
pub mod error;
pub mod kube_store;
pub mod logging_layer;
pub mod ports;
pub mod webhook;
