//! Configuration schema type definitions.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::defaults::{self, GateDefaults};
use super::duration_format;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-Level Schema
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Root configuration structure.
///
/// Every section is optional; an empty file yields [`GateConfig::default`].
///
/// # Example
/// ```yaml
/// log:
///   level: debug
/// naming:
///   prefix: np-approval
/// admission:
///   timeout: 10s
///   excluded_namespaces: [kube-system, ingress-nginx]
/// approval:
///   artifact_wait: 30s
/// store:
///   timeout: 5s
/// reconcile:
///   transient_backoff: 5s
///   sweep_interval: 5m
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GateConfig {
    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,

    /// Naming of derived requests and tokens.
    #[serde(default)]
    pub naming: NamingConfig,

    /// Admission gate settings.
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Approval request settings.
    #[serde(default)]
    pub approval: ApprovalConfig,

    /// Store call settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Reconciler settings.
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

impl GateConfig {
    /// Whether policies in `namespace` bypass the gate.
    #[must_use]
    pub fn is_excluded(&self, namespace: &str) -> bool {
        self.admission
            .excluded_namespaces
            .iter()
            .any(|ns| ns == namespace)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sections
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Naming configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NamingConfig {
    /// Prefix of `<prefix>-<namespace>-<name>`.
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
        }
    }
}

/// Admission gate configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AdmissionConfig {
    /// Deadline for one admission decision; exceeding it denies.
    #[serde(default = "default_admission_timeout", with = "duration_format")]
    pub timeout: Duration,

    /// Namespaces whose policies are always allowed.
    #[serde(default = "defaults::excluded_namespaces")]
    pub excluded_namespaces: Vec<String>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            timeout: default_admission_timeout(),
            excluded_namespaces: defaults::excluded_namespaces(),
        }
    }
}

/// Approval request configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ApprovalConfig {
    /// Delay before re-checking a granted request without artifact.
    #[serde(default = "default_artifact_wait", with = "duration_format")]
    pub artifact_wait: Duration,

    /// Signer named on new requests.
    #[serde(default = "defaults::signer_name")]
    pub signer_name: String,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            artifact_wait: default_artifact_wait(),
            signer_name: defaults::signer_name(),
        }
    }
}

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Budget for a single store call.
    #[serde(default = "default_store_timeout", with = "duration_format")]
    pub timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            timeout: default_store_timeout(),
        }
    }
}

/// Reconciler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ReconcileConfig {
    /// Delay before retrying a transient failure.
    #[serde(default = "default_transient_backoff", with = "duration_format")]
    pub transient_backoff: Duration,

    /// Interval between orphan sweeps.
    #[serde(default = "default_sweep_interval", with = "duration_format")]
    pub sweep_interval: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            transient_backoff: default_transient_backoff(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

fn default_log_level() -> String {
    defaults::DEFAULT_LOG_LEVEL.to_string()
}

fn default_prefix() -> String {
    defaults::DEFAULT_PREFIX.to_string()
}

fn default_admission_timeout() -> Duration {
    GateDefaults::default().admission_timeout
}

fn default_store_timeout() -> Duration {
    GateDefaults::default().store_timeout
}

fn default_artifact_wait() -> Duration {
    GateDefaults::default().artifact_wait
}

fn default_transient_backoff() -> Duration {
    GateDefaults::default().transient_backoff
}

fn default_sweep_interval() -> Duration {
    GateDefaults::default().sweep_interval
}
