//! Centralized default values for gate configuration.

use std::time::Duration;

use crate::approval::keys::DEFAULT_SIGNER;

/// Log level used when neither the config file nor `RUST_LOG` sets one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Prefix of derived request and token names.
pub const DEFAULT_PREFIX: &str = "np-approval";

/// Namespaces whose policies bypass the gate unless configured otherwise.
pub const DEFAULT_EXCLUDED_NAMESPACES: [&str; 5] = [
    "kube-system",
    "calico-system",
    "calico-apiserver",
    "kube-node-lease",
    "ingress-nginx",
];

/// Centralized default values for gate configuration.
///
/// All timing-related values reference this struct so the schema defaults,
/// the tests and the documentation cannot drift apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateDefaults {
    /// Deadline for one admission decision.
    pub admission_timeout: Duration,

    /// Budget for a single store call. Must be below `admission_timeout`.
    pub store_timeout: Duration,

    /// Delay before re-checking a granted request that has no artifact yet.
    pub artifact_wait: Duration,

    /// Delay before retrying a transient reconcile failure.
    pub transient_backoff: Duration,

    /// Interval between orphan sweeps.
    pub sweep_interval: Duration,
}

impl Default for GateDefaults {
    fn default() -> Self {
        Self {
            admission_timeout: Duration::from_secs(10),
            store_timeout: Duration::from_secs(5), // Must be < admission_timeout
            artifact_wait: Duration::from_secs(30),
            transient_backoff: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(300), // 5 minutes
        }
    }
}

/// Default excluded namespaces as owned strings.
pub fn excluded_namespaces() -> Vec<String> {
    DEFAULT_EXCLUDED_NAMESPACES
        .iter()
        .map(ToString::to_string)
        .collect()
}

/// Default signer as an owned string.
pub fn signer_name() -> String {
    DEFAULT_SIGNER.to_string()
}
