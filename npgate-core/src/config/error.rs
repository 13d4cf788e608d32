//! Configuration error types.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    // ─────────────────────────────────────────────────────────────────────────
    // Value validation errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Naming prefix is empty or not usable in a DNS-1123 name.
    #[error("invalid naming prefix '{prefix}': must be lowercase alphanumerics, '-' or '.', starting alphanumeric")]
    InvalidPrefix { prefix: String },

    /// A duration that must be positive is zero.
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    /// Store calls must finish well inside the admission deadline.
    #[error("store.timeout ({store:?}) must be less than admission.timeout ({admission:?})")]
    StoreTimeoutTooLong { store: Duration, admission: Duration },

    /// Signer name is empty.
    #[error("approval.signer_name must not be empty")]
    EmptySignerName,

    /// Required environment variable not set.
    #[error("environment variable '{var}' not set (required for field '{field}')")]
    MissingEnvVar { var: String, field: String },

    // ─────────────────────────────────────────────────────────────────────────
    // I/O and parsing errors
    // ─────────────────────────────────────────────────────────────────────────
    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    ParseError(#[from] serde_saphyr::Error),

    /// I/O error reading config file.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Explicitly requested config file does not exist.
    #[error("configuration file not found: {path}")]
    ConfigFileNotFound { path: PathBuf },
}

/// Validation warnings (non-fatal).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    /// A system namespace is subject to the gate.
    SystemNamespaceGated { namespace: String },
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SystemNamespaceGated { namespace } => write!(
                f,
                "namespace '{namespace}' is not excluded; its network policies will require approval"
            ),
        }
    }
}

/// Result of configuration validation.
#[derive(Debug)]
pub struct ValidationResult {
    /// Non-fatal warnings encountered during validation.
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    /// Create a new validation result with no warnings.
    pub fn ok() -> Self {
        Self {
            warnings: Vec::new(),
        }
    }

    /// Check if validation passed with no warnings.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}
