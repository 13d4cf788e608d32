//! Configuration loading and validation.
//!
//! # TODO: Log level hot-reload
//!
//! The file is read once at startup. Watching it and swapping the tracing
//! filter through a `reload::Handle` would let operators raise verbosity
//! without restarting the webhook.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{info, warn};

use super::error::{ConfigError, ValidationResult, ValidationWarning};
use super::schema::GateConfig;
use crate::approval::naming::is_valid_prefix;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV_VAR: &str = "NPGATE_CONFIG";

/// Configuration file search paths (in priority order), after `--config`.
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        paths.push(PathBuf::from(path));
    }
    paths.push(PathBuf::from("/etc/npgate/config.yaml"));
    paths.push(PathBuf::from("./config.yaml"));

    paths
}

/// Find the configuration file to load.
///
/// An explicit path must exist. Otherwise the first existing default path
/// wins, and `Ok(None)` means no file was found anywhere.
pub fn find_config_file(explicit_path: Option<&Path>) -> Result<Option<PathBuf>, ConfigError> {
    if let Some(path) = explicit_path {
        if path.exists() {
            return Ok(Some(path.to_path_buf()));
        }
        return Err(ConfigError::ConfigFileNotFound {
            path: path.to_path_buf(),
        });
    }

    Ok(default_config_paths().into_iter().find(|p| p.exists()))
}

/// Load configuration from a file path.
///
/// An empty file yields the defaults.
pub fn load_config(path: &Path) -> Result<GateConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(GateConfig::default());
    }

    let contents = substitute_env_vars(&contents)?;
    let config: GateConfig = serde_saphyr::from_str(&contents)?;
    Ok(config)
}

/// Locate, load and validate configuration, falling back to defaults.
///
/// Returns the configuration, the file it came from (if any) and the
/// validation warnings.
pub fn load_or_default(
    explicit_path: Option<&Path>,
) -> Result<(GateConfig, Option<PathBuf>, ValidationResult), ConfigError> {
    let (config, source) = match find_config_file(explicit_path)? {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration");
            (load_config(&path)?, Some(path))
        }
        None => {
            warn!("No configuration file found, using default values");
            (GateConfig::default(), None)
        }
    };
    let result = validate(&config)?;
    Ok((config, source, result))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Environment Variable Substitution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

// SAFETY: .expect() on LazyLock with a compile-time literal regex pattern.
// The pattern is known-valid and tested by test_env_var_pattern_compiles().
#[allow(clippy::expect_used)]
static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
        .expect("BUG: ENV_VAR_PATTERN regex is invalid")
});

/// Substitute environment variables in a string.
///
/// # Syntax
/// - `${VAR}` - Required, fail if not set
/// - `${VAR:-default}` - Optional with default
pub fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let mut missing: Option<String> = None;

    let result = ENV_VAR_PATTERN.replace_all(content, |cap: &regex::Captures<'_>| {
        let var_name = cap.get(1).map_or("", |m| m.as_str());
        match (std::env::var(var_name), cap.get(2)) {
            (Ok(value), _) => value,
            (Err(_), Some(default)) => default.as_str().to_string(),
            (Err(_), None) => {
                missing.get_or_insert_with(|| var_name.to_string());
                String::new()
            }
        }
    });

    if let Some(var) = missing {
        return Err(ConfigError::MissingEnvVar {
            var,
            field: "configuration".to_string(),
        });
    }

    Ok(result.into_owned())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate a configuration.
pub fn validate(config: &GateConfig) -> Result<ValidationResult, ConfigError> {
    if !is_valid_prefix(&config.naming.prefix) {
        return Err(ConfigError::InvalidPrefix {
            prefix: config.naming.prefix.clone(),
        });
    }

    let durations = [
        ("admission.timeout", config.admission.timeout),
        ("approval.artifact_wait", config.approval.artifact_wait),
        ("store.timeout", config.store.timeout),
        ("reconcile.transient_backoff", config.reconcile.transient_backoff),
        ("reconcile.sweep_interval", config.reconcile.sweep_interval),
    ];
    if let Some(&(field, _)) = durations.iter().find(|(_, d)| d.is_zero()) {
        return Err(ConfigError::ZeroDuration { field });
    }

    if config.store.timeout >= config.admission.timeout {
        return Err(ConfigError::StoreTimeoutTooLong {
            store: config.store.timeout,
            admission: config.admission.timeout,
        });
    }

    if config.approval.signer_name.trim().is_empty() {
        return Err(ConfigError::EmptySignerName);
    }

    let mut result = ValidationResult::ok();
    if !config.is_excluded("kube-system") {
        result.warnings.push(ValidationWarning::SystemNamespaceGated {
            namespace: "kube-system".to_string(),
        });
    }
    Ok(result)
}
