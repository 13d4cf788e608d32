//! Gate configuration: YAML schema, defaults, loading and validation.

mod defaults;
mod duration_format;
mod error;
mod loader;
mod schema;

pub use defaults::{DEFAULT_EXCLUDED_NAMESPACES, DEFAULT_LOG_LEVEL, DEFAULT_PREFIX, GateDefaults};
pub use duration_format::parse_duration;
pub use error::{ConfigError, ValidationResult, ValidationWarning};
pub use loader::{
    CONFIG_ENV_VAR, default_config_paths, find_config_file, load_config, load_or_default,
    substitute_env_vars, validate,
};
pub use schema::{
    AdmissionConfig, ApprovalConfig, GateConfig, LogConfig, NamingConfig, ReconcileConfig,
    StoreConfig,
};
