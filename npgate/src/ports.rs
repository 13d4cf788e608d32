//! Listener ports for the webhook and admin servers.
//!
//! | Port | Name | Purpose |
//! |------|------|---------|
//! | 9443 | Webhook | AdmissionReview endpoints called by the API server |
//! | 8081 | Admin | Health checks, readiness, Prometheus metrics |
//!
//! # Environment Variables
//!
//! - `NPGATE_WEBHOOK_PORT` (default: 9443)
//! - `NPGATE_ADMIN_PORT` (default: 8081)

/// Default port for admission review traffic.
pub const DEFAULT_WEBHOOK_PORT: u16 = 9443;

/// Default admin port.
///
/// Endpoints served on this port:
/// - `GET /health` - Liveness probe
/// - `GET /ready` - Readiness probe
/// - `GET /metrics` - Prometheus metrics
pub const DEFAULT_ADMIN_PORT: u16 = 8081;

/// Webhook port from `NPGATE_WEBHOOK_PORT`, or the default.
pub fn webhook_port() -> u16 {
    port_from_env("NPGATE_WEBHOOK_PORT", DEFAULT_WEBHOOK_PORT)
}

/// Admin port from `NPGATE_ADMIN_PORT`, or the default.
pub fn admin_port() -> u16 {
    port_from_env("NPGATE_ADMIN_PORT", DEFAULT_ADMIN_PORT)
}

fn port_from_env(var: &str, default: u16) -> u16 {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_defaults_without_env() {
        unsafe {
            std::env::remove_var("NPGATE_WEBHOOK_PORT");
            std::env::remove_var("NPGATE_ADMIN_PORT");
        }
        assert_eq!(webhook_port(), DEFAULT_WEBHOOK_PORT);
        assert_eq!(admin_port(), DEFAULT_ADMIN_PORT);
    }

    #[test]
    #[serial]
    fn test_admin_port_from_env() {
        unsafe {
            std::env::set_var("NPGATE_ADMIN_PORT", "9000");
        }
        assert_eq!(admin_port(), 9000);
        unsafe {
            std::env::remove_var("NPGATE_ADMIN_PORT");
        }
    }

    #[test]
    #[serial]
    fn test_invalid_env_var_falls_back_to_default() {
        unsafe {
            std::env::set_var("NPGATE_WEBHOOK_PORT", "not_a_number");
        }
        assert_eq!(webhook_port(), DEFAULT_WEBHOOK_PORT);
        unsafe {
            std::env::remove_var("NPGATE_WEBHOOK_PORT");
        }
    }
}
