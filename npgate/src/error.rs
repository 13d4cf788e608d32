//! Error types for the npgate server layer.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use npgate_core::config::ConfigError;
use thiserror::Error;

/// Errors raised while starting or serving the gate.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Body was not a usable AdmissionReview (maps to 400)
    #[error("invalid admission review: {0}")]
    InvalidReview(String),

    /// Listener could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested
        addr: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Server loop failed
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),

    /// Kubernetes client could not be created
    #[error("Kubernetes client error: {0}")]
    Kube(#[from] kube::Error),

    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ServerError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidReview(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Result type alias for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
