use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use kubegate_k8s::GatewayError;
use serde_json::json;
use thiserror::Error;

use crate::identity::IdentityError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The caller's identity may not read what it asked for
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("server is already running")]
    AlreadyRunning,

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server failed: {0}")]
    Serve(#[source] std::io::Error),

    #[error("server did not stop in time")]
    ShutdownTimeout,
}

impl ServerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Identity(IdentityError::Missing(_)) => StatusCode::UNAUTHORIZED,
            Self::Identity(IdentityError::InvalidHeader(_)) => StatusCode::BAD_REQUEST,
            Self::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Self::Gateway(e) => e.status_code(),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(json!({"error": self.to_string()}))).into_response()
    }
}
