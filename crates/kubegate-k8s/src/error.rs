use http::StatusCode;
use thiserror::Error;

/// Errors surfaced by the resource gateway
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Unknown resource id or missing object
    #[error("resource {0} not found")]
    NotFound(String),

    /// Discovery returned nothing usable, the catalog stays as it was
    #[error("no API resources discovered")]
    DiscoveryEmpty,

    #[error("invalid regular expression: {0}")]
    InvalidRegex(#[from] regex::Error),

    #[error("invalid JSONPath `{path}`: {message}")]
    InvalidJsonPath { path: String, message: String },

    #[error("invalid label selector: {0}")]
    InvalidSelector(String),

    #[error("invalid impersonation header value: {0}")]
    InvalidIdentity(#[from] http::header::InvalidHeaderValue),

    /// The API server answered with something we can not interpret
    #[error("malformed response from the API server: {0}")]
    Malformed(String),

    #[error("malformed response from the API server: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to build request: {0}")]
    Request(#[from] kube::core::request::Error),

    #[error("failed to build request: {0}")]
    Http(#[from] http::Error),

    #[error(transparent)]
    Kube(#[from] kube::Error),

    #[error("failed to load kubeconfig: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    #[error("failed to load in-cluster configuration: {0}")]
    InCluster(#[from] kube::config::InClusterError),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl GatewayError {
    /// Check if the error means the requested thing does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Kube(kube::Error::Api(response)) => response.code == 404,
            _ => false,
        }
    }

    /// HTTP status used when the error is returned to a caller
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRegex(_)
            | Self::InvalidJsonPath { .. }
            | Self::InvalidSelector(_)
            | Self::InvalidIdentity(_) => StatusCode::BAD_REQUEST,
            Self::Kube(kube::Error::Api(response)) => {
                StatusCode::from_u16(response.code).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::DiscoveryEmpty
            | Self::Malformed(_)
            | Self::Json(_)
            | Self::Kube(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            GatewayError::NotFound("pod".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::Malformed("no rows".to_string()).status_code(),
            StatusCode::BAD_GATEWAY
        );

        let forbidden = GatewayError::Kube(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "forbidden".to_string(),
            reason: "Forbidden".to_string(),
            code: 403,
        }));
        assert_eq!(forbidden.status_code(), StatusCode::FORBIDDEN);
        assert!(!forbidden.is_not_found());
    }
}
