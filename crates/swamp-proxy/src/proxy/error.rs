//! Proxy failures and their plain-text responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use log::error;
use thiserror::Error;

pub const NO_PROJECT_MESSAGE: &str = "No valid project is associated with these results.";
pub const NOT_MEMBER_MESSAGE: &str = "The current user is not a member of this project";
pub const UNAVAILABLE_MESSAGE: &str = "Error - viewer is no longer available.  Please try again.";

#[derive(Debug, Error)]
pub enum ProxyError {
    /// The first path segment is not a proxy id.
    #[error("not a proxy path")]
    NotAProxyPath,

    #[error("{}", NO_PROJECT_MESSAGE)]
    NoProject,

    #[error("{}", NOT_MEMBER_MESSAGE)]
    NotMember,

    /// No VM address, or the VM did not answer.
    #[error("{}", UNAVAILABLE_MESSAGE)]
    Unavailable,

    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("failed to read request body")]
    BodyRead(#[source] axum::Error),

    #[error("directory lookup failed: {0:#}")]
    Directory(anyhow::Error),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match &self {
            ProxyError::NotAProxyPath => StatusCode::NOT_FOUND,
            ProxyError::NoProject | ProxyError::NotMember => StatusCode::BAD_REQUEST,
            ProxyError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::BodyRead(_) => StatusCode::BAD_REQUEST,
            ProxyError::Directory(e) => {
                error!("Directory error while proxying: {:?}", e);
                return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response();
            }
        };
        (status, self.to_string()).into_response()
    }
}
