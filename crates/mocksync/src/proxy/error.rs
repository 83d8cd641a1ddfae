//! Errors raised while proxying a single exchange.
//!
//! None of these escape the proxy: each one is turned into an HTTP status for
//! the client by [`ProxyError::status`].

use hyper::StatusCode;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("error reading request body: {0}")]
    ReadRequestBody(String),
    #[error("failed to build upstream URL from '{base}' and '{path}': {reason}")]
    InvalidUpstreamUri {
        base: String,
        path: String,
        reason: String,
    },
    #[error("upstream request failed: {0}")]
    Upstream(String),
    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),
    #[error("error reading upstream response body: {0}")]
    ReadResponseBody(String),
    #[error("error writing response: {0}")]
    BuildResponse(String),
}

impl ProxyError {
    /// Status returned to the client for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::ReadRequestBody(_) => StatusCode::BAD_REQUEST,
            ProxyError::InvalidUpstreamUri { .. }
            | ProxyError::Upstream(_)
            | ProxyError::Timeout(_)
            | ProxyError::ReadResponseBody(_) => StatusCode::BAD_GATEWAY,
            ProxyError::BuildResponse(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
