//! Error types for pulse-core

use crate::hub::ConnectionId;
use crate::{Response, ResponseBuilder, StatusCode};
use thiserror::Error;

/// Result type alias for pulse operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the pulse HTTP server
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed request input
    #[error("{0}")]
    BadRequest(String),

    /// No route and no static file for the path
    #[error("Not Found: {0}")]
    NotFound(String),

    /// Method has no route for this path
    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    /// Write to a stale real-time connection
    #[error("Connection {0} lost")]
    ConnectionLost(ConnectionId),

    /// Handler exceeded the request timeout
    #[error("Request timed out")]
    Timeout,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a bad request error for a missing query parameter
    pub fn missing_param(name: &str) -> Self {
        Error::BadRequest(format!("missing required query parameter: {}", name))
    }

    /// HTTP status this error maps to at the request boundary
    pub fn status(&self) -> StatusCode {
        match self {
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Error::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Error::ConnectionLost(_)
            | Error::Config(_)
            | Error::Io(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Convert to a plain-text error response
    ///
    /// Server-side failures are reported with the reason phrase only.
    pub fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            Error::NotFound(_) => status.reason_phrase().to_string(),
            e if status.is_client_error() => e.to_string(),
            _ => status.reason_phrase().to_string(),
        };
        ResponseBuilder::new(status)
            .header("content-type", "text/plain; charset=utf-8")
            .body(body)
            .build()
    }
}
