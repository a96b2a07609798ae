//! Error types for the scope proxy.
//!
//! Inner components surface typed errors up the call chain; they are turned
//! into HTTP responses only at the transport boundary, via [`ApiError`].
//! Error bodies never carry the signing key, the upstream bearer, or raw
//! API-key material.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for the scope proxy.
pub type Result<T> = std::result::Result<T, Error>;

/// Scope proxy errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request body could not be parsed or is missing required fields
    #[error("Malformed request body")]
    MalformedRequest,

    /// Unknown API key, or API key not bound to the requested group
    #[error("Invalid API key or group binding")]
    InvalidCredentials,

    /// Scope build produced zero admissible resources
    #[error("Group {0} yielded no admissible resources")]
    EmptyScope(String),

    /// Upstream enumeration or health call failed
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Upstream call exceeded its deadline
    #[error("Upstream timeout: {0}")]
    UpstreamTimeout(String),

    /// Token could not be parsed as a JWT
    #[error("Malformed bearer token")]
    TokenMalformed,

    /// Token signature, issuer, or audience verification failed
    #[error("Token signature verification failed")]
    SignatureInvalid,

    /// Token is outside its validity window
    #[error("Token expired")]
    TokenExpired,

    /// Token was explicitly revoked before its natural expiry
    #[error("Token revoked")]
    TokenRevoked,

    /// Token is valid but its scope is no longer cached
    #[error("Scope no longer available; re-authenticate")]
    ScopeMissing,

    /// The requested resource is not in the caller's scope
    #[error("Resource not in scope: {0}")]
    OutOfScope(String),

    /// Programming defect; message is kept opaque at the boundary
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable error code, as documented in the API surface.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "ConfigError",
            Self::MalformedRequest => "MalformedRequest",
            Self::InvalidCredentials => "InvalidCredentials",
            Self::EmptyScope(_) => "EmptyScope",
            Self::UpstreamUnavailable(_) => "UpstreamUnavailable",
            // 408 bodies carry the HTTP-semantic code on the wire
            Self::UpstreamTimeout(_) => "RequestTimeout",
            Self::TokenMalformed => "TokenMalformed",
            Self::SignatureInvalid => "SignatureInvalid",
            Self::TokenExpired => "TokenExpired",
            Self::TokenRevoked => "TokenRevoked",
            Self::ScopeMissing => "ScopeMissing",
            Self::OutOfScope(_) => "OutOfScope",
            Self::Internal(_) => "InternalError",
        }
    }

    /// HTTP status this error maps to at the boundary.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MalformedRequest => StatusCode::BAD_REQUEST,
            Self::InvalidCredentials
            | Self::TokenMalformed
            | Self::SignatureInvalid
            | Self::TokenExpired
            | Self::TokenRevoked
            | Self::ScopeMissing => StatusCode::UNAUTHORIZED,
            Self::OutOfScope(_) => StatusCode::FORBIDDEN,
            Self::EmptyScope(_) => StatusCode::NOT_FOUND,
            Self::UpstreamTimeout(_) => StatusCode::REQUEST_TIMEOUT,
            Self::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Human-readable message for the error body.
    ///
    /// Internal errors are reported opaquely; the detail stays in the logs.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Config(_) | Self::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

/// An [`Error`] annotated with the request path, ready to serialize as the
/// standard error envelope.
#[derive(Debug)]
pub struct ApiError {
    /// The underlying typed error
    pub error: Error,
    /// Path of the request that failed
    pub path: String,
}

impl ApiError {
    /// Attach a request path to an error.
    pub fn new(error: Error, path: impl Into<String>) -> Self {
        Self {
            error,
            path: path.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.error.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(path = %self.path, error = %self.error, "Internal error");
        }
        let body = json!({
            "error": {
                "code": self.error.code(),
                "message": self.error.public_message(),
                "statusCode": status.as_u16(),
                "path": self.path,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        });
        (status, Json(body)).into_response()
    }
}
