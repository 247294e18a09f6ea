//! Error types for the recipe proxy

use std::io;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for the recipe proxy
pub type Result<T> = std::result::Result<T, Error>;

/// Recipe proxy errors
///
/// The `Display` output of every per-request variant is safe to hand to a
/// browser: it never contains the upstream URL or the API key.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing or malformed client parameter
    #[error("{0}")]
    Validation(String),

    /// Upstream answered with a non-success status
    #[error("{message}")]
    Upstream {
        /// Status reported by the upstream API
        status: StatusCode,
        /// Message extracted from the upstream body, or a status template
        message: String,
    },

    /// Upstream could not be reached (DNS, refused connection, reset)
    ///
    /// The payload is diagnostic detail for logs only.
    #[error("Failed to reach the recipe API")]
    Transport(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an upstream error carrying the upstream status
    pub fn upstream(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
        }
    }

    /// HTTP status to surface to the calling browser
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Upstream { status, .. } => *status,
            Self::Config(_)
            | Self::Transport(_)
            | Self::Io(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn validation_maps_to_bad_request() {
        let err = Error::validation("Valid Recipe ID parameter is required");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Valid Recipe ID parameter is required");
    }

    #[test]
    fn upstream_status_passes_through() {
        let err = Error::upstream(StatusCode::PAYMENT_REQUIRED, "quota exceeded");
        assert_eq!(err.status_code(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(err.to_string(), "quota exceeded");
    }

    #[test]
    fn transport_hides_detail() {
        let err = Error::Transport("error sending request: connection refused".to_string());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.to_string().contains("refused"));
    }

    #[tokio::test]
    async fn into_response_renders_error_body() {
        let response = Error::upstream(StatusCode::NOT_FOUND, "Recipe not found").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, json!({"error": "Recipe not found"}));
    }
}
