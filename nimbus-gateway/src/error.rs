//! Error types for the gateway crate.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use nimbus_core::ErrorKind;
use serde_json::json;

/// Errors that can occur during gateway request handling.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum GatewayError {
    /// An error propagated from the VM lifecycle layer.
    #[error(transparent)]
    Executor(#[from] nimbus_executor::ExecutorError),

    /// An error propagated from bucket or edge storage.
    #[error(transparent)]
    Storage(#[from] nimbus_storage::StorageError),

    /// A path segment did not parse as the route's parameter type.
    #[error("invalid path parameter: {0}")]
    InvalidPath(#[from] axum::extract::rejection::PathRejection),

    /// A configuration value could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl GatewayError {
    /// Classification shared with the lower layers.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Executor(e) => e.kind(),
            Self::Storage(e) => e.kind(),
            Self::InvalidPath(_) | Self::Config(_) => ErrorKind::InvalidInput,
        }
    }

    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict | ErrorKind::NonEmpty => StatusCode::CONFLICT,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, kind = %self.kind(), "request failed");
        }
        (status, Json(json!({"error": self.to_string(), "kind": self.kind()}))).into_response()
    }
}
