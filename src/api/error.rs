use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::manager::SessionError;

/// Structured error type for all API handlers.
///
/// Each variant maps to an HTTP status code, a machine-readable code string,
/// and a human-readable message. Implements [`IntoResponse`] so handlers can
/// return `Result<T, ApiError>` directly.
#[derive(Debug)]
pub enum ApiError {
    /// 404 - No session with this identifier is registered.
    SessionNotFound(String),
    /// 409 - The session's process has exited; it no longer takes input.
    SessionStopped(String),
    /// 400 - Malformed or invalid request.
    InvalidRequest(String),
    /// 500 - The PTY or the process could not be started.
    SpawnFailed(String),
    /// 500 - Reading or writing the terminal failed.
    Io(String),
    /// 500 - Catch-all internal error.
    InternalError(String),
}

impl ApiError {
    /// Returns the HTTP status code for this error variant.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::SessionStopped(_) => StatusCode::CONFLICT,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::SpawnFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a machine-readable error code string.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::SessionNotFound(_) => "session_not_found",
            ApiError::SessionStopped(_) => "session_stopped",
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::SpawnFailed(_) => "spawn_failed",
            ApiError::Io(_) => "io_error",
            ApiError::InternalError(_) => "internal_error",
        }
    }

    /// Returns a human-readable error message.
    pub fn message(&self) -> String {
        match self {
            ApiError::SessionNotFound(id) => format!("Session not found: {}.", id),
            ApiError::SessionStopped(id) => {
                format!("Session {} has exited and no longer accepts input.", id)
            }
            ApiError::InvalidRequest(detail) => format!("Invalid request: {}.", detail),
            ApiError::SpawnFailed(detail) => format!("Failed to spawn session: {}.", detail),
            ApiError::Io(detail) => format!("Terminal I/O failed: {}.", detail),
            ApiError::InternalError(detail) => format!("Internal error: {}.", detail),
        }
    }

    /// Map a manager error for the session `id`.
    pub fn from_session(id: &str, err: SessionError) -> Self {
        if err.is_stopped() {
            return ApiError::SessionStopped(id.to_string());
        }
        match err {
            SessionError::NotFound(id) => ApiError::SessionNotFound(id.to_string()),
            SessionError::Spawn(e) => ApiError::SpawnFailed(e.to_string()),
            SessionError::Io(e) => ApiError::Io(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status_code().is_server_error() {
            tracing::warn!(code = self.code(), message = %self.message(), "request failed");
        }
        let body = serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.message(),
            }
        });
        (self.status_code(), Json(body)).into_response()
    }
}
