// HTTP error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

pub type AppResult<T> = Result<T, AppError>;

/// Error returned by a handler, with its HTTP status
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_input", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
    status: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
            code: self.code,
            status: status.as_u16(),
        });

        (status, body).into_response()
    }
}

/// Map the domain taxonomy onto HTTP statuses
impl From<spreadify_core::Error> for AppError {
    fn from(err: spreadify_core::Error) -> Self {
        use spreadify_core::Error;

        let code = err.code();
        let status = match &err {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidState(_) | Error::AlreadyLive(_) => StatusCode::CONFLICT,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::InvalidInput(_) | Error::Rejected { .. } | Error::CredentialMissing { .. } => {
                StatusCode::BAD_REQUEST
            }
            Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::PlatformRejected { .. } | Error::RenditionFailed { .. } => {
                StatusCode::BAD_GATEWAY
            }
            Error::Process(_) | Error::Io(_) | Error::Serialization(_) | Error::Internal(_) => {
                tracing::error!(error = %err, "Internal error");
                return Self::internal_server_error("Internal server error");
            }
        };
        Self::new(status, code, err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::bad_request(format!("JSON error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spreadify_core::models::Platform;
    use spreadify_core::Error;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (Error::NotFound("k".into()), StatusCode::NOT_FOUND),
            (Error::InvalidState("ended".into()), StatusCode::CONFLICT),
            (Error::AlreadyLive("s1".into()), StatusCode::CONFLICT),
            (Error::Forbidden("owner".into()), StatusCode::FORBIDDEN),
            (Error::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (
                Error::RateLimited {
                    retry_after_seconds: 2,
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                Error::PlatformRejected {
                    platform: Platform::YouTube,
                    status: Some(500),
                    message: "backendError".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (Error::Internal("db".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let err = AppError::from(Error::Process("ffmpeg exploded at /srv/secret".into()));
        assert_eq!(err.code, "internal");
        assert_eq!(err.message, "Internal server error");
    }

    #[test]
    fn test_already_live_keeps_code() {
        let err = AppError::from(Error::AlreadyLive("abc123".into()));
        assert_eq!(err.code, "already_live");
        assert!(err.message.contains("abc123"));
    }

    #[test]
    fn test_invalid_input_code_matches_bad_request() {
        let domain = AppError::from(Error::InvalidInput("title is required".into()));
        let local = AppError::bad_request("JSON error");
        assert_eq!(domain.code, "invalid_input");
        assert_eq!(domain.code, local.code);
    }
}
