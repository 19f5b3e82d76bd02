//! Service error types

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tokenserver_core::ErrorKind;

/// Authentication scheme expected in `Authorization` and echoed in the challenge
pub const AUTH_SCHEME: &str = "BrowserID";

/// `WWW-Authenticate` value sent with every 401
pub const CHALLENGE: &str = "BrowserID ";

#[derive(Debug, Error)]
pub enum TokenServerError {
    #[error("Missing credentials")]
    MissingCredentials,

    #[error("Verification rejected: {0}")]
    Unauthorized(ErrorKind),

    #[error("No node has capacity for a new assignment")]
    NodeUnavailable,

    #[error("Assignment backend did not answer in time")]
    BackendTimeout,

    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TokenServerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            TokenServerError::MissingCredentials => StatusCode::UNAUTHORIZED,
            TokenServerError::Unauthorized(kind) if kind.is_infrastructure() => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            TokenServerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            TokenServerError::NodeUnavailable | TokenServerError::BackendTimeout => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            TokenServerError::UnknownService(_) => StatusCode::NOT_FOUND,
            TokenServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<rusqlite::Error> for TokenServerError {
    fn from(e: rusqlite::Error) -> Self {
        TokenServerError::Internal(e.to_string())
    }
}

impl From<crate::token::TokenError> for TokenServerError {
    fn from(e: crate::token::TokenError) -> Self {
        TokenServerError::Internal(e.to_string())
    }
}

impl IntoResponse for TokenServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (label, reason) = match &self {
            TokenServerError::MissingCredentials => {
                tracing::debug!("Request without credentials");
                ("invalid-credentials", "missing-credentials".to_string())
            }
            TokenServerError::Unauthorized(kind) if kind.is_infrastructure() => {
                tracing::warn!(reason = %kind, "Verification infrastructure failure");
                ("service-unavailable", kind.to_string())
            }
            TokenServerError::Unauthorized(kind) => {
                tracing::info!(reason = %kind, "Rejected assertion");
                ("invalid-credentials", kind.to_string())
            }
            TokenServerError::NodeUnavailable => {
                tracing::error!("No storage node has spare capacity");
                ("service-unavailable", "node-unavailable".to_string())
            }
            TokenServerError::BackendTimeout => {
                tracing::error!("Node assignment timed out");
                ("service-unavailable", "backend-timeout".to_string())
            }
            TokenServerError::UnknownService(service) => ("not-found", service.clone()),
            TokenServerError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                ("error", "internal-error".to_string())
            }
        };

        let body = json!({ "status": label, "reason": reason });
        let mut response = (status, axum::Json(body)).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(CHALLENGE),
            );
        }
        response
    }
}
