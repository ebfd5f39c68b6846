use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt::Display;

use crate::auth::{jwt::PushAuthError, signature::SignatureError};
use crate::ledger::LedgerError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized")
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "resource not found")
    }

    pub fn internal<E: Display>(error: E) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
        });
        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl From<diesel::result::Error> for AppError {
    fn from(value: diesel::result::Error) -> Self {
        match value {
            diesel::result::Error::NotFound => AppError::not_found(),
            _ => AppError::internal(value),
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::NotFound(_) => AppError::not_found(),
            LedgerError::InvalidTransition { .. } => {
                AppError::new(StatusCode::CONFLICT, value.to_string())
            }
            LedgerError::Database(err) => AppError::from(err),
        }
    }
}

impl From<SignatureError> for AppError {
    fn from(value: SignatureError) -> Self {
        match value {
            SignatureError::NotConfigured => AppError::internal(value),
            _ => AppError::new(StatusCode::UNAUTHORIZED, value.to_string()),
        }
    }
}

impl From<PushAuthError> for AppError {
    fn from(value: PushAuthError) -> Self {
        match value {
            PushAuthError::NotConfigured => AppError::internal(value),
            PushAuthError::Jwks(_) => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, value.to_string())
            }
            _ => AppError::new(StatusCode::UNAUTHORIZED, value.to_string()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        AppError::internal(value)
    }
}
