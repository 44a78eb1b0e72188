use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use thiserror::Error;

/// The six-way error taxonomy every engine normalizes into before it crosses
/// the HTTP boundary. Controls and adapters never let a raw provider
/// exception escape; they classify it into one of these first.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("validation: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    ConflictState(String),
    #[error("adapter transient error: {0}")]
    AdapterTransient(String),
    #[error("adapter permanent error: {0}")]
    AdapterPermanent(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DomainError::NotFound("row not found".to_string()),
            other => DomainError::Internal(other.to_string()),
        }
    }
}

impl From<crate::adapter::CloudError> for DomainError {
    fn from(err: crate::adapter::CloudError) -> Self {
        use crate::adapter::CloudError::*;
        match err {
            NotFound(msg) => DomainError::NotFound(msg),
            AccessDenied(msg) => DomainError::AdapterPermanent(msg),
            Throttled(msg) | Transient(msg) => DomainError::AdapterTransient(msg),
            Permanent(msg) => DomainError::AdapterPermanent(msg),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("bad request")]
    JsonBadRequest(Value),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::JsonBadRequest(payload) => {
                tracing::error!(payload = ?payload, "json bad request");
                (StatusCode::BAD_REQUEST, Json(payload)).into_response()
            }
            AppError::BadRequest(msg) => {
                tracing::warn!(error = %msg, "bad request");
                (StatusCode::BAD_REQUEST, msg).into_response()
            }
            AppError::Db(err) => {
                tracing::error!(error = %err, "database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string()).into_response()
            }
            AppError::Domain(domain) => {
                let status = match &domain {
                    DomainError::Validation(_) => StatusCode::BAD_REQUEST,
                    DomainError::NotFound(_) => StatusCode::NOT_FOUND,
                    DomainError::ConflictState(_) => StatusCode::CONFLICT,
                    DomainError::AdapterTransient(_) | DomainError::AdapterPermanent(_) => {
                        StatusCode::BAD_GATEWAY
                    }
                    DomainError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                tracing::error!(error = %domain, "domain error");
                (status, domain.to_string()).into_response()
            }
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
