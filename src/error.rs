use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;

/// Errors surfaced across the HTTP boundary: 400 validation, 401 auth, 404
/// missing, 409 invalid state transition, 500 unexpected.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("not authenticated")]
    Auth,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Auth => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            detail: self.to_string(),
        })
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Internal(e.to_string())
    }
}

impl From<crate::db::StoreError> for AppError {
    fn from(e: crate::db::StoreError) -> Self {
        match e {
            crate::db::StoreError::NotFound(what) => AppError::NotFound(what),
            crate::db::StoreError::Db(err) => AppError::Internal(err.to_string()),
        }
    }
}

impl From<crate::services::lifecycle::LifecycleError> for AppError {
    fn from(e: crate::services::lifecycle::LifecycleError) -> Self {
        use crate::services::lifecycle::LifecycleError as E;
        let message = e.to_string();
        match e {
            E::NotFound(what) => AppError::NotFound(what),
            E::InvalidTransition { .. } => AppError::Conflict(message),
            E::Validation(msg) => AppError::Validation(msg),
            E::Store(err) => err.into(),
        }
    }
}

/// The transport's verdict on a send attempt: transient failures are
/// retried with backoff, permanent ones fail the job immediately.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transient transport error: {0}")]
    Transient(String),
    #[error("permanent transport error: {0}")]
    Permanent(String),
}
