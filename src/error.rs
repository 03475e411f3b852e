use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{breaker::BreakerError, dao::storage::StorageError, queue::QueueError};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    StorageUnavailable(#[source] StorageError),
    /// Queue backend is unavailable.
    #[error("queue unavailable")]
    QueueUnavailable(#[source] QueueError),
    /// The circuit protecting a dependency is open; the call was skipped.
    #[error("dependency circuit is open: {0}")]
    CircuitOpen(String),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Invalid input provided by the caller.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Another instance won the race for this operation. Expected under
    /// concurrency; reported as a conflict, not a failure.
    #[error("conflict: {0}")]
    Conflict(String),
    /// An invariant-violating partial write was detected. Must surface
    /// loudly; silently continuing would corrupt tournament history.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => ServiceError::NotFound(what),
            other => ServiceError::StorageUnavailable(other),
        }
    }
}

impl From<QueueError> for ServiceError {
    fn from(err: QueueError) -> Self {
        ServiceError::QueueUnavailable(err)
    }
}

impl From<BreakerError<QueueError>> for ServiceError {
    fn from(err: BreakerError<QueueError>) -> Self {
        match err {
            BreakerError::Open { name } => ServiceError::CircuitOpen(name),
            BreakerError::Inner(inner) => ServiceError::QueueUnavailable(inner),
        }
    }
}

impl From<BreakerError<StorageError>> for ServiceError {
    fn from(err: BreakerError<StorageError>) -> Self {
        match err {
            BreakerError::Open { name } => ServiceError::CircuitOpen(name),
            BreakerError::Inner(inner) => inner.into(),
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Lost a race against a concurrent invocation.
    #[error("conflict: {0}")]
    Conflict(String),
    /// A dependency is unavailable or its circuit is open.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::StorageUnavailable(source) => {
                AppError::ServiceUnavailable(source.to_string())
            }
            ServiceError::QueueUnavailable(source) => {
                AppError::ServiceUnavailable(source.to_string())
            }
            ServiceError::CircuitOpen(name) => {
                AppError::ServiceUnavailable(format!("circuit `{name}` is open"))
            }
            ServiceError::Unauthorized(message) => AppError::Unauthorized(message),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::Conflict(message) => AppError::Conflict(message),
            ServiceError::Fatal(message) => AppError::Internal(message),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}
