//! Error types shared by the repository layer and the HTTP handlers.
//!
//! Handlers return `Result<T, AppError>`; `AppError` renders itself as a JSON
//! `{"message": ...}` body with the matching status code.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// Failures raised by a `Repository` implementation.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The underlying database call failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A uniqueness constraint rejected the write.
    #[error("{0}")]
    Conflict(String),

    /// Stock could not cover the requested quantity. Carries the product name.
    #[error("insufficient stock for {0}")]
    InsufficientStock(String),

    /// The product was deactivated or deleted after it went into the cart.
    #[error("{0} is no longer available")]
    Unavailable(String),

    /// A referenced row does not exist.
    #[error("{0} not found")]
    NotFound(String),
}

impl RepositoryError {
    /// Maps a unique-violation database error to `Conflict`, anything else to `Database`.
    pub fn from_unique(err: sqlx::Error, message: &str) -> Self {
        if let sqlx::Error::Database(ref db_err) = err
            && db_err.is_unique_violation()
        {
            return Self::Conflict(message.to_owned());
        }
        Self::Database(err)
    }
}

/// Application-level error type returned by every handler.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// Object storage (presigning) failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// The payment gateway rejected or failed a request.
    #[error("payment error: {0}")]
    Payment(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// ErrorBody
///
/// The JSON shape of every error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub message: String,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Repository(RepositoryError::Conflict(_)) | Self::Conflict(_) => {
                StatusCode::CONFLICT
            }
            Self::Repository(
                RepositoryError::InsufficientStock(_) | RepositoryError::Unavailable(_),
            ) => StatusCode::CONFLICT,
            Self::Repository(RepositoryError::NotFound(_)) | Self::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::Repository(RepositoryError::Database(_)) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Storage(_) | Self::Payment(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Database details stay in the logs.
        let message = match &self {
            Self::Repository(RepositoryError::Database(_)) | Self::Internal(_) => {
                tracing::error!(error = %self, "request failed");
                "Internal server error".to_string()
            }
            Self::Storage(_) | Self::Payment(_) => {
                tracing::error!(error = %self, "upstream service failed");
                self.to_string()
            }
            _ => self.to_string(),
        };

        (status, Json(ErrorBody { message })).into_response()
    }
}

/// Result alias used across the handlers.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn repository_errors_map_to_http_statuses() {
        assert_eq!(
            status_of(RepositoryError::Conflict("email taken".into()).into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(RepositoryError::InsufficientStock("Mug".into()).into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(RepositoryError::Unavailable("Mug".into()).into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(RepositoryError::NotFound("product".into()).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(RepositoryError::Database(sqlx::Error::RowNotFound).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn client_errors_keep_their_message() {
        let err = AppError::BadRequest("quantity must be positive".into());
        assert_eq!(err.to_string(), "quantity must be positive");
        assert_eq!(status_of(err), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(AppError::Payment("gateway down".into())),
            StatusCode::BAD_GATEWAY
        );
    }

    #[tokio::test]
    async fn internal_errors_hide_details() {
        let response = AppError::Internal("pool exhausted".into()).into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["message"], "Internal server error");
    }
}
