use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("No username available for the expense")]
    MissingIdentity,

    #[error("Draft has no selected date")]
    IncompleteDraft,

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::InvalidImage(_) => (StatusCode::UNPROCESSABLE_ENTITY, self.to_string()),
            AppError::MissingIdentity => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::IncompleteDraft => (StatusCode::CONFLICT, self.to_string()),
            AppError::InvalidAmount(_) | AppError::InvalidDate(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            AppError::Io(e) => {
                tracing::error!("I/O error: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {msg}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
