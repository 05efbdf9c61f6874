use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cinebook_reservation::ReservationError;
use serde_json::json;

#[derive(Debug)]
pub enum AppError {
    AuthenticationError(String),
    ValidationError(String),
    ConflictError(String),
    Anyhow(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::ConflictError(msg) => (StatusCode::CONFLICT, msg),
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {:#}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
        };

        let body = Json(json!({
            "ok": false,
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<ReservationError> for AppError {
    fn from(err: ReservationError) -> Self {
        match err {
            ReservationError::Validation(msg) => AppError::ValidationError(msg),
            ReservationError::IdempotencyKeyReused(_) => AppError::ConflictError(err.to_string()),
            // Reserved seats that could not be persisted are never reported as success
            ReservationError::Persistence(_) | ReservationError::Store(_) | ReservationError::Repository(_) => {
                AppError::Anyhow(err.into())
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::ValidationError(rejection.body_text())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Anyhow(err)
    }
}
