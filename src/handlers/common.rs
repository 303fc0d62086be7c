use crate::errors::{ApiError, ServiceError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use validator::Validate;

/// 200 with a JSON body.
pub fn success_response<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(data)).into_response()
}

/// 201 with a JSON body.
pub fn created_response<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(data)).into_response()
}

/// 204, used by the idempotent cart deletions.
pub fn no_content_response() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

/// Runs derive-level validation on a request body before it reaches a
/// service.
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ApiError> {
    input
        .validate()
        .map_err(|e| ApiError::ValidationError(format!("Validation failed: {}", e)))
}

/// Lifts a service error into the handler error type.
pub fn map_service_error(err: ServiceError) -> ApiError {
    ApiError::ServiceError(err)
}
