use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Standard error body returned by every endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Additional detail (validation failures, offending identifiers)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(i32),

    #[error("Plant {0} not found")]
    ItemNotFound(Uuid),

    #[error("Plant {0} is out of stock")]
    ItemUnavailable(Uuid),

    #[error("No cart line for plant {0}")]
    LineNotFound(Uuid),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Plant {0} became unavailable during checkout")]
    ItemBecameUnavailable(Uuid),

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Payment failed: {0}")]
    PaymentFailed(String),

    #[error("Checkout failed: {0}")]
    CheckoutFailed(String),

    #[error("Invalid status transition: {0}")]
    InvalidStatus(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError(_) | Self::InvalidQuantity(_) | Self::EmptyCart => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound(_) | Self::ItemNotFound(_) | Self::LineNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::ItemUnavailable(_) | Self::ItemBecameUnavailable(_) | Self::Conflict(_) => {
                StatusCode::CONFLICT
            }
            Self::InvalidStatus(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::PaymentFailed(_) => StatusCode::PAYMENT_REQUIRED,
            Self::GatewayUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_)
            | Self::CheckoutFailed(_)
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message suitable for HTTP responses. Internal errors return generic
    /// text so storage details never reach the client.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) | Self::Other(_) => "Internal server error".to_string(),
            // Gateway internals stay behind the gateway boundary.
            Self::GatewayUnavailable(_) => "Payment gateway unavailable".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        (status, Json(err)).into_response()
    }
}

/// Error type at the HTTP handler layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Service error: {0}")]
    ServiceError(#[from] ServiceError),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::ServiceError(service_error) => (
                service_error.status_code(),
                service_error.response_message(),
            ),
            ApiError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        };

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message,
            details: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_mapping() {
        assert_eq!(
            ServiceError::EmptyCart.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::InvalidQuantity(0).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::ItemNotFound(Uuid::nil()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::LineNotFound(Uuid::nil()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::ItemBecameUnavailable(Uuid::nil()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::GatewayUnavailable("down".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ServiceError::PaymentFailed("declined".into()).status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            ServiceError::Forbidden("vendor only".into()).status_code(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn response_message_hides_internal_details() {
        let err = ServiceError::InternalError("connection pool exhausted".into());
        assert_eq!(err.response_message(), "Internal server error");

        let err = ServiceError::GatewayUnavailable("stripe: invalid api key sk_live_x".into());
        assert_eq!(err.response_message(), "Payment gateway unavailable");

        // User-correctable errors keep their message.
        let err = ServiceError::EmptyCart;
        assert_eq!(err.response_message(), "Cart is empty");
    }

    #[test]
    fn api_error_delegates_to_service_error_status() {
        let api_err = ApiError::ServiceError(ServiceError::EmptyCart);
        let response = api_err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
