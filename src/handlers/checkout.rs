use crate::handlers::common::{created_response, map_service_error, success_response};
use crate::{
    auth::AuthenticatedUser, entities::payment::PaymentMethod, errors::ApiError,
    services::checkout::ConfirmOutcome, AppState,
};
use axum::{
    extract::{Json, State},
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Creates the router for checkout endpoints. The webhook lives here
/// too; it is authenticated by signature, not by bearer token.
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/intent", post(create_intent))
        .route("/confirm", post(confirm_checkout))
        .route(
            "/webhook",
            post(crate::handlers::payment_webhooks::payment_webhook),
        )
}

#[derive(Debug, Deserialize)]
struct ConfirmRequest {
    intent_id: String,
    #[serde(default = "default_succeeded")]
    succeeded: bool,
    payment_method: Option<PaymentMethod>,
}

fn default_succeeded() -> bool {
    true
}

#[derive(Debug, Serialize)]
struct ConfirmResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    order_ids: Vec<Uuid>,
}

/// Create a payment intent for the caller's cart
async fn create_intent(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let buyer_id = user.require_buyer().map_err(map_service_error)?;

    let intent = state
        .services
        .checkout
        .create_intent(buyer_id)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(intent))
}

/// Apply a payment result reported by the client after completing the
/// gateway flow. The same transition also arrives via the gateway
/// webhook; whichever lands first wins and the other is a no-op.
async fn confirm_checkout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<ConfirmRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let buyer_id = user.require_buyer().map_err(map_service_error)?;

    let outcome = state
        .services
        .checkout
        .confirm(
            &payload.intent_id,
            payload.succeeded,
            payload.payment_method,
            Some(buyer_id),
        )
        .await
        .map_err(map_service_error)?;

    let response = match outcome {
        ConfirmOutcome::Completed { order_ids } => ConfirmResponse {
            status: "completed",
            order_ids,
        },
        ConfirmOutcome::AlreadyProcessed => ConfirmResponse {
            status: "already_processed",
            order_ids: vec![],
        },
        ConfirmOutcome::PaymentFailed => ConfirmResponse {
            status: "payment_failed",
            order_ids: vec![],
        },
    };

    Ok(success_response(response))
}
