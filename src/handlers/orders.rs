use crate::handlers::common::{map_service_error, success_response};
use crate::{
    auth::AuthenticatedUser,
    errors::ApiError,
    services::orders::StatusUpdate,
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    routing::{get, put},
    Router,
};
use uuid::Uuid;

/// Creates the router for order endpoints
pub fn orders_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders))
        .route("/{id}", get(get_order))
        .route("/{id}/status", put(update_order_status))
}

/// List the caller's orders: placed orders for buyers, received orders
/// for vendors
async fn list_orders(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let orders = state
        .services
        .orders
        .list_orders(&user)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(orders))
}

/// Get one order with its items
async fn get_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .get_order(id, &user)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}

/// Move an order along its status lifecycle (vendor only)
async fn update_order_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<StatusUpdate>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let vendor_id = user.require_vendor().map_err(map_service_error)?;

    let order = state
        .services
        .orders
        .update_status(id, vendor_id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}
