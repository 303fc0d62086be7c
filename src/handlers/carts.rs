use crate::handlers::common::{
    created_response, map_service_error, no_content_response, success_response, validate_input,
};
use crate::{auth::AuthenticatedUser, errors::ApiError, AppState};
use axum::{
    extract::{Json, Path, State},
    routing::{get, put},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for cart endpoints. The cart is per-buyer, so no
/// cart id appears in the paths; the principal comes from the bearer
/// token.
pub fn carts_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart).post(add_to_cart).delete(clear_cart))
        .route(
            "/{plant_id}",
            put(update_cart_item).delete(remove_cart_item),
        )
}

#[derive(Debug, Deserialize, Validate)]
struct AddItemRequest {
    plant_id: Uuid,
    #[serde(default = "default_quantity")]
    #[validate(range(min = 1))]
    quantity: i32,
}

fn default_quantity() -> i32 {
    1
}

#[derive(Debug, Deserialize, Validate)]
struct UpdateQuantityRequest {
    #[validate(range(min = 1))]
    quantity: i32,
}

/// Get the caller's cart with fresh prices and availability
async fn get_cart(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let buyer_id = user.require_buyer().map_err(map_service_error)?;

    let cart = state
        .services
        .cart
        .get_cart(buyer_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Add a plant to the cart, merging with an existing line
async fn add_to_cart(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let buyer_id = user.require_buyer().map_err(map_service_error)?;
    validate_input(&payload)?;

    let line = state
        .services
        .cart
        .add_item(buyer_id, payload.plant_id, payload.quantity)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(line))
}

/// Replace the quantity of a cart line
async fn update_cart_item(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(plant_id): Path<Uuid>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let buyer_id = user.require_buyer().map_err(map_service_error)?;
    validate_input(&payload)?;

    let line = state
        .services
        .cart
        .set_quantity(buyer_id, plant_id, payload.quantity)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(line))
}

/// Remove a cart line; removing an absent line still returns 204
async fn remove_cart_item(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(plant_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let buyer_id = user.require_buyer().map_err(map_service_error)?;

    state
        .services
        .cart
        .remove_item(buyer_id, plant_id)
        .await
        .map_err(map_service_error)?;

    Ok(no_content_response())
}

/// Empty the cart
async fn clear_cart(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let buyer_id = user.require_buyer().map_err(map_service_error)?;

    state
        .services
        .cart
        .clear_cart(buyer_id)
        .await
        .map_err(map_service_error)?;

    Ok(no_content_response())
}
