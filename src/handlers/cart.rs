use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use super::common::validate_input;
use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::cart::{AddCartItemRequest, CartView, UpdateCartItemRequest},
    ApiResponse, ApiResult, AppState,
};

/// GET /api/v1/cart
pub async fn get_cart(State(state): State<AppState>, user: AuthUser) -> ApiResult<CartView> {
    let cart = state.services.cart.get_cart(user.user_id).await?;
    Ok(Json(ApiResponse::success(cart)))
}

/// POST /api/v1/cart/items
pub async fn add_item(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<AddCartItemRequest>,
) -> ApiResult<CartView> {
    validate_input(&request)?;
    let cart = state.services.cart.add_item(user.user_id, request).await?;
    Ok(Json(
        ApiResponse::success(cart).with_message("Item added to cart"),
    ))
}

/// PATCH /api/v1/cart/items/:product_id
pub async fn update_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<Uuid>,
    Json(request): Json<UpdateCartItemRequest>,
) -> ApiResult<CartView> {
    validate_input(&request)?;
    let cart = state
        .services
        .cart
        .update_item(user.user_id, product_id, request)
        .await?;
    Ok(Json(ApiResponse::success(cart)))
}

/// DELETE /api/v1/cart/items/:product_id
pub async fn remove_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<Uuid>,
) -> ApiResult<CartView> {
    let cart = state
        .services
        .cart
        .remove_item(user.user_id, product_id)
        .await?;
    Ok(Json(ApiResponse::success(cart)))
}

/// DELETE /api/v1/cart
pub async fn clear_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<StatusCode, ServiceError> {
    state.services.cart.clear_cart(user.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
