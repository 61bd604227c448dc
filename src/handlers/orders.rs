use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;

use super::common::PaginationParams;
use crate::{
    auth::AuthUser,
    services::orders::{OrderListResponse, OrderTrackingView, OrderView, PaymentStatusView},
    ApiResponse, ApiResult, AppState,
};

/// GET /api/v1/orders
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<PaginationParams>,
) -> ApiResult<OrderListResponse> {
    let orders = state
        .services
        .orders
        .list_user_orders(user.user_id, params.page, params.limit)
        .await?;
    Ok(Json(ApiResponse::success(orders)))
}

/// GET /api/v1/orders/:id
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> ApiResult<OrderView> {
    let order = state.services.orders.get_user_order(&user, order_id).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// GET /api/v1/orders/tracking/:id
pub async fn order_tracking(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> ApiResult<OrderTrackingView> {
    let tracking = state.services.orders.track_order(&user, order_id).await?;
    Ok(Json(ApiResponse::success(tracking)))
}

/// POST /api/v1/orders/cancel/:id
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> ApiResult<OrderView> {
    let order = state
        .services
        .orders
        .cancel_user_order(&user, order_id)
        .await?;
    Ok(Json(
        ApiResponse::success(order).with_message("Order cancelled"),
    ))
}

/// PATCH /api/v1/orders/complete/:id
pub async fn complete_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> ApiResult<OrderView> {
    let order = state
        .services
        .orders
        .complete_user_order(&user, order_id)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// GET /api/v1/payment/status/:order_id
pub async fn payment_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> ApiResult<PaymentStatusView> {
    let status = state.services.orders.payment_status(&user, order_id).await?;
    Ok(Json(ApiResponse::success(status)))
}
