use axum::{extract::State, http::StatusCode, Json};

use super::common::{created_response, validate_input};
use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::checkout::{CheckoutReceipt, CheckoutRequest},
    ApiResponse, AppState,
};

/// POST /api/v1/checkout
///
/// Turns the caller's cart into a pending order and returns the hosted
/// payment token alongside it.
pub async fn checkout(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CheckoutReceipt>>), ServiceError> {
    validate_input(&request)?;
    let receipt = state
        .services
        .checkout
        .process_checkout(user.user_id, request)
        .await?;
    Ok(created_response(receipt))
}
