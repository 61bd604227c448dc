use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Deserialize;
use uuid::Uuid;

use super::common::validate_input;
use crate::{
    auth::AdminUser,
    entities::{OrderStatus, PaymentStatus},
    errors::ServiceError,
    services::orders::{AdminOrderFilter, OrderListResponse, OrderView, UpdateOrderStatusRequest},
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct AdminOrderQuery {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub user_id: Option<Uuid>,
    /// RFC 3339 timestamp or `YYYY-MM-DD` (start of day, UTC)
    pub start_date: Option<String>,
    /// RFC 3339 timestamp or `YYYY-MM-DD` (end of day, UTC)
    pub end_date: Option<String>,
    #[serde(default)]
    pub page: u64,
    #[serde(default)]
    pub limit: u64,
}

/// Parses a date-range bound. Bare dates cover the whole day.
fn parse_date_bound(raw: &str, end_of_day: bool) -> Result<DateTime<Utc>, ServiceError> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let invalid = || ServiceError::ValidationError(format!("Invalid date '{}'", raw));
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| invalid())?;
    let naive = if end_of_day {
        date.and_hms_milli_opt(23, 59, 59, 999)
    } else {
        date.and_hms_opt(0, 0, 0)
    }
    .ok_or_else(invalid)?;
    Ok(Utc.from_utc_datetime(&naive))
}

impl TryFrom<AdminOrderQuery> for AdminOrderFilter {
    type Error = ServiceError;

    fn try_from(q: AdminOrderQuery) -> Result<Self, Self::Error> {
        Ok(Self {
            status: q.status,
            payment_status: q.payment_status,
            user_id: q.user_id,
            start_date: q
                .start_date
                .as_deref()
                .map(|d| parse_date_bound(d, false))
                .transpose()?,
            end_date: q
                .end_date
                .as_deref()
                .map(|d| parse_date_bound(d, true))
                .transpose()?,
            page: q.page,
            limit: q.limit,
        })
    }
}

/// GET /api/v1/admin/orders
pub async fn list_orders(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<AdminOrderQuery>,
) -> ApiResult<OrderListResponse> {
    let filter = AdminOrderFilter::try_from(query)?;
    let orders = state.services.orders.list_orders_admin(filter).await?;
    Ok(Json(ApiResponse::success(orders)))
}

/// PATCH /api/v1/admin/orders/:id
pub async fn update_order(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(order_id): Path<Uuid>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> ApiResult<OrderView> {
    validate_input(&request)?;
    let order = state
        .services
        .orders
        .update_order_admin(order_id, request)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// DELETE /api/v1/admin/orders/:id
pub async fn delete_order(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(order_id): Path<Uuid>,
) -> Result<StatusCode, ServiceError> {
    state.services.orders.delete_order_admin(order_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
