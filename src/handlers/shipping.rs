use axum::{
    extract::{Query, State},
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::shipping::{
        normalize_keyword, Destination, RateQuery, ShippingProviderError, ShippingQuote,
    },
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Deserialize)]
pub struct DestinationQuery {
    #[serde(default)]
    pub keyword: String,
}

#[derive(Debug, Deserialize)]
pub struct ShippingOptionsQuery {
    /// Defaults to the configured warehouse
    pub shipper_destination_id: Option<String>,
    pub receiver_destination_id: String,
    /// Parcel weight in grams
    pub weight: i64,
    pub item_value: Option<Decimal>,
    pub courier: Option<String>,
}

/// GET /api/v1/shipping/destinations?keyword=
pub async fn search_destinations(
    State(state): State<AppState>,
    _user: AuthUser,
    Query(query): Query<DestinationQuery>,
) -> ApiResult<Vec<Destination>> {
    let keyword = normalize_keyword(
        &query.keyword,
        state.config.checkout.destination_keyword_min_length,
    )
    .map_err(invalid_request)?;

    let destinations = state.services.shipping.search_destinations(keyword).await?;
    debug!(keyword, found = destinations.len(), "destination search");
    Ok(Json(ApiResponse::success(destinations)))
}

/// GET /api/v1/shipping/options
pub async fn shipping_options(
    State(state): State<AppState>,
    _user: AuthUser,
    Query(query): Query<ShippingOptionsQuery>,
) -> ApiResult<Vec<ShippingQuote>> {
    if query.weight <= 0 {
        return Err(ServiceError::ValidationError(
            "weight must be a positive number of grams".to_string(),
        ));
    }
    let receiver = query.receiver_destination_id.trim();
    if receiver.is_empty() {
        return Err(ServiceError::ValidationError(
            "receiver_destination_id is required".to_string(),
        ));
    }

    let origin = query
        .shipper_destination_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| state.config.shipping.warehouse_destination_id.clone());

    let rate_query = RateQuery {
        origin,
        destination: receiver.to_string(),
        weight_grams: query.weight,
        declared_value: query.item_value.unwrap_or(Decimal::ZERO),
        courier: query
            .courier
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_lowercase),
    };
    let quotes = state
        .services
        .shipping
        .calculate_shipping_cost(&rate_query)
        .await?;
    Ok(Json(ApiResponse::success(quotes)))
}

fn invalid_request(err: ShippingProviderError) -> ServiceError {
    match err {
        ShippingProviderError::InvalidRequest(msg) => ServiceError::ValidationError(msg),
        other => ServiceError::ShippingProvider(other),
    }
}
