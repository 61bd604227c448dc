//! Storefront API library
//!
//! Cart, checkout, payment-notification and order-fulfillment services behind
//! an axum REST surface.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod services;
pub mod tracing;

use std::sync::Arc;

use axum::{
    extract::FromRef,
    http::HeaderValue,
    response::Json,
    routing::{delete, get, patch, post},
    Router,
};
use chrono::Utc;
use serde::Serialize;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};

use crate::{auth::AuthService, config::AppConfig, db::DbPool, handlers::AppServices};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: Arc<AppConfig>,
    pub services: AppServices,
    pub auth: Arc<AuthService>,
}

impl FromRef<AppState> for Arc<AuthService> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

// Common response wrappers
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Every versioned route. Mounted under `/api/v1` by [`build_router`].
pub fn api_v1_routes() -> Router<AppState> {
    let cart = Router::new()
        .route(
            "/cart",
            get(handlers::cart::get_cart).delete(handlers::cart::clear_cart),
        )
        .route("/cart/items", post(handlers::cart::add_item))
        .route(
            "/cart/items/:product_id",
            patch(handlers::cart::update_item).delete(handlers::cart::remove_item),
        );

    let shipping = Router::new()
        .route(
            "/shipping/options",
            get(handlers::shipping::shipping_options),
        )
        .route(
            "/shipping/destinations",
            get(handlers::shipping::search_destinations),
        );

    let payment = Router::new()
        .route(
            "/payment/notification",
            post(handlers::payments::payment_notification),
        )
        .route(
            "/payment/status/:order_id",
            get(handlers::orders::payment_status),
        );

    let orders = Router::new()
        .route("/orders", get(handlers::orders::list_orders))
        .route("/orders/:id", get(handlers::orders::get_order))
        .route("/orders/cancel/:id", post(handlers::orders::cancel_order))
        .route(
            "/orders/tracking/:id",
            get(handlers::orders::order_tracking),
        )
        .route(
            "/orders/complete/:id",
            patch(handlers::orders::complete_order),
        );

    let admin = Router::new()
        .route("/admin/orders", get(handlers::admin_orders::list_orders))
        .route(
            "/admin/orders/:id",
            patch(handlers::admin_orders::update_order).delete(handlers::admin_orders::delete_order),
        );

    Router::new()
        .route("/checkout", post(handlers::checkout::checkout))
        .merge(cart)
        .merge(shipping)
        .merge(payment)
        .merge(orders)
        .merge(admin)
}

/// CORS policy from configuration: explicit origins win, otherwise permissive
/// when allowed (development or explicit opt-in).
pub fn build_cors_layer(cfg: &AppConfig) -> Result<CorsLayer, String> {
    let origins: Vec<HeaderValue> = cfg
        .cors_allowed_origins
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    if !origins.is_empty() {
        Ok(CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any))
    } else if cfg.should_allow_permissive_cors() {
        Ok(CorsLayer::permissive())
    } else {
        Err("Missing CORS configuration: set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true".to_string())
    }
}

/// Full application router with tracing, CORS, timeout and request-id layers.
pub fn build_router(state: AppState) -> Result<Router, String> {
    let cors = build_cors_layer(&state.config)?;
    let request_timeout = state.config.request_timeout();

    Ok(Router::new()
        .merge(handlers::health::health_routes())
        .nest("/api/v1", api_v1_routes())
        .layer(crate::tracing::configure_http_tracing())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(cors)
        .layer(axum::middleware::from_fn(
            crate::tracing::request_id_middleware,
        ))
        .with_state(state))
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[test]
    fn cors_requires_origins_outside_development() {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".into(),
            "x".repeat(64),
            "production".into(),
        );
        assert!(build_cors_layer(&cfg).is_err());

        cfg.cors_allowed_origins = Some("https://shop.example.com, ".into());
        assert!(build_cors_layer(&cfg).is_ok());
    }
}
