use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::services::payments::GatewayError;
use crate::services::shipping::ShippingProviderError;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Uniform error envelope returned by every endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorBody,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code, e.g. `INSUFFICIENT_STOCK`
    pub code: String,
    /// Human-readable error description
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// One cart line that cannot be fulfilled from current stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockShortage {
    pub product_id: Uuid,
    pub product_name: String,
    pub requested: i32,
    pub available: i32,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Products not found: {0:?}")]
    ProductNotFound(Vec<Uuid>),

    #[error("Insufficient stock for {} item(s)", .0.len())]
    InsufficientStock(Vec<StockShortage>),

    #[error("Shipping destination could not be resolved: {0}")]
    AddressResolutionFailed(String),

    #[error("Shipping service {requested} is not available")]
    ShippingServiceUnavailable {
        requested: String,
        available: Vec<String>,
    },

    #[error("Shipping provider error: {0}")]
    ShippingProvider(#[from] ShippingProviderError),

    #[error("Payment session could not be created: {0}")]
    PaymentSessionFailed(String),

    #[error("Payment gateway error: {0}")]
    PaymentGateway(#[from] GatewayError),

    #[error("Cannot change order status from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Tracking number and carrier are required to ship an order")]
    MissingTrackingInfo,

    #[error("Invalid notification signature")]
    InvalidSignature,

    #[error("Payment verification failed: {0}")]
    VerificationFailed(String),

    #[error("Order {0} not found")]
    OrderNotFound(String),

    #[error("Profile incomplete: {0}")]
    ProfileIncomplete(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ValidationError(_) | Self::EmptyCart | Self::MissingTrackingInfo => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound(_) | Self::ProductNotFound(_) | Self::OrderNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::InsufficientStock(_) | Self::InvalidTransition { .. } | Self::Conflict(_) => {
                StatusCode::CONFLICT
            }
            Self::AddressResolutionFailed(_) | Self::ShippingServiceUnavailable { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::ShippingProvider(err) => match err {
                ShippingProviderError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                ShippingProviderError::Timeout => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::BAD_GATEWAY,
            },
            Self::PaymentGateway(GatewayError::Timeout) => StatusCode::SERVICE_UNAVAILABLE,
            Self::PaymentSessionFailed(_)
            | Self::PaymentGateway(_)
            | Self::VerificationFailed(_) => StatusCode::BAD_GATEWAY,
            Self::InvalidSignature | Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) | Self::ProfileIncomplete(_) => StatusCode::FORBIDDEN,
            Self::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Machine-readable code carried in the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::EmptyCart => "EMPTY_CART",
            Self::ProductNotFound(_) => "PRODUCT_NOT_FOUND",
            Self::InsufficientStock(_) => "INSUFFICIENT_STOCK",
            Self::AddressResolutionFailed(_) => "ADDRESS_RESOLUTION_FAILED",
            Self::ShippingServiceUnavailable { .. } => "SHIPPING_SERVICE_UNAVAILABLE",
            Self::ShippingProvider(_) => "SHIPPING_PROVIDER_ERROR",
            Self::PaymentSessionFailed(_) => "PAYMENT_SESSION_FAILED",
            Self::PaymentGateway(_) => "PAYMENT_GATEWAY_ERROR",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::MissingTrackingInfo => "MISSING_TRACKING_INFO",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::VerificationFailed(_) => "VERIFICATION_FAILED",
            Self::OrderNotFound(_) => "ORDER_NOT_FOUND",
            Self::ProfileIncomplete(_) => "PROFILE_INCOMPLETE",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Conflict(_) => "CONFLICT",
            Self::Timeout(_) => "TIMEOUT",
            Self::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Structured detail payload for errors that carry more than a message.
    pub fn details(&self) -> Option<Value> {
        match self {
            Self::InsufficientStock(items) => Some(json!({ "out_of_stock_items": items })),
            Self::ProductNotFound(ids) => Some(json!({ "missing_product_ids": ids })),
            Self::ShippingServiceUnavailable { available, .. } => {
                Some(json!({ "available_services": available }))
            }
            Self::InvalidTransition { from, to } => Some(json!({ "from": from, "to": to })),
            Self::ShippingProvider(ShippingProviderError::Upstream { status, message }) => {
                Some(json!({ "upstream_status": status, "upstream_message": message }))
            }
            _ => None,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::DatabaseError(_)
                | Self::PaymentGateway(GatewayError::Timeout)
                | Self::ShippingProvider(ShippingProviderError::Timeout)
        )
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        }

        let err = ErrorResponse {
            success: false,
            error: ErrorBody {
                code: self.code().to_string(),
                message: self.response_message(),
                details: self.details(),
                request_id: current_request_id(),
            },
        };

        (status, Json(err)).into_response()
    }
}
