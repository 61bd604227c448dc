//! Hosted payment gateway: session creation, status verification and cancellation.

pub mod midtrans;
pub mod signature;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::PaymentConfig;
use crate::entities::{order, order_item};

pub use midtrans::MidtransGateway;
pub use signature::{notification_signature, verify_notification_signature};

/// Item id of the synthetic line that carries the shipping fee.
pub const SHIPPING_FEE_ITEM_ID: &str = "SHIPPING_FEE";
/// Gateways reject longer item names.
pub const MAX_ITEM_NAME_LEN: usize = 50;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("payment gateway timed out")]
    Timeout,

    #[error("payment gateway returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("malformed payment gateway response: {0}")]
    Malformed(String),

    #[error("payment gateway unreachable: {0}")]
    Transport(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else if err.is_decode() {
            GatewayError::Malformed(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionItem {
    pub id: String,
    pub name: String,
    pub price: Decimal,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAddress {
    pub address: String,
    pub city: String,
    pub postal_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCustomer {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub billing_address: SessionAddress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCallbacks {
    pub finish: String,
    pub error: String,
    pub pending: String,
}

/// Everything the gateway needs to open a hosted payment session for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSessionRequest {
    pub order_ref: String,
    pub gross_amount: Decimal,
    pub items: Vec<SessionItem>,
    pub customer: SessionCustomer,
    pub callbacks: SessionCallbacks,
    pub expiry_hours: u32,
    pub enabled_payments: Vec<String>,
}

impl PaymentSessionRequest {
    /// Builds the session for a freshly inserted order and its item snapshots.
    pub fn for_order(
        order: &order::Model,
        items: &[order_item::Model],
        config: &PaymentConfig,
    ) -> Self {
        let mut lines: Vec<SessionItem> = items
            .iter()
            .map(|item| SessionItem {
                id: item.product_id.to_string(),
                name: truncate_name(&item.product_name),
                price: item.price,
                quantity: item.quantity,
            })
            .collect();

        if order.shipping_cost > Decimal::ZERO {
            lines.push(SessionItem {
                id: SHIPPING_FEE_ITEM_ID.to_string(),
                name: truncate_name(&format!(
                    "Shipping {} {}",
                    order.carrier_name, order.service_name
                )),
                price: order.shipping_cost,
                quantity: 1,
            });
        }

        let mut names = order.customer_name.split_whitespace();
        let first_name = names.next().unwrap_or("Customer").to_string();
        let last_name = names.collect::<Vec<_>>().join(" ");

        let frontend = config.frontend_url.trim_end_matches('/');
        let order_ref = order.id.to_string();

        Self {
            callbacks: SessionCallbacks {
                finish: format!("{}/orders", frontend),
                error: format!("{}/orders/{}?status=failed", frontend, order_ref),
                pending: format!("{}/orders/{}?status=pending", frontend, order_ref),
            },
            order_ref,
            gross_amount: order.total_amount,
            items: lines,
            customer: SessionCustomer {
                first_name,
                last_name,
                email: order.customer_email.clone(),
                phone: order.customer_phone.clone(),
                billing_address: SessionAddress {
                    address: order.shipping_address.clone(),
                    city: order.shipping_city.clone(),
                    postal_code: order.shipping_post_code.clone(),
                },
            },
            expiry_hours: config.expiry_hours,
            enabled_payments: config.enabled_payments.clone(),
        }
    }
}

/// Opened hosted session. The token drives the client-side payment popup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSession {
    pub token: String,
    pub redirect_url: String,
}

/// Gateway-side view of a transaction, as returned by the status API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionStatus {
    pub order_id: String,
    #[serde(default)]
    pub transaction_id: String,
    pub transaction_status: String,
    #[serde(default)]
    pub fraud_status: Option<String>,
    pub status_code: String,
    #[serde(default)]
    pub gross_amount: String,
    #[serde(default)]
    pub payment_type: Option<String>,
    #[serde(default)]
    pub transaction_time: Option<String>,
    #[serde(default)]
    pub settlement_time: Option<String>,
    #[serde(default)]
    pub status_message: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_transaction(
        &self,
        request: &PaymentSessionRequest,
    ) -> Result<PaymentSession, GatewayError>;

    async fn transaction_status(&self, order_ref: &str) -> Result<TransactionStatus, GatewayError>;

    async fn cancel_transaction(&self, order_ref: &str) -> Result<TransactionStatus, GatewayError>;

    /// Server key used to sign notifications.
    fn server_key(&self) -> &str;
}

/// Amounts travel as whole currency units.
pub fn whole_units(amount: Decimal) -> Result<i64, GatewayError> {
    if amount.is_sign_negative() {
        return Err(GatewayError::InvalidAmount(format!(
            "{} is negative",
            amount
        )));
    }
    amount
        .round()
        .to_i64()
        .ok_or_else(|| GatewayError::InvalidAmount(format!("{} is out of range", amount)))
}

pub fn truncate_name(name: &str) -> String {
    name.trim().chars().take(MAX_ITEM_NAME_LEN).collect()
}
