use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use super::{
    whole_units, GatewayError, PaymentGateway, PaymentSession, PaymentSessionRequest,
    TransactionStatus,
};
use crate::config::PaymentConfig;

/// Midtrans client: Snap for hosted sessions, the core API for status and cancel.
#[derive(Clone)]
pub struct MidtransGateway {
    client: reqwest::Client,
    server_key: String,
    snap_base_url: String,
    api_base_url: String,
}

impl MidtransGateway {
    pub fn new(config: &PaymentConfig) -> Result<Self, GatewayError> {
        Self::with_urls(
            config.server_key.clone(),
            config.snap_base_url(),
            config.api_base_url(),
            config.timeout(),
        )
    }

    pub fn with_urls(
        server_key: impl Into<String>,
        snap_base_url: impl Into<String>,
        api_base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            server_key: server_key.into(),
            snap_base_url: snap_base_url.into().trim_end_matches('/').to_string(),
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn snap_body(request: &PaymentSessionRequest) -> Result<Value, GatewayError> {
        let gross_amount = whole_units(request.gross_amount)?;

        let mut item_details = Vec::with_capacity(request.items.len());
        let mut items_sum = 0i64;
        for item in &request.items {
            let price = whole_units(item.price)?;
            items_sum += price * i64::from(item.quantity);
            item_details.push(json!({
                "id": item.id,
                "price": price,
                "quantity": item.quantity,
                "name": item.name,
            }));
        }
        if items_sum != gross_amount {
            return Err(GatewayError::InvalidAmount(format!(
                "item lines sum to {} but gross amount is {}",
                items_sum, gross_amount
            )));
        }

        let customer = &request.customer;
        let address = json!({
            "first_name": customer.first_name,
            "last_name": customer.last_name,
            "email": customer.email,
            "phone": customer.phone,
            "address": customer.billing_address.address,
            "city": customer.billing_address.city,
            "postal_code": customer.billing_address.postal_code,
            "country_code": "IDN",
        });

        Ok(json!({
            "transaction_details": {
                "order_id": request.order_ref,
                "gross_amount": gross_amount,
            },
            "item_details": item_details,
            "customer_details": {
                "first_name": customer.first_name,
                "last_name": customer.last_name,
                "email": customer.email,
                "phone": customer.phone,
                "billing_address": address.clone(),
                "shipping_address": address,
            },
            "callbacks": {
                "finish": request.callbacks.finish,
                "error": request.callbacks.error,
                "pending": request.callbacks.pending,
            },
            "expiry": {
                "unit": "hours",
                "duration": request.expiry_hours,
            },
            "enabled_payments": request.enabled_payments,
        }))
    }

    async fn core_call(&self, method: Method, url: String) -> Result<TransactionStatus, GatewayError> {
        let response = self
            .client
            .request(method, url)
            .basic_auth(&self.server_key, Some(""))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        let value: Value = serde_json::from_slice(&body).map_err(|e| {
            if status.is_success() {
                GatewayError::Malformed(e.to_string())
            } else {
                GatewayError::Upstream {
                    status: status.as_u16(),
                    message: String::from_utf8_lossy(&body).chars().take(200).collect(),
                }
            }
        })?;

        let message = value
            .get("status_message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if !status.is_success() {
            return Err(GatewayError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        // The core API answers 200 with an error status_code in the body for
        // unknown or uncancellable transactions.
        if value.get("transaction_status").is_none() {
            let code = value
                .get("status_code")
                .and_then(Value::as_str)
                .and_then(|c| c.parse::<u16>().ok())
                .unwrap_or(status.as_u16());
            return Err(GatewayError::Upstream {
                status: code,
                message,
            });
        }

        serde_json::from_value(value).map_err(|e| GatewayError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl PaymentGateway for MidtransGateway {
    #[instrument(skip(self, request), fields(order_ref = %request.order_ref))]
    async fn create_transaction(
        &self,
        request: &PaymentSessionRequest,
    ) -> Result<PaymentSession, GatewayError> {
        let body = Self::snap_body(request)?;

        let response = self
            .client
            .post(format!("{}/snap/v1/transactions", self.snap_base_url))
            .basic_auth(&self.server_key, Some(""))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            let message = serde_json::from_slice::<Value>(&bytes)
                .ok()
                .and_then(|v| {
                    v.get("error_messages").and_then(Value::as_array).map(|msgs| {
                        msgs.iter()
                            .filter_map(Value::as_str)
                            .collect::<Vec<_>>()
                            .join("; ")
                    })
                })
                .unwrap_or_else(|| String::from_utf8_lossy(&bytes).chars().take(200).collect());
            warn!(status = status.as_u16(), %message, "snap session rejected");
            return Err(GatewayError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let session: PaymentSession = serde_json::from_slice(&bytes)
            .map_err(|e| GatewayError::Malformed(e.to_string()))?;
        debug!("snap session created");
        Ok(session)
    }

    #[instrument(skip(self))]
    async fn transaction_status(&self, order_ref: &str) -> Result<TransactionStatus, GatewayError> {
        self.core_call(
            Method::GET,
            format!("{}/v2/{}/status", self.api_base_url, order_ref),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn cancel_transaction(&self, order_ref: &str) -> Result<TransactionStatus, GatewayError> {
        self.core_call(
            Method::POST,
            format!("{}/v2/{}/cancel", self.api_base_url, order_ref),
        )
        .await
    }

    fn server_key(&self) -> &str {
        &self.server_key
    }
}
