//! Parcel tracking lookups against the carrier-tracking aggregator.
//!
//! [`ShipmentTracker`] is the seam the order service talks to;
//! [`BinderbyteTracker`] is the HTTP implementation.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::config::TrackingConfig;
use crate::services::shipping::ShippingProviderError;

const TRACK_PATH: &str = "/v1/track";

/// One checkpoint in a parcel's journey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub date: String,
    pub description: String,
    pub location: Option<String>,
}

/// Carrier-reported state of a parcel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingInfo {
    pub courier: String,
    pub tracking_number: String,
    pub status: String,
    pub history: Vec<TrackingEvent>,
    pub estimated_delivery: Option<String>,
    pub receiver: Option<String>,
}

#[async_trait]
pub trait ShipmentTracker: Send + Sync {
    /// `Ok(None)` when the carrier has no record of the airway bill.
    async fn track(
        &self,
        courier: &str,
        tracking_number: &str,
    ) -> Result<Option<TrackingInfo>, ShippingProviderError>;
}

/// Maps a carrier display name to the aggregator's courier code.
pub fn courier_code(carrier_name: &str) -> String {
    let normalized = carrier_name.trim().to_lowercase();
    match normalized.as_str() {
        "lion parcel" => "lion".to_string(),
        "idexpress" => "ide".to_string(),
        "j&t" | "j&t express" => "jnt".to_string(),
        "pos indonesia" => "pos".to_string(),
        _ => normalized,
    }
}

#[derive(Debug, Deserialize)]
struct TrackEnvelope {
    status: u16,
    #[serde(default)]
    message: String,
    data: Option<TrackData>,
}

#[derive(Debug, Default, Deserialize)]
struct TrackData {
    #[serde(default)]
    summary: Option<TrackSummary>,
    #[serde(default)]
    detail: Option<TrackDetail>,
    #[serde(default)]
    history: Vec<RawEvent>,
    #[serde(default)]
    estimated_delivery: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TrackSummary {
    #[serde(default)]
    awb: Option<String>,
    #[serde(default)]
    courier: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TrackDetail {
    #[serde(default)]
    receiver: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(default)]
    date: String,
    #[serde(default)]
    desc: String,
    #[serde(default)]
    location: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl TrackData {
    fn into_info(self, courier: &str, tracking_number: &str) -> TrackingInfo {
        let summary = self.summary.unwrap_or_default();
        TrackingInfo {
            courier: non_empty(summary.courier).unwrap_or_else(|| courier.to_string()),
            tracking_number: non_empty(summary.awb).unwrap_or_else(|| tracking_number.to_string()),
            status: non_empty(summary.status).unwrap_or_else(|| "IN TRANSIT".to_string()),
            history: self
                .history
                .into_iter()
                .map(|e| TrackingEvent {
                    date: e.date,
                    description: e.desc,
                    location: non_empty(e.location),
                })
                .collect(),
            estimated_delivery: non_empty(self.estimated_delivery),
            receiver: self.detail.and_then(|d| non_empty(d.receiver)),
        }
    }
}

/// HTTP client for the Binderbyte tracking API.
#[derive(Clone)]
pub struct BinderbyteTracker {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl BinderbyteTracker {
    pub fn new(config: &TrackingConfig) -> Result<Self, ShippingProviderError> {
        Self::with_timeout(
            config.base_url.clone(),
            config.api_key.clone(),
            config.timeout(),
        )
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ShippingProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ShippingProviderError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl ShipmentTracker for BinderbyteTracker {
    #[instrument(skip(self))]
    async fn track(
        &self,
        courier: &str,
        tracking_number: &str,
    ) -> Result<Option<TrackingInfo>, ShippingProviderError> {
        let code = courier_code(courier);
        let response = self
            .client
            .get(format!("{}{}", self.base_url, TRACK_PATH))
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&[
                ("api_key", self.api_key.as_str()),
                ("courier", code.as_str()),
                ("awb", tracking_number),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        let envelope: Option<TrackEnvelope> = serde_json::from_slice(&body).ok();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let message = envelope
                .map(|env| env.message)
                .unwrap_or_else(|| String::from_utf8_lossy(&body).chars().take(200).collect());
            warn!(courier = %code, status = status.as_u16(), %message, "tracking provider error");
            return Err(ShippingProviderError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let envelope = envelope.ok_or_else(|| {
            ShippingProviderError::Malformed("tracking response is not valid JSON".to_string())
        })?;
        match (envelope.status, envelope.data) {
            (200, Some(data)) => {
                let info = data.into_info(&code, tracking_number);
                debug!(courier = %code, checkpoints = info.history.len(), "parcel tracked");
                Ok(Some(info))
            }
            (other, _) => {
                debug!(courier = %code, status = other, message = %envelope.message, "no tracking data");
                Ok(None)
            }
        }
    }
}
