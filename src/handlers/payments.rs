use axum::{extract::State, Json};
use bytes::Bytes;
use serde::Serialize;
use tracing::info;

use crate::{
    services::payment_notifications::{
        NotificationError, NotificationOutcome, NotificationReceipt, RejectionCode,
    },
    ApiResponse, AppState,
};

/// Acknowledgement body returned to the gateway.
#[derive(Debug, Serialize)]
pub struct NotificationAck {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<RejectionCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<NotificationReceipt>,
}

impl From<NotificationOutcome> for NotificationAck {
    fn from(outcome: NotificationOutcome) -> Self {
        match outcome {
            NotificationOutcome::Applied(receipt) => Self {
                outcome: "applied",
                code: None,
                message: None,
                receipt: Some(receipt),
            },
            NotificationOutcome::Replayed(receipt) => Self {
                outcome: "replayed",
                code: None,
                message: None,
                receipt: Some(receipt),
            },
            NotificationOutcome::Rejected { code, message } => Self {
                outcome: "rejected",
                code: Some(code),
                message: Some(message),
                receipt: None,
            },
        }
    }
}

/// POST /api/v1/payment/notification
///
/// Unauthenticated: the body is authenticated by its signature. The raw bytes
/// are handed over untouched. Every authenticated outcome, rejections
/// included, is acknowledged with 200 so the gateway stops retrying.
pub async fn payment_notification(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ApiResponse<NotificationAck>>, NotificationError> {
    let outcome = state
        .services
        .payment_notifications
        .handle_notification(&body)
        .await?;
    if let NotificationOutcome::Rejected { code, message } = &outcome {
        info!(%code, %message, "payment notification acknowledged without effect");
    }
    Ok(Json(ApiResponse::success(NotificationAck::from(outcome))))
}
