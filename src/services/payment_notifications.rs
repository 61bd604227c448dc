//! Gateway webhook processing.
//!
//! A notification is authenticated by its signature, re-verified against the
//! gateway's status API, deduplicated by `"{transaction_id}:{transaction_status}"`
//! and then applied to the order under the per-order lock. Every processed
//! notification leaves exactly one payment log row.

use std::str::FromStr;
use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, DbErr, EntityTrait, QueryFilter, Set,
    SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::Display;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::{order, payment_log, OrderStatus, PaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        inventory::InventoryLedger,
        locks::KeyedLocks,
        orders::{apply_cancellation, find_order_for_update},
        payments::{verify_notification_signature, PaymentGateway, TransactionStatus},
    },
};

/// Gateway timestamps are local time in Western Indonesia (UTC+7).
const GATEWAY_UTC_OFFSET_SECS: i32 = 7 * 3600;
const GATEWAY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Webhook body as posted by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentNotification {
    pub order_id: String,
    pub status_code: String,
    pub gross_amount: String,
    pub signature_key: String,
    pub transaction_status: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub fraud_status: Option<String>,
    #[serde(default)]
    pub payment_type: Option<String>,
    #[serde(default)]
    pub transaction_time: Option<String>,
    #[serde(default)]
    pub settlement_time: Option<String>,
}

/// What a notification does to the order besides recording the payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderEffect {
    None,
    /// PENDING moves to PACKAGED
    Advance,
    /// Cancel and restore stock, once
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedStatus {
    pub payment_status: PaymentStatus,
    pub effect: OrderEffect,
}

/// The one mapping from gateway vocabulary to internal state. `None` means the
/// status is not one we know.
pub fn map_transaction_status(
    transaction_status: &str,
    fraud_status: Option<&str>,
) -> Option<MappedStatus> {
    let status = transaction_status.trim().to_ascii_lowercase();
    let fraud = fraud_status.map(|f| f.trim().to_ascii_lowercase());

    let (payment_status, effect) = match status.as_str() {
        "capture" => match fraud.as_deref() {
            Some("accept") => (PaymentStatus::Paid, OrderEffect::Advance),
            Some("deny") => (PaymentStatus::Failed, OrderEffect::Cancel),
            _ => (PaymentStatus::Challenge, OrderEffect::None),
        },
        "settlement" => (PaymentStatus::Paid, OrderEffect::Advance),
        "pending" => (PaymentStatus::Pending, OrderEffect::None),
        "deny" | "cancel" | "expire" => (PaymentStatus::Failed, OrderEffect::Cancel),
        "refund" | "partial_refund" => (PaymentStatus::Refunded, OrderEffect::Cancel),
        _ => return None,
    };
    Some(MappedStatus {
        payment_status,
        effect,
    })
}

/// Parses a gateway `YYYY-MM-DD HH:MM:SS` local timestamp.
pub fn parse_gateway_time(raw: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), GATEWAY_TIME_FORMAT).ok()?;
    let offset = FixedOffset::east_opt(GATEWAY_UTC_OFFSET_SECS)?;
    naive
        .and_local_timezone(offset)
        .single()
        .map(|t| t.with_timezone(&Utc))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionCode {
    OrderNotFound,
    UnknownTransactionStatus,
    AmountMismatch,
    StaleNotification,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationReceipt {
    pub order_id: Uuid,
    pub external_order_id: String,
    pub transaction_status: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub changed: bool,
}

/// Result of an authenticated notification. All variants are acknowledged to
/// the gateway with 200 so it stops retrying.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationOutcome {
    Applied(NotificationReceipt),
    Replayed(NotificationReceipt),
    Rejected { code: RejectionCode, message: String },
}

impl NotificationOutcome {
    fn label(&self) -> &'static str {
        match self {
            NotificationOutcome::Applied(_) => "applied",
            NotificationOutcome::Replayed(_) => "replayed",
            NotificationOutcome::Rejected { .. } => "rejected",
        }
    }
}

/// Failures the gateway should see as non-2xx and retry (or give up on).
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("malformed notification: {0}")]
    Malformed(String),

    #[error("invalid notification signature")]
    InvalidSignature,

    #[error("notification could not be verified: {0}")]
    VerificationFailed(String),

    #[error(transparent)]
    Infrastructure(#[from] ServiceError),
}

impl From<DbErr> for NotificationError {
    fn from(err: DbErr) -> Self {
        NotificationError::Infrastructure(ServiceError::DatabaseError(err))
    }
}

impl From<NotificationError> for ServiceError {
    fn from(err: NotificationError) -> Self {
        match err {
            NotificationError::Malformed(msg) => ServiceError::ValidationError(msg),
            NotificationError::InvalidSignature => ServiceError::InvalidSignature,
            NotificationError::VerificationFailed(msg) => ServiceError::VerificationFailed(msg),
            NotificationError::Infrastructure(e) => e,
        }
    }
}

impl IntoResponse for NotificationError {
    fn into_response(self) -> Response {
        ServiceError::from(self).into_response()
    }
}

/// Row to append to the payment log for one processed notification.
struct LogEntry {
    status: String,
    amount: Decimal,
    payment_method: Option<String>,
    transaction_id: String,
    idempotency_key: Option<String>,
    is_replay: bool,
    payment_time: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct PaymentNotificationService {
    db_pool: Arc<DbPool>,
    gateway: Arc<dyn PaymentGateway>,
    locks: KeyedLocks,
    inventory: InventoryLedger,
    event_sender: Option<Arc<EventSender>>,
}

impl PaymentNotificationService {
    pub fn new(
        db_pool: Arc<DbPool>,
        gateway: Arc<dyn PaymentGateway>,
        locks: KeyedLocks,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db_pool,
            gateway,
            locks,
            inventory: InventoryLedger::new(),
            event_sender,
        }
    }

    #[instrument(skip(self, raw), fields(bytes = raw.len()))]
    pub async fn handle_notification(
        &self,
        raw: &[u8],
    ) -> Result<NotificationOutcome, NotificationError> {
        let result = self.process(raw).await;
        let outcome = match &result {
            Ok(outcome) => outcome.label(),
            Err(NotificationError::Malformed(_)) => "malformed",
            Err(NotificationError::InvalidSignature) => "invalid_signature",
            Err(NotificationError::VerificationFailed(_)) => "verification_failed",
            Err(NotificationError::Infrastructure(_)) => "error",
        };
        counter!("storefront.payment_notifications", 1, "outcome" => outcome);
        result
    }

    async fn process(&self, raw: &[u8]) -> Result<NotificationOutcome, NotificationError> {
        let payload: Value = serde_json::from_slice(raw)
            .map_err(|e| NotificationError::Malformed(e.to_string()))?;
        let notification: PaymentNotification = serde_json::from_value(payload.clone())
            .map_err(|e| NotificationError::Malformed(e.to_string()))?;
        if notification.order_id.trim().is_empty() || notification.signature_key.trim().is_empty()
        {
            return Err(NotificationError::Malformed(
                "order_id and signature_key are required".to_string(),
            ));
        }
        Decimal::from_str(notification.gross_amount.trim())
            .map_err(|_| NotificationError::Malformed("gross_amount is not a number".to_string()))?;

        if !verify_notification_signature(
            &notification.order_id,
            &notification.status_code,
            &notification.gross_amount,
            &notification.signature_key,
            self.gateway.server_key(),
        ) {
            warn!(external_order_id = %notification.order_id, "notification signature mismatch");
            return Err(NotificationError::InvalidSignature);
        }

        let verified = self
            .gateway
            .transaction_status(&notification.order_id)
            .await
            .map_err(|e| NotificationError::VerificationFailed(e.to_string()))?;
        if verified.order_id != notification.order_id {
            return Err(NotificationError::VerificationFailed(format!(
                "gateway returned order {} for {}",
                verified.order_id, notification.order_id
            )));
        }
        let amount = Decimal::from_str(verified.gross_amount.trim()).map_err(|_| {
            NotificationError::VerificationFailed(format!(
                "gateway reported a non-numeric gross_amount '{}'",
                verified.gross_amount
            ))
        })?;
        if !verified
            .transaction_status
            .eq_ignore_ascii_case(&notification.transaction_status)
        {
            debug!(
                notified = %notification.transaction_status,
                verified = %verified.transaction_status,
                "gateway status differs from notification, using gateway"
            );
        }

        let Some(order) = order::Entity::find()
            .filter(order::Column::ExternalPaymentOrderId.eq(notification.order_id.as_str()))
            .one(&*self.db_pool)
            .await?
        else {
            warn!(external_order_id = %notification.order_id, "notification for unknown order dropped");
            return Ok(NotificationOutcome::Rejected {
                code: RejectionCode::OrderNotFound,
                message: format!("No order for {}", notification.order_id),
            });
        };

        self.apply(order.id, &notification, &verified, amount, payload)
            .await
    }

    /// Everything from here runs under the per-order lock and row lock.
    async fn apply(
        &self,
        order_id: Uuid,
        notification: &PaymentNotification,
        verified: &TransactionStatus,
        amount: Decimal,
        payload: Value,
    ) -> Result<NotificationOutcome, NotificationError> {
        let transaction_status = verified.transaction_status.trim().to_ascii_lowercase();
        let transaction_id = first_non_empty(&[
            Some(verified.transaction_id.as_str()),
            notification.transaction_id.as_deref(),
        ])
        .unwrap_or_else(|| notification.order_id.clone());
        let idempotency_key = format!("{}:{}", transaction_id, transaction_status);
        let fraud_status = verified
            .fraud_status
            .as_deref()
            .or(notification.fraud_status.as_deref());
        let payment_type = verified
            .payment_type
            .clone()
            .or_else(|| notification.payment_type.clone());
        let gateway_time = verified
            .settlement_time
            .as_deref()
            .or(verified.transaction_time.as_deref())
            .or(notification.settlement_time.as_deref())
            .or(notification.transaction_time.as_deref())
            .and_then(parse_gateway_time);

        let _guard = self.locks.lock(order_id).await;
        let txn = self.db_pool.begin().await?;
        let Some(order) = find_order_for_update(&txn, order_id).await? else {
            return Ok(NotificationOutcome::Rejected {
                code: RejectionCode::OrderNotFound,
                message: format!("Order {} was removed", order_id),
            });
        };

        let receipt = |order: &order::Model, changed: bool| NotificationReceipt {
            order_id: order.id,
            external_order_id: notification.order_id.clone(),
            transaction_status: transaction_status.clone(),
            status: order.status,
            payment_status: order.payment_status,
            changed,
        };

        let mut entry = LogEntry {
            status: payment_log::REJECTED_STATUS.to_string(),
            amount,
            payment_method: payment_type.clone(),
            transaction_id: transaction_id.clone(),
            idempotency_key: Some(idempotency_key.clone()),
            is_replay: false,
            payment_time: gateway_time,
        };

        if payment_log::Entity::find()
            .filter(payment_log::Column::IdempotencyKey.eq(idempotency_key.as_str()))
            .one(&txn)
            .await?
            .is_some()
        {
            entry.status = order.payment_status.to_string();
            entry.idempotency_key = None;
            entry.is_replay = true;
            insert_log(&txn, order.id, entry, payload).await?;
            txn.commit().await?;
            info!(%order_id, %idempotency_key, "duplicate notification recorded as replay");
            return Ok(NotificationOutcome::Replayed(receipt(&order, false)));
        }

        if amount != order.total_amount {
            warn!(%order_id, %amount, expected = %order.total_amount, "notification amount mismatch");
            insert_log(&txn, order.id, entry, payload).await?;
            txn.commit().await?;
            return Ok(NotificationOutcome::Rejected {
                code: RejectionCode::AmountMismatch,
                message: format!(
                    "Notified amount {} does not match order total {}",
                    amount, order.total_amount
                ),
            });
        }

        let Some(mapped) = map_transaction_status(&transaction_status, fraud_status) else {
            warn!(%order_id, %transaction_status, "unknown transaction status");
            insert_log(&txn, order.id, entry, payload).await?;
            txn.commit().await?;
            return Ok(NotificationOutcome::Rejected {
                code: RejectionCode::UnknownTransactionStatus,
                message: format!("Unknown transaction status '{}'", transaction_status),
            });
        };

        let previous = order.clone();
        if !previous.payment_status.can_advance_to(mapped.payment_status) {
            info!(
                %order_id,
                current = %previous.payment_status,
                notified = %mapped.payment_status,
                "stale notification ignored"
            );
            insert_log(&txn, order.id, entry, payload).await?;
            txn.commit().await?;
            return Ok(NotificationOutcome::Rejected {
                code: RejectionCode::StaleNotification,
                message: format!(
                    "Payment status {} cannot move to {}",
                    previous.payment_status, mapped.payment_status
                ),
            });
        }

        entry.status = mapped.payment_status.to_string();
        if let Err(err) = insert_log(&txn, order.id, entry, payload.clone()).await {
            if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                // Another process recorded the same key between our check and insert.
                txn.rollback().await?;
                return self
                    .record_race_replay(order_id, notification, &transaction_id, amount, payload)
                    .await;
            }
            return Err(err.into());
        }

        let updated = match mapped.effect {
            OrderEffect::Cancel if previous.status.is_user_cancellable() => {
                apply_cancellation(&txn, &self.inventory, order, mapped.payment_status).await?
            }
            effect => {
                let now = Utc::now();
                let mut active: order::ActiveModel = order.into();
                active.payment_status = Set(mapped.payment_status);
                if effect == OrderEffect::Advance && previous.status == OrderStatus::Pending {
                    active.status = Set(OrderStatus::Packaged);
                }
                if mapped.payment_status == PaymentStatus::Paid
                    && (previous.payment_status != PaymentStatus::Paid || previous.paid_at.is_none())
                {
                    active.paid_at = Set(Some(gateway_time.unwrap_or(now)));
                    active.payment_method = Set(payment_type.clone().or(previous.payment_method.clone()));
                }
                active.updated_at = Set(now);
                active.update(&txn).await?
            }
        };
        txn.commit().await?;

        let status_changed = previous.status != updated.status;
        let payment_changed = previous.payment_status != updated.payment_status;
        info!(
            %order_id,
            %transaction_status,
            payment_status = %updated.payment_status,
            status = %updated.status,
            "notification applied"
        );

        if payment_changed {
            self.emit(Event::PaymentStatusChanged {
                order_id,
                old_status: previous.payment_status,
                new_status: updated.payment_status,
            })
            .await;
        }
        if status_changed {
            self.emit(Event::OrderStatusChanged {
                order_id,
                old_status: previous.status,
                new_status: updated.status,
            })
            .await;
            if updated.status == OrderStatus::Cancelled {
                self.emit(Event::OrderCancelled {
                    order_id,
                    payment_status: updated.payment_status,
                })
                .await;
            }
        }

        Ok(NotificationOutcome::Applied(receipt(
            &updated,
            status_changed || payment_changed,
        )))
    }

    async fn record_race_replay(
        &self,
        order_id: Uuid,
        notification: &PaymentNotification,
        transaction_id: &str,
        amount: Decimal,
        payload: Value,
    ) -> Result<NotificationOutcome, NotificationError> {
        let txn = self.db_pool.begin().await?;
        let order = find_order_for_update(&txn, order_id)
            .await?
            .ok_or_else(|| ServiceError::OrderNotFound(order_id.to_string()))?;
        let entry = LogEntry {
            status: order.payment_status.to_string(),
            amount,
            payment_method: notification.payment_type.clone(),
            transaction_id: transaction_id.to_string(),
            idempotency_key: None,
            is_replay: true,
            payment_time: None,
        };
        insert_log(&txn, order.id, entry, payload).await?;
        txn.commit().await?;

        Ok(NotificationOutcome::Replayed(NotificationReceipt {
            order_id: order.id,
            external_order_id: notification.order_id.clone(),
            transaction_status: notification.transaction_status.to_ascii_lowercase(),
            status: order.status,
            payment_status: order.payment_status,
            changed: false,
        }))
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(event).await;
        }
    }
}

async fn insert_log(
    txn: &DatabaseTransaction,
    order_id: Uuid,
    entry: LogEntry,
    payload: Value,
) -> Result<(), DbErr> {
    payment_log::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        payment_method: Set(entry.payment_method),
        amount: Set(entry.amount),
        status: Set(entry.status),
        transaction_id: Set(Some(entry.transaction_id)),
        idempotency_key: Set(entry.idempotency_key),
        is_replay: Set(entry.is_replay),
        payment_time: Set(entry.payment_time),
        payload: Set(payload),
        created_at: Set(Utc::now()),
    }
    .insert(txn)
    .await?;
    Ok(())
}

fn first_non_empty(candidates: &[Option<&str>]) -> Option<String> {
    candidates
        .iter()
        .flatten()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
        .map(str::to_string)
}
