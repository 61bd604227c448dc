use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::AuthUser,
    db::DbPool,
    entities::{order, order_item, payment_log, OrderStatus, PaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        inventory::InventoryLedger,
        locks::KeyedLocks,
        order_status::plan_transition,
        payments::{PaymentGateway, TransactionStatus},
        tracking::{ShipmentTracker, TrackingInfo},
    },
};

pub const DEFAULT_PAGE_SIZE: u64 = 10;
pub const MAX_PAGE_SIZE: u64 = 100;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
    #[validate(length(max = 30))]
    pub tracking_number: Option<String>,
    #[validate(length(max = 100))]
    pub carrier_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminOrderFilter {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub user_id: Option<Uuid>,
    /// Inclusive lower bound on `created_at`
    pub start_date: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`
    pub end_date: Option<DateTime<Utc>>,
    pub page: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItemView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub price: Decimal,
    pub weight: i32,
    pub line_total: Decimal,
}

impl From<order_item::Model> for OrderItemView {
    fn from(item: order_item::Model) -> Self {
        Self {
            line_total: item.line_total(),
            id: item.id,
            product_id: item.product_id,
            product_name: item.product_name,
            quantity: item.quantity,
            price: item.price,
            weight: item.weight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentLogSummary {
    pub status: String,
    pub payment_method: Option<String>,
    pub amount: Decimal,
    pub transaction_id: Option<String>,
    pub payment_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<payment_log::Model> for PaymentLogSummary {
    fn from(log: payment_log::Model) -> Self {
        Self {
            status: log.status,
            payment_method: log.payment_method,
            amount: log.amount,
            transaction_id: log.transaction_id,
            payment_time: log.payment_time,
            created_at: log.created_at,
        }
    }
}

/// Client-facing order. The hosted-payment token is never part of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub total_amount: Decimal,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub shipping_address: String,
    pub shipping_province: String,
    pub shipping_city: String,
    pub shipping_district: String,
    pub shipping_subdistrict: String,
    pub shipping_post_code: String,
    pub shipping_cost: Decimal,
    pub carrier_name: String,
    pub service_name: String,
    pub estimated_delivery: Option<String>,
    pub payment_method: Option<String>,
    pub payment_url: Option<String>,
    pub external_payment_order_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub tracking_number: Option<String>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub item_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<OrderItemView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_payment: Option<PaymentLogSummary>,
}

impl OrderView {
    pub fn new(model: order::Model, items: Vec<order_item::Model>) -> Self {
        let mut view = Self::from(model);
        view.item_count = items.len();
        view.items = items.into_iter().map(OrderItemView::from).collect();
        view
    }
}

impl From<order::Model> for OrderView {
    fn from(model: order::Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            status: model.status,
            payment_status: model.payment_status,
            total_amount: model.total_amount,
            customer_name: model.customer_name,
            customer_email: model.customer_email,
            customer_phone: model.customer_phone,
            shipping_address: model.shipping_address,
            shipping_province: model.shipping_province,
            shipping_city: model.shipping_city,
            shipping_district: model.shipping_district,
            shipping_subdistrict: model.shipping_subdistrict,
            shipping_post_code: model.shipping_post_code,
            shipping_cost: model.shipping_cost,
            carrier_name: model.carrier_name,
            service_name: model.service_name,
            estimated_delivery: model.estimated_delivery,
            payment_method: model.payment_method,
            payment_url: model.payment_url,
            external_payment_order_id: model.external_payment_order_id,
            paid_at: model.paid_at,
            tracking_number: model.tracking_number,
            shipped_at: model.shipped_at,
            completed_at: model.completed_at,
            cancelled_at: model.cancelled_at,
            notes: model.notes,
            created_at: model.created_at,
            updated_at: model.updated_at,
            item_count: 0,
            items: Vec::new(),
            latest_payment: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderListResponse {
    pub orders: Vec<OrderView>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

/// Local payment status next to the gateway's own view of the transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentStatusView {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub gateway: Option<TransactionStatus>,
}

/// Carrier tracking for one of the caller's shipped orders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderTrackingView {
    pub order_id: Uuid,
    pub order_status: OrderStatus,
    pub tracking_number: String,
    pub courier: String,
    pub tracking: TrackingInfo,
}

/// Who asked for a cancellation; recorded in the payment log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelActor {
    Admin,
    Customer,
}

impl CancelActor {
    fn as_str(self) -> &'static str {
        match self {
            CancelActor::Admin => "admin",
            CancelActor::Customer => "customer",
        }
    }
}

/// Locks the order row for the rest of the transaction. SQLite has no row
/// locks; the in-process [`KeyedLocks`] held by callers covers it there.
pub(crate) async fn find_order_for_update(
    txn: &DatabaseTransaction,
    order_id: Uuid,
) -> Result<Option<order::Model>, ServiceError> {
    Ok(order::Entity::find_by_id(order_id)
        .lock_exclusive()
        .one(txn)
        .await?)
}

/// Restores stock and marks the order cancelled with `payment_status`.
/// Callers hold the order lock and have checked the order is not cancelled yet.
pub(crate) async fn apply_cancellation(
    txn: &DatabaseTransaction,
    inventory: &InventoryLedger,
    order: order::Model,
    payment_status: PaymentStatus,
) -> Result<order::Model, ServiceError> {
    inventory.restore_order_items(txn, order.id).await?;

    let now = Utc::now();
    let mut active: order::ActiveModel = order.into();
    active.status = Set(OrderStatus::Cancelled);
    active.payment_status = Set(payment_status);
    active.cancelled_at = Set(Some(now));
    active.updated_at = Set(now);
    Ok(active.update(txn).await?)
}

async fn append_manual_cancel_log(
    txn: &DatabaseTransaction,
    previous: &order::Model,
    payment_status: PaymentStatus,
    actor: CancelActor,
) -> Result<(), ServiceError> {
    let now = Utc::now();
    payment_log::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(previous.id),
        payment_method: Set(previous.payment_method.clone()),
        amount: Set(previous.total_amount),
        status: Set(payment_status.to_string()),
        transaction_id: Set(Some(format!("cancel_{}", previous.id))),
        idempotency_key: Set(None),
        is_replay: Set(false),
        payment_time: Set(Some(now)),
        payload: Set(json!({
            "action": "manual_cancel",
            "actor": actor.as_str(),
            "previous_status": previous.status,
            "previous_payment_status": previous.payment_status,
        })),
        created_at: Set(now),
    }
    .insert(txn)
    .await?;
    Ok(())
}

/// Normalizes `page`/`limit`. The row offset must stay representable as a
/// signed 64-bit SQL OFFSET.
fn page_params(page: u64, limit: u64) -> Result<(u64, u64), ServiceError> {
    let limit = if limit == 0 { DEFAULT_PAGE_SIZE } else { limit.min(MAX_PAGE_SIZE) };
    let page = page.max(1);
    match (page - 1).checked_mul(limit) {
        Some(offset) if offset <= i64::MAX as u64 => Ok((page, limit)),
        _ => Err(ServiceError::ValidationError(format!(
            "page {} is out of range",
            page
        ))),
    }
}

/// Order queries, fulfillment transitions, cancellation and deletion.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    gateway: Arc<dyn PaymentGateway>,
    tracker: Arc<dyn ShipmentTracker>,
    locks: KeyedLocks,
    inventory: InventoryLedger,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    pub fn new(
        db_pool: Arc<DbPool>,
        gateway: Arc<dyn PaymentGateway>,
        tracker: Arc<dyn ShipmentTracker>,
        locks: KeyedLocks,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db_pool,
            gateway,
            tracker,
            locks,
            inventory: InventoryLedger::new(),
            event_sender,
        }
    }

    /// The caller's orders, newest first.
    #[instrument(skip(self))]
    pub async fn list_user_orders(
        &self,
        user_id: Uuid,
        page: u64,
        limit: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let query = order::Entity::find().filter(order::Column::UserId.eq(user_id));
        self.paginate(query, page, limit).await
    }

    #[instrument(skip(self, filter), fields(page = filter.page, limit = filter.limit))]
    pub async fn list_orders_admin(
        &self,
        filter: AdminOrderFilter,
    ) -> Result<OrderListResponse, ServiceError> {
        let mut query = order::Entity::find();
        if let Some(status) = filter.status {
            query = query.filter(order::Column::Status.eq(status));
        }
        if let Some(payment_status) = filter.payment_status {
            query = query.filter(order::Column::PaymentStatus.eq(payment_status));
        }
        if let Some(user_id) = filter.user_id {
            query = query.filter(order::Column::UserId.eq(user_id));
        }
        if let (Some(start), Some(end)) = (filter.start_date, filter.end_date) {
            if start > end {
                return Err(ServiceError::ValidationError(
                    "start_date must not be after end_date".to_string(),
                ));
            }
        }
        if let Some(start) = filter.start_date {
            query = query.filter(order::Column::CreatedAt.gte(start));
        }
        if let Some(end) = filter.end_date {
            query = query.filter(order::Column::CreatedAt.lte(end));
        }
        self.paginate(query, filter.page, filter.limit).await
    }

    async fn paginate(
        &self,
        query: sea_orm::Select<order::Entity>,
        page: u64,
        limit: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let db = &*self.db_pool;
        let (page, limit) = page_params(page, limit)?;

        let paginator = query
            .order_by_desc(order::Column::CreatedAt)
            .paginate(db, limit);
        let counts = paginator.num_items_and_pages().await.map_err(|e| {
            error!(error = %e, "Failed to count orders");
            ServiceError::DatabaseError(e)
        })?;
        let orders = paginator.fetch_page(page - 1).await?;

        let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let mut item_counts: HashMap<Uuid, usize> = HashMap::new();
        if !ids.is_empty() {
            let items = order_item::Entity::find()
                .filter(order_item::Column::OrderId.is_in(ids))
                .all(db)
                .await?;
            for item in items {
                *item_counts.entry(item.order_id).or_default() += 1;
            }
        }

        let orders = orders
            .into_iter()
            .map(|model| {
                let count = item_counts.get(&model.id).copied().unwrap_or(0);
                let mut view = OrderView::from(model);
                view.item_count = count;
                view
            })
            .collect();

        Ok(OrderListResponse {
            orders,
            total: counts.number_of_items,
            page,
            limit,
            total_pages: counts.number_of_pages,
        })
    }

    /// One order with its items and latest payment log. Owners and admins only.
    #[instrument(skip(self, caller), fields(user_id = %caller.user_id))]
    pub async fn get_user_order(
        &self,
        caller: &AuthUser,
        order_id: Uuid,
    ) -> Result<OrderView, ServiceError> {
        let db = &*self.db_pool;
        let order = self.find_visible(caller, order_id).await?;

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(db)
            .await?;
        let latest_payment = payment_log::Entity::find()
            .filter(payment_log::Column::OrderId.eq(order.id))
            .order_by_desc(payment_log::Column::CreatedAt)
            .one(db)
            .await?;

        let mut view = OrderView::new(order, items);
        view.latest_payment = latest_payment.map(PaymentLogSummary::from);
        Ok(view)
    }

    /// Asks the gateway for the live transaction state of an order.
    #[instrument(skip(self, caller), fields(user_id = %caller.user_id))]
    pub async fn payment_status(
        &self,
        caller: &AuthUser,
        order_id: Uuid,
    ) -> Result<PaymentStatusView, ServiceError> {
        let order = self.find_visible(caller, order_id).await?;

        let gateway = match order.external_payment_order_id.as_deref() {
            Some(reference) => Some(self.gateway.transaction_status(reference).await?),
            None => None,
        };

        Ok(PaymentStatusView {
            order_id: order.id,
            status: order.status,
            payment_status: order.payment_status,
            gateway,
        })
    }

    /// Live carrier tracking. Owner only, and only once the parcel has shipped.
    #[instrument(skip(self, caller), fields(user_id = %caller.user_id))]
    pub async fn track_order(
        &self,
        caller: &AuthUser,
        order_id: Uuid,
    ) -> Result<OrderTrackingView, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::OrderNotFound(order_id.to_string()))?;
        if order.user_id != caller.user_id {
            return Err(ServiceError::Forbidden(
                "You can only track your own orders".to_string(),
            ));
        }

        let tracking_number = order
            .tracking_number
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                ServiceError::ValidationError(
                    "This order does not have a tracking number".to_string(),
                )
            })?;
        if !order.status.is_trackable() {
            return Err(ServiceError::ValidationError(
                "Order has not been shipped yet".to_string(),
            ));
        }

        let tracking = self
            .tracker
            .track(&order.carrier_name, &tracking_number)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Tracking information not found".to_string()))?;

        Ok(OrderTrackingView {
            order_id: order.id,
            order_status: order.status,
            tracking_number,
            courier: order.carrier_name,
            tracking,
        })
    }

    async fn find_visible(
        &self,
        caller: &AuthUser,
        order_id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::OrderNotFound(order_id.to_string()))?;

        if order.user_id != caller.user_id && !caller.is_admin() {
            warn!(%order_id, user_id = %caller.user_id, "order access denied");
            return Err(ServiceError::Forbidden(
                "You do not have access to this order".to_string(),
            ));
        }
        Ok(order)
    }

    /// Staff transition along the fulfillment graph.
    #[instrument(skip(self, request), fields(order_id = %order_id, target = %request.status))]
    pub async fn update_order_admin(
        &self,
        order_id: Uuid,
        request: UpdateOrderStatusRequest,
    ) -> Result<OrderView, ServiceError> {
        request.validate()?;

        if request.status == OrderStatus::Cancelled {
            return self
                .cancel(order_id, CancelActor::Admin, |_| Ok(()))
                .await;
        }

        let _guard = self.locks.lock(order_id).await;
        let txn = self.db_pool.begin().await?;
        let order = find_order_for_update(&txn, order_id)
            .await?
            .ok_or_else(|| ServiceError::OrderNotFound(order_id.to_string()))?;

        let plan = plan_transition(
            &order,
            request.status,
            request.tracking_number.as_deref(),
            request.carrier_name.as_deref(),
        )?;

        let now = Utc::now();
        let mut active: order::ActiveModel = order.into();
        active.status = Set(plan.to);
        active.updated_at = Set(now);
        if plan.stamp_shipped {
            active.shipped_at = Set(Some(now));
            active.tracking_number = Set(plan.tracking_number.clone());
            if let Some(carrier) = &plan.carrier_name {
                active.carrier_name = Set(carrier.clone());
            }
        }
        if plan.stamp_completed {
            active.completed_at = Set(Some(now));
        }
        let updated = active.update(&txn).await?;
        txn.commit().await?;

        info!(%order_id, from = %plan.from, to = %plan.to, "order status updated");
        counter!("storefront.orders.transitions", 1, "to" => plan.to.to_string());
        self.emit(Event::OrderStatusChanged {
            order_id,
            old_status: plan.from,
            new_status: plan.to,
        })
        .await;

        self.load_view(updated).await
    }

    /// Owner cancellation, allowed until the order ships.
    #[instrument(skip(self, caller), fields(user_id = %caller.user_id))]
    pub async fn cancel_user_order(
        &self,
        caller: &AuthUser,
        order_id: Uuid,
    ) -> Result<OrderView, ServiceError> {
        let user_id = caller.user_id;
        self.cancel(order_id, CancelActor::Customer, move |order| {
            if order.user_id != user_id {
                return Err(ServiceError::Forbidden(
                    "You can only cancel your own orders".to_string(),
                ));
            }
            if !order.status.is_user_cancellable() {
                return Err(ServiceError::InvalidTransition {
                    from: order.status.to_string(),
                    to: OrderStatus::Cancelled.to_string(),
                });
            }
            Ok(())
        })
        .await
    }

    /// Owner confirms receipt of a shipped order.
    #[instrument(skip(self, caller), fields(user_id = %caller.user_id))]
    pub async fn complete_user_order(
        &self,
        caller: &AuthUser,
        order_id: Uuid,
    ) -> Result<OrderView, ServiceError> {
        let _guard = self.locks.lock(order_id).await;
        let txn = self.db_pool.begin().await?;
        let order = find_order_for_update(&txn, order_id)
            .await?
            .ok_or_else(|| ServiceError::OrderNotFound(order_id.to_string()))?;

        if order.user_id != caller.user_id {
            return Err(ServiceError::Forbidden(
                "You can only complete your own orders".to_string(),
            ));
        }
        let plan = plan_transition(&order, OrderStatus::Completed, None, None)?;

        let now = Utc::now();
        let mut active: order::ActiveModel = order.into();
        active.status = Set(OrderStatus::Completed);
        active.completed_at = Set(Some(now));
        active.updated_at = Set(now);
        let updated = active.update(&txn).await?;
        txn.commit().await?;

        info!(%order_id, "order completed by customer");
        counter!("storefront.orders.transitions", 1, "to" => OrderStatus::Completed.to_string());
        self.emit(Event::OrderStatusChanged {
            order_id,
            old_status: plan.from,
            new_status: plan.to,
        })
        .await;

        self.load_view(updated).await
    }

    /// Removes an order and its children. Stock held by a live order is
    /// returned first.
    #[instrument(skip(self))]
    pub async fn delete_order_admin(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let _guard = self.locks.lock(order_id).await;
        let txn = self.db_pool.begin().await?;
        let order = find_order_for_update(&txn, order_id)
            .await?
            .ok_or_else(|| ServiceError::OrderNotFound(order_id.to_string()))?;

        if order.status != OrderStatus::Cancelled {
            self.inventory.restore_order_items(&txn, order_id).await?;
        }

        payment_log::Entity::delete_many()
            .filter(payment_log::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await?;
        order_item::Entity::delete_many()
            .filter(order_item::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await?;
        order::Entity::delete_by_id(order_id).exec(&txn).await?;
        txn.commit().await?;

        info!(%order_id, previous_status = %order.status, "order deleted");
        self.emit(Event::OrderDeleted(order_id)).await;
        Ok(())
    }

    /// Shared cancellation path for staff and owners. `authorize` runs on the
    /// locked row before anything changes.
    async fn cancel<F>(
        &self,
        order_id: Uuid,
        actor: CancelActor,
        authorize: F,
    ) -> Result<OrderView, ServiceError>
    where
        F: FnOnce(&order::Model) -> Result<(), ServiceError>,
    {
        let _guard = self.locks.lock(order_id).await;
        let txn = self.db_pool.begin().await?;
        let order = find_order_for_update(&txn, order_id)
            .await?
            .ok_or_else(|| ServiceError::OrderNotFound(order_id.to_string()))?;

        authorize(&order)?;
        plan_transition(&order, OrderStatus::Cancelled, None, None)?;

        let previous = order.clone();
        let payment_status = previous.payment_status.after_manual_cancel();
        append_manual_cancel_log(&txn, &previous, payment_status, actor).await?;
        let updated = apply_cancellation(&txn, &self.inventory, order, payment_status).await?;
        txn.commit().await?;

        info!(
            %order_id,
            actor = actor.as_str(),
            from = %previous.status,
            payment_status = %payment_status,
            "order cancelled"
        );
        counter!("storefront.orders.cancelled", 1, "actor" => actor.as_str());

        self.emit(Event::OrderStatusChanged {
            order_id,
            old_status: previous.status,
            new_status: OrderStatus::Cancelled,
        })
        .await;
        if previous.payment_status != payment_status {
            self.emit(Event::PaymentStatusChanged {
                order_id,
                old_status: previous.payment_status,
                new_status: payment_status,
            })
            .await;
        }
        self.emit(Event::OrderCancelled {
            order_id,
            payment_status,
        })
        .await;

        self.cancel_at_gateway(&previous).await;
        self.load_view(updated).await
    }

    /// Best effort: the order is already cancelled locally.
    async fn cancel_at_gateway(&self, previous: &order::Model) {
        let awaiting_or_paid = matches!(
            previous.payment_status,
            PaymentStatus::Pending | PaymentStatus::Challenge | PaymentStatus::Paid
        );
        let Some(reference) = previous.external_payment_order_id.as_deref() else {
            return;
        };
        if !awaiting_or_paid {
            return;
        }
        if let Err(e) = self.gateway.cancel_transaction(reference).await {
            warn!(order_id = %previous.id, error = %e, "gateway cancellation failed");
        }
    }

    async fn load_view(&self, order: order::Model) -> Result<OrderView, ServiceError> {
        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(&*self.db_pool)
            .await?;
        Ok(OrderView::new(order, items))
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_params_clamp_to_sane_bounds() {
        assert_eq!(page_params(0, 0).unwrap(), (1, DEFAULT_PAGE_SIZE));
        assert_eq!(page_params(3, 500).unwrap(), (3, MAX_PAGE_SIZE));
        assert_eq!(page_params(2, 25).unwrap(), (2, 25));
    }

    #[test]
    fn page_params_reject_offsets_that_overflow() {
        assert!(matches!(
            page_params(u64::MAX, 10),
            Err(ServiceError::ValidationError(_))
        ));
        assert!(matches!(
            page_params(i64::MAX as u64, 2),
            Err(ServiceError::ValidationError(_))
        ));
        let last = (i64::MAX as u64) / MAX_PAGE_SIZE + 1;
        assert_eq!(page_params(last, MAX_PAGE_SIZE).unwrap(), (last, MAX_PAGE_SIZE));
    }
}
