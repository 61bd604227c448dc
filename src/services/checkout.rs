//! Converts a cart into a pending order with reserved stock and an open
//! payment session, atomically.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    config::AppConfig,
    db::DbPool,
    entities::{cart, cart_item, order, order_item, product, user, OrderStatus, PaymentStatus},
    errors::{ServiceError, StockShortage},
    events::{Event, EventSender},
    services::{
        inventory::InventoryLedger,
        locks::KeyedLocks,
        orders::OrderView,
        payments::{PaymentGateway, PaymentSessionRequest},
        shipping::{
            resolve_destination, select_quote, Destination, RateQuery, ShippingProviderError,
            ShippingRateProvider,
        },
    },
    tracing::record_slow_operation,
};

const SLOW_CHECKOUT_THRESHOLD: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CheckoutRequest {
    #[validate(length(min = 10, max = 255, message = "Address must be 10-255 characters"))]
    pub shipping_address: String,
    #[validate(length(min = 1, max = 100))]
    pub shipping_province: String,
    #[validate(length(min = 1, max = 100))]
    pub shipping_city: String,
    #[validate(length(min = 1, max = 100))]
    pub shipping_district: String,
    #[validate(length(min = 1, max = 100))]
    pub shipping_subdistrict: String,
    #[validate(custom = "validate_post_code")]
    pub shipping_post_code: String,
    #[validate(length(min = 1, max = 50, message = "Courier is required"))]
    pub courier: String,
    #[validate(length(min = 1, max = 50, message = "Shipping service is required"))]
    pub shipping_service: String,
    #[validate(length(max = 50))]
    pub payment_method: Option<String>,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
}

fn validate_post_code(code: &str) -> Result<(), ValidationError> {
    let code = code.trim();
    if code.len() == 5 && code.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("post_code");
        err.message = Some("Post code must be 5 digits".into());
        Err(err)
    }
}

/// Result of a successful checkout. The payment token is only ever returned here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutReceipt {
    pub order: OrderView,
    pub payment_token: String,
    pub payment_url: String,
}

/// A cart line joined with its current catalog row.
struct PricedLine {
    product: product::Model,
    quantity: i32,
}

#[derive(Clone)]
pub struct CheckoutService {
    db_pool: Arc<DbPool>,
    shipping: Arc<dyn ShippingRateProvider>,
    gateway: Arc<dyn PaymentGateway>,
    config: Arc<AppConfig>,
    user_locks: KeyedLocks,
    inventory: InventoryLedger,
    event_sender: Option<Arc<EventSender>>,
}

impl CheckoutService {
    pub fn new(
        db_pool: Arc<DbPool>,
        shipping: Arc<dyn ShippingRateProvider>,
        gateway: Arc<dyn PaymentGateway>,
        config: Arc<AppConfig>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db_pool,
            shipping,
            gateway,
            config,
            user_locks: KeyedLocks::new(),
            inventory: InventoryLedger::new(),
            event_sender,
        }
    }

    /// Runs the whole checkout within the configured time budget. Any failure,
    /// including the budget running out, leaves stock, cart and orders untouched.
    #[instrument(skip(self, request), fields(courier = %request.courier, service = %request.shipping_service))]
    pub async fn process_checkout(
        &self,
        user_id: Uuid,
        request: CheckoutRequest,
    ) -> Result<CheckoutReceipt, ServiceError> {
        request.validate()?;
        let customer = self.load_customer(user_id).await?;

        let started = Instant::now();
        let budget = self.config.checkout.transaction_timeout();
        let _guard = self.user_locks.lock(user_id).await;

        let receipt = match tokio::time::timeout(budget, self.run(&customer, &request)).await {
            Ok(result) => result?,
            Err(_) => {
                error!(%user_id, budget_secs = budget.as_secs(), "checkout exceeded its time budget");
                counter!("storefront.checkout.failed", 1, "reason" => "TIMEOUT");
                return Err(ServiceError::Timeout(
                    "Checkout took too long, please retry".to_string(),
                ));
            }
        };

        record_slow_operation("checkout", started.elapsed(), SLOW_CHECKOUT_THRESHOLD);
        counter!("storefront.checkout.completed", 1);
        info!(
            %user_id,
            order_id = %receipt.order.id,
            total = %receipt.order.total_amount,
            "checkout completed"
        );

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::OrderCreated {
                    order_id: receipt.order.id,
                    user_id,
                    total_amount: receipt.order.total_amount,
                })
                .await;
        }
        Ok(receipt)
    }

    async fn load_customer(&self, user_id: Uuid) -> Result<user::Model, ServiceError> {
        let customer = user::Entity::find_by_id(user_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::ProfileIncomplete("User profile not found".to_string()))?;
        if !customer.has_phone() {
            warn!(%user_id, "checkout blocked, no phone number on profile");
            return Err(ServiceError::ProfileIncomplete(
                "Add a phone number to your profile before checking out".to_string(),
            ));
        }
        Ok(customer)
    }

    async fn run(
        &self,
        customer: &user::Model,
        request: &CheckoutRequest,
    ) -> Result<CheckoutReceipt, ServiceError> {
        let txn = self.db_pool.begin().await?;

        let (cart_id, lines) = self.load_priced_lines(&txn, customer.id).await?;

        let subtotal: Decimal = lines
            .iter()
            .map(|l| l.product.price * Decimal::from(l.quantity))
            .sum();
        let total_weight: i64 = lines
            .iter()
            .map(|l| i64::from(l.product.weight) * i64::from(l.quantity))
            .sum();

        let shortages: Vec<StockShortage> = lines
            .iter()
            .filter(|l| l.quantity > l.product.stock)
            .map(|l| StockShortage {
                product_id: l.product.id,
                product_name: l.product.name.clone(),
                requested: l.quantity,
                available: l.product.stock,
            })
            .collect();
        if !shortages.is_empty() {
            warn!(user_id = %customer.id, items = shortages.len(), "checkout rejected, insufficient stock");
            return Err(ServiceError::InsufficientStock(shortages));
        }

        let destination = self.resolve_destination(request).await?;
        let query = RateQuery {
            origin: self.config.shipping.warehouse_destination_id.clone(),
            destination: destination.id.clone(),
            weight_grams: total_weight,
            declared_value: subtotal,
            courier: Some(request.courier.trim().to_lowercase()),
        };
        let quotes = self.shipping.calculate_shipping_cost(&query).await?;
        let quote = select_quote(&quotes, &request.courier, &request.shipping_service)?;

        for line in &lines {
            self.inventory
                .decrement(&txn, line.product.id, line.quantity)
                .await?;
        }

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let order = order::ActiveModel {
            id: Set(order_id),
            user_id: Set(customer.id),
            status: Set(OrderStatus::Pending),
            payment_status: Set(PaymentStatus::Pending),
            total_amount: Set(subtotal + quote.price),
            customer_name: Set(customer.full_name.trim().to_string()),
            customer_email: Set(customer.email.clone()),
            customer_phone: Set(customer.phone.clone()),
            shipping_address: Set(request.shipping_address.trim().to_string()),
            shipping_province: Set(request.shipping_province.trim().to_string()),
            shipping_city: Set(request.shipping_city.trim().to_string()),
            shipping_district: Set(request.shipping_district.trim().to_string()),
            shipping_subdistrict: Set(request.shipping_subdistrict.trim().to_string()),
            shipping_post_code: Set(request.shipping_post_code.trim().to_string()),
            shipping_destination_id: Set(destination.id.clone()),
            shipping_cost: Set(quote.price),
            carrier_name: Set(quote.carrier_name.clone()),
            service_name: Set(quote.service_name.clone()),
            estimated_delivery: Set(quote.estimated_days.clone()),
            payment_method: Set(request.payment_method.clone()),
            payment_token: Set(None),
            payment_url: Set(None),
            external_payment_order_id: Set(None),
            paid_at: Set(None),
            tracking_number: Set(None),
            shipped_at: Set(None),
            completed_at: Set(None),
            cancelled_at: Set(None),
            notes: Set(request.notes.clone().filter(|n| !n.trim().is_empty())),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut items = Vec::with_capacity(lines.len());
        for line in &lines {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product.id),
                product_name: Set(line.product.name.clone()),
                quantity: Set(line.quantity),
                price: Set(line.product.price),
                weight: Set(line.product.weight),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
            items.push(item);
        }

        cart_item::Entity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .exec(&txn)
            .await?;

        let session_request =
            PaymentSessionRequest::for_order(&order, &items, &self.config.payment);
        let session = match self.gateway.create_transaction(&session_request).await {
            Ok(session) => session,
            Err(err) => {
                error!(%order_id, error = %err, "payment session creation failed, rolling back checkout");
                counter!("storefront.checkout.failed", 1, "reason" => "PAYMENT_SESSION_FAILED");
                return Err(ServiceError::PaymentSessionFailed(err.to_string()));
            }
        };

        let mut active: order::ActiveModel = order.into();
        active.payment_token = Set(Some(session.token.clone()));
        active.payment_url = Set(Some(session.redirect_url.clone()));
        active.external_payment_order_id = Set(Some(session_request.order_ref.clone()));
        active.updated_at = Set(Utc::now());
        let order = active.update(&txn).await?;

        txn.commit().await?;

        Ok(CheckoutReceipt {
            order: OrderView::new(order, items),
            payment_token: session.token,
            payment_url: session.redirect_url,
        })
    }

    /// Locks the cart and joins its lines with the catalog. Fails on an empty
    /// cart or on lines whose product no longer exists.
    async fn load_priced_lines(
        &self,
        txn: &DatabaseTransaction,
        user_id: Uuid,
    ) -> Result<(Uuid, Vec<PricedLine>), ServiceError> {
        let cart = cart::Entity::find()
            .filter(cart::Column::UserId.eq(user_id))
            .lock_exclusive()
            .one(txn)
            .await?
            .ok_or(ServiceError::EmptyCart)?;

        let lines = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(txn)
            .await?;
        if lines.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();
        let mut products: HashMap<Uuid, product::Model> = product::Entity::find()
            .filter(product::Column::Id.is_in(ids))
            .all(txn)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let missing: Vec<Uuid> = lines
            .iter()
            .map(|l| l.product_id)
            .filter(|id| !products.contains_key(id))
            .collect();
        if !missing.is_empty() {
            return Err(ServiceError::ProductNotFound(missing));
        }

        let priced = lines
            .into_iter()
            .filter_map(|line| {
                products.remove(&line.product_id).map(|product| PricedLine {
                    product,
                    quantity: line.quantity,
                })
            })
            .collect();
        Ok((cart.id, priced))
    }

    async fn resolve_destination(
        &self,
        request: &CheckoutRequest,
    ) -> Result<Destination, ServiceError> {
        let candidates = match self
            .shipping
            .search_destinations(&request.shipping_subdistrict)
            .await
        {
            Ok(candidates) => candidates,
            Err(ShippingProviderError::InvalidRequest(msg)) => {
                return Err(ServiceError::AddressResolutionFailed(msg))
            }
            Err(ShippingProviderError::Upstream { status: 404, .. }) => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        resolve_destination(
            &candidates,
            &request.shipping_subdistrict,
            &request.shipping_district,
            &request.shipping_city,
        )
    }
}
