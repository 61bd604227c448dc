use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::{cart, cart_item, product},
    errors::{ServiceError, StockShortage},
    events::{Event, EventSender},
};

pub const MAX_LINE_QUANTITY: i32 = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AddCartItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 1000, message = "Quantity must be between 1 and 1000"))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdateCartItemRequest {
    #[validate(range(min = 1, max = 1000, message = "Quantity must be between 1 and 1000"))]
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItemView {
    pub product_id: Uuid,
    pub name: String,
    pub price: Decimal,
    /// Unit weight in grams
    pub weight: i32,
    pub stock: i32,
    pub image_url: Option<String>,
    pub quantity: i32,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartView {
    pub cart_id: Uuid,
    pub items: Vec<CartItemView>,
    pub subtotal: Decimal,
    pub total_items: i32,
    /// Total weight in grams
    pub total_weight: i64,
}

/// Per-user shopping cart. Prices and stock are always read from the catalog,
/// never cached on the cart lines.
#[derive(Clone)]
pub struct CartService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl CartService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    #[instrument(skip(self))]
    pub async fn get_cart(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let db = &*self.db_pool;
        let cart = get_or_create_cart(db, user_id).await?;
        build_view(db, cart.id).await
    }

    /// Adds to the line for `product_id`, creating it when absent.
    #[instrument(skip(self, request), fields(product_id = %request.product_id, quantity = request.quantity))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        request: AddCartItemRequest,
    ) -> Result<CartView, ServiceError> {
        request.validate()?;

        let cart = get_or_create_cart(&*self.db_pool, user_id).await?;

        let txn = self.db_pool.begin().await?;
        let product = product::Entity::find_by_id(request.product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::ProductNotFound(vec![request.product_id]))?;

        let existing = find_line(&txn, cart.id, product.id).await?;
        let current = existing.as_ref().map(|line| line.quantity).unwrap_or(0);
        let wanted = current + request.quantity;

        if wanted > MAX_LINE_QUANTITY {
            return Err(ServiceError::ValidationError(format!(
                "Quantity per product cannot exceed {}",
                MAX_LINE_QUANTITY
            )));
        }
        ensure_stock(&product, wanted)?;

        let now = Utc::now();
        match existing {
            Some(line) => {
                let mut active: cart_item::ActiveModel = line.into();
                active.quantity = Set(wanted);
                active.updated_at = Set(now);
                active.update(&txn).await?;
            }
            None => {
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(product.id),
                    quantity: Set(wanted),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?;
            }
        }
        touch_cart(&txn, cart).await?;
        txn.commit().await?;

        info!(%user_id, "cart item added");
        self.get_cart(user_id).await
    }

    /// Sets the quantity of an existing line.
    #[instrument(skip(self, request), fields(quantity = request.quantity))]
    pub async fn update_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        request: UpdateCartItemRequest,
    ) -> Result<CartView, ServiceError> {
        request.validate()?;

        let txn = self.db_pool.begin().await?;
        let cart = find_cart(&txn, user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart item not found".to_string()))?;
        let line = find_line(&txn, cart.id, product_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart item not found".to_string()))?;
        let product = product::Entity::find_by_id(product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::ProductNotFound(vec![product_id]))?;

        ensure_stock(&product, request.quantity)?;

        let mut active: cart_item::ActiveModel = line.into();
        active.quantity = Set(request.quantity);
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;
        touch_cart(&txn, cart).await?;
        txn.commit().await?;

        self.get_cart(user_id).await
    }

    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        let db = &*self.db_pool;
        let cart = find_cart(db, user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart item not found".to_string()))?;

        let result = cart_item::Entity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .exec(db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound("Cart item not found".to_string()));
        }

        build_view(db, cart.id).await
    }

    #[instrument(skip(self))]
    pub async fn clear_cart(&self, user_id: Uuid) -> Result<(), ServiceError> {
        let db = &*self.db_pool;
        let cart = find_cart(db, user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart not found".to_string()))?;

        let result = cart_item::Entity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(db)
            .await?;
        info!(%user_id, removed = result.rows_affected, "cart cleared");

        if let Some(sender) = &self.event_sender {
            sender.send_or_log(Event::CartCleared { user_id }).await;
        }
        Ok(())
    }
}

fn ensure_stock(product: &product::Model, wanted: i32) -> Result<(), ServiceError> {
    if wanted > product.stock {
        return Err(ServiceError::InsufficientStock(vec![StockShortage {
            product_id: product.id,
            product_name: product.name.clone(),
            requested: wanted,
            available: product.stock,
        }]));
    }
    Ok(())
}

pub(crate) async fn find_cart<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<Option<cart::Model>, ServiceError> {
    Ok(cart::Entity::find()
        .filter(cart::Column::UserId.eq(user_id))
        .one(conn)
        .await?)
}

async fn get_or_create_cart<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<cart::Model, ServiceError> {
    if let Some(cart) = find_cart(conn, user_id).await? {
        return Ok(cart);
    }

    let now = Utc::now();
    let created = cart::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await;

    match created {
        Ok(cart) => Ok(cart),
        // Lost a race against a concurrent first request for the same user.
        Err(err) => find_cart(conn, user_id)
            .await?
            .ok_or(ServiceError::DatabaseError(err)),
    }
}

async fn find_line<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
    product_id: Uuid,
) -> Result<Option<cart_item::Model>, ServiceError> {
    Ok(cart_item::Entity::find()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .filter(cart_item::Column::ProductId.eq(product_id))
        .one(conn)
        .await?)
}

async fn touch_cart<C: ConnectionTrait>(conn: &C, cart: cart::Model) -> Result<(), ServiceError> {
    let mut active: cart::ActiveModel = cart.into();
    active.updated_at = Set(Utc::now());
    active.update(conn).await?;
    Ok(())
}

async fn build_view<C: ConnectionTrait>(conn: &C, cart_id: Uuid) -> Result<CartView, ServiceError> {
    let rows = cart_item::Entity::find()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .order_by_asc(cart_item::Column::CreatedAt)
        .find_also_related(product::Entity)
        .all(conn)
        .await?;

    let mut view = CartView {
        cart_id,
        items: Vec::with_capacity(rows.len()),
        subtotal: Decimal::ZERO,
        total_items: 0,
        total_weight: 0,
    };

    for (line, product) in rows {
        let Some(product) = product else {
            warn!(product_id = %line.product_id, "cart line references a missing product");
            continue;
        };
        let line_total = product.price * Decimal::from(line.quantity);
        view.subtotal += line_total;
        view.total_items += line.quantity;
        view.total_weight += i64::from(product.weight) * i64::from(line.quantity);
        view.items.push(CartItemView {
            product_id: product.id,
            name: product.name,
            price: product.price,
            weight: product.weight,
            stock: product.stock,
            image_url: product.image_url,
            quantity: line.quantity,
            line_total,
        });
    }

    Ok(view)
}
