use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter,
};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::{order_item, product},
    errors::{ServiceError, StockShortage},
};

/// Moves product stock. Every operation runs inside the caller's transaction
/// so a stock change commits or rolls back together with the order it belongs to.
#[derive(Clone, Copy, Debug, Default)]
pub struct InventoryLedger;

impl InventoryLedger {
    pub fn new() -> Self {
        Self
    }

    /// Removes `quantity` units with a single guarded update. Stock never goes
    /// negative: when the guard rejects the update the current level is
    /// re-read and reported.
    #[instrument(skip(self, txn))]
    pub async fn decrement(
        &self,
        txn: &DatabaseTransaction,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        ensure_positive(quantity)?;

        let result = product::Entity::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).sub(quantity),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::Stock.gte(quantity))
            .exec(txn)
            .await?;

        if result.rows_affected == 0 {
            return match product::Entity::find_by_id(product_id).one(txn).await? {
                None => Err(ServiceError::ProductNotFound(vec![product_id])),
                Some(p) => Err(ServiceError::InsufficientStock(vec![StockShortage {
                    product_id,
                    product_name: p.name,
                    requested: quantity,
                    available: p.stock,
                }])),
            };
        }

        debug!("stock decremented");
        Ok(())
    }

    /// Returns `quantity` units to stock. Returns `false` when the product row
    /// no longer exists.
    #[instrument(skip(self, txn))]
    pub async fn increment(
        &self,
        txn: &DatabaseTransaction,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<bool, ServiceError> {
        ensure_positive(quantity)?;

        let result = product::Entity::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).add(quantity),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(product_id))
            .exec(txn)
            .await?;

        if result.rows_affected == 0 {
            warn!(%product_id, quantity, "product missing, stock not restored");
            return Ok(false);
        }
        Ok(true)
    }

    /// Puts back the stock of every item snapshot of an order.
    #[instrument(skip(self, txn))]
    pub async fn restore_order_items(
        &self,
        txn: &DatabaseTransaction,
        order_id: Uuid,
    ) -> Result<usize, ServiceError> {
        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(txn)
            .await?;

        let mut restored = 0;
        for item in &items {
            if self.increment(txn, item.product_id, item.quantity).await? {
                restored += 1;
            }
        }

        debug!(restored, total = items.len(), "order stock restored");
        Ok(restored)
    }
}

fn ensure_positive(quantity: i32) -> Result<(), ServiceError> {
    if quantity <= 0 {
        return Err(ServiceError::ValidationError(format!(
            "Quantity must be positive, got {}",
            quantity
        )));
    }
    Ok(())
}
