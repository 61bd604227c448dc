use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Append-only payment audit trail. One row per processed gateway
/// notification or manual payment action; never updated.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    #[sea_orm(nullable)]
    pub payment_method: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub amount: Decimal,
    /// Internal payment status after processing, or `REJECTED`
    pub status: String,
    #[sea_orm(nullable)]
    pub transaction_id: Option<String>,
    /// Dedup key for processed notifications; unique when present
    #[sea_orm(unique, nullable)]
    pub idempotency_key: Option<String>,
    pub is_replay: bool,
    #[sea_orm(nullable)]
    pub payment_time: Option<DateTime<Utc>>,
    #[sea_orm(column_type = "Json")]
    pub payload: Json,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id",
        on_delete = "Cascade"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Status recorded for notifications that were authenticated but refused.
pub const REJECTED_STATUS: &str = "REJECTED";
