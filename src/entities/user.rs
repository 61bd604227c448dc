use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Customer or staff account. Credentials live with the auth service; this
/// table only carries the contact details checkout needs.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub full_name: String,
    #[sea_orm(unique)]
    pub email: String,
    #[sea_orm(nullable)]
    pub phone: Option<String>,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_one = "super::cart::Entity")]
    Cart,
    #[sea_orm(has_many = "super::order::Entity")]
    Orders,
}

impl Related<super::cart::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Cart.def()
    }
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Orders.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Splits the display name into the first/last pair payment forms expect.
    pub fn name_parts(&self) -> (String, String) {
        let mut parts = self.full_name.split_whitespace();
        let first = parts.next().unwrap_or("Customer").to_string();
        let last = parts.collect::<Vec<_>>().join(" ");
        (first, last)
    }

    pub fn has_phone(&self) -> bool {
        self.phone
            .as_deref()
            .map(|p| !p.trim().is_empty())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str, phone: Option<&str>) -> Model {
        Model {
            id: Uuid::new_v4(),
            full_name: name.to_string(),
            email: "buyer@example.com".into(),
            phone: phone.map(str::to_string),
            role: "user".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn name_parts_keeps_multi_word_last_names() {
        let (first, last) = user("Siti Nur Aisyah", None).name_parts();
        assert_eq!(first, "Siti");
        assert_eq!(last, "Nur Aisyah");

        let (first, last) = user("   ", None).name_parts();
        assert_eq!(first, "Customer");
        assert!(last.is_empty());
    }

    #[test]
    fn blank_phone_counts_as_missing() {
        assert!(!user("A", Some("  ")).has_phone());
        assert!(user("A", Some("081234567890")).has_phone());
    }
}
