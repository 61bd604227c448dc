use chrono::Utc;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, EntityTrait, Set};
use sea_orm_migration::MigratorTrait;
use storefront_api::{db, entities::product, migrator::Migrator};
use uuid::Uuid;

#[tokio::test]
async fn migrations_apply_on_sqlite_and_are_rerunnable() {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).min_connections(1);
    let pool = Database::connect(options)
        .await
        .expect("connect to in-memory sqlite");

    db::run_migrations(&pool).await.expect("first migration run");
    db::run_migrations(&pool).await.expect("second migration run is a no-op");

    let applied = Migrator::get_applied_migrations(&pool)
        .await
        .expect("read migration table");
    assert_eq!(applied.len(), Migrator::migrations().len());

    let now = Utc::now();
    let id = Uuid::new_v4();
    product::ActiveModel {
        id: Set(id),
        name: Set("Kopi Toraja 200g".to_string()),
        description: Set(None),
        price: Set(dec!(87500.50)),
        weight: Set(200),
        stock: Set(3),
        image_url: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&pool)
    .await
    .expect("insert into migrated products table");

    let stored = product::Entity::find_by_id(id)
        .one(&pool)
        .await
        .expect("query product")
        .expect("product exists");
    assert_eq!(stored.price, dec!(87500.50));
}
