mod common;

use assert_matches::assert_matches;
use common::TestApp;
use sea_orm::TransactionTrait;
use storefront_api::{errors::ServiceError, services::inventory::InventoryLedger};
use uuid::Uuid;

#[tokio::test]
async fn guarded_decrement_never_goes_negative() {
    let app = TestApp::new().await;
    let product = app.seed_product("Kopi Gayo 250g", 50000, 500, 5).await;
    let ledger = InventoryLedger::new();

    let txn = app.state.db.begin().await.unwrap();
    ledger.decrement(&txn, product.id, 3).await.unwrap();
    let err = ledger.decrement(&txn, product.id, 3).await.unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(ref items) if items[0].available == 2 && items[0].requested == 3);
    ledger.decrement(&txn, product.id, 2).await.unwrap();
    txn.commit().await.unwrap();

    assert_eq!(app.stock_of(product.id).await, 0);
}

#[tokio::test]
async fn rolled_back_decrement_leaves_stock_untouched() {
    let app = TestApp::new().await;
    let product = app.seed_product("Teh Tarik", 20000, 200, 4).await;
    let ledger = InventoryLedger::new();

    let txn = app.state.db.begin().await.unwrap();
    ledger.decrement(&txn, product.id, 4).await.unwrap();
    txn.rollback().await.unwrap();

    assert_eq!(app.stock_of(product.id).await, 4);
}

#[tokio::test]
async fn increment_restores_and_reports_missing_products() {
    let app = TestApp::new().await;
    let product = app.seed_product("Gula Aren", 15000, 300, 1).await;
    let ledger = InventoryLedger::new();

    let txn = app.state.db.begin().await.unwrap();
    assert!(ledger.increment(&txn, product.id, 4).await.unwrap());
    assert!(!ledger.increment(&txn, Uuid::new_v4(), 1).await.unwrap());
    assert_matches!(
        ledger.increment(&txn, product.id, 0).await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        ledger.decrement(&txn, Uuid::new_v4(), 1).await,
        Err(ServiceError::ProductNotFound(_))
    );
    txn.commit().await.unwrap();

    assert_eq!(app.stock_of(product.id).await, 5);
}

#[tokio::test]
async fn sequential_reservations_drain_stock_exactly() {
    let app = TestApp::new().await;
    let product = app.seed_product("Edisi Terbatas", 75000, 400, 3).await;
    let ledger = InventoryLedger::new();

    let mut accepted = 0;
    for _ in 0..5 {
        let txn = app.state.db.begin().await.unwrap();
        match ledger.decrement(&txn, product.id, 1).await {
            Ok(()) => {
                txn.commit().await.unwrap();
                accepted += 1;
            }
            Err(err) => {
                assert_matches!(err, ServiceError::InsufficientStock(_));
                txn.rollback().await.unwrap();
            }
        }
    }

    assert_eq!(accepted, 3);
    assert_eq!(app.stock_of(product.id).await, 0);
}
