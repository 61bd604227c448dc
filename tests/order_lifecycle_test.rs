//! Fulfillment lifecycle over HTTP: staff transitions, owner cancel and
//! complete, deletion and access control.

mod common;

use axum::http::Method;
use chrono::{TimeZone, Utc};
use common::{response_json, TestApp};
use sea_orm::{ActiveModelTrait, Set};
use serde_json::json;
use storefront_api::entities::{order, OrderStatus, PaymentStatus};
use uuid::Uuid;

const TOTAL: &str = "115000.00";

async fn admin_patch(
    app: &TestApp,
    order_id: Uuid,
    body: serde_json::Value,
) -> axum::response::Response {
    app.request(
        Method::PATCH,
        &format!("/api/v1/admin/orders/{}", order_id),
        Some(&app.admin_token()),
        Some(body),
    )
    .await
}

async fn admin_list(app: &TestApp, query: &str) -> (u16, serde_json::Value) {
    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/admin/orders?{}", query),
            Some(&app.admin_token()),
            None,
        )
        .await;
    (response.status().as_u16(), response_json(response).await)
}

/// Checks out 2 units and settles the payment so the order sits in PACKAGED.
async fn packaged_order(app: &TestApp) -> (String, Uuid, Uuid) {
    let (token, product, order_id) = app.checked_out_order(50000, 10, 2).await;
    let body = app.gateway_reports(order_id, "settlement", None, TOTAL);
    assert_eq!(app.notify(&body).await.status(), 200);
    (token, product.id, order_id)
}

#[tokio::test]
async fn shipping_requires_tracking_number() {
    let app = TestApp::new().await;
    let (_, _, order_id) = packaged_order(&app).await;

    let response = admin_patch(&app, order_id, json!({ "status": "SHIPPED" })).await;
    assert_eq!(response.status(), 400);
    assert_eq!(
        response_json(response).await["error"]["code"],
        "MISSING_TRACKING_INFO"
    );
    assert_eq!(
        app.order(order_id).await.unwrap().status,
        OrderStatus::Packaged
    );

    let response = admin_patch(
        &app,
        order_id,
        json!({ "status": "SHIPPED", "tracking_number": "jp1234567890" }),
    )
    .await;
    assert_eq!(response.status(), 200);
    let json = response_json(response).await;
    assert_eq!(json["data"]["status"], "SHIPPED");
    assert_eq!(json["data"]["tracking_number"], "JP1234567890");
    assert_eq!(json["data"]["carrier_name"], "JNE");

    let order = app.order(order_id).await.unwrap();
    assert!(order.shipped_at.is_some());
}

#[tokio::test]
async fn illegal_transitions_are_conflicts() {
    let app = TestApp::new().await;
    let (_, _, order_id) = app.checked_out_order(50000, 10, 1).await;

    let response = admin_patch(
        &app,
        order_id,
        json!({ "status": "SHIPPED", "tracking_number": "JP1234567890" }),
    )
    .await;
    assert_eq!(response.status(), 409);
    let json = response_json(response).await;
    assert_eq!(json["error"]["code"], "INVALID_TRANSITION");
    assert_eq!(json["error"]["details"]["from"], "PENDING");
    assert_eq!(json["error"]["details"]["to"], "SHIPPED");

    let response = admin_patch(&app, order_id, json!({ "status": "PACKAGED" })).await;
    assert_eq!(response.status(), 200);
    let response = admin_patch(&app, order_id, json!({ "status": "PENDING" })).await;
    assert_eq!(response.status(), 409);
}

#[tokio::test]
async fn cancelling_a_paid_order_refunds_and_restocks() {
    let app = TestApp::new().await;
    let (token, product_id, order_id) = packaged_order(&app).await;
    assert_eq!(app.stock_of(product_id).await, 8);

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/cancel/{}", order_id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(response.status(), 200);
    let json = response_json(response).await;
    assert_eq!(json["data"]["status"], "CANCELLED");
    assert_eq!(json["data"]["payment_status"], "REFUNDED");

    assert_eq!(app.stock_of(product_id).await, 10);
    let order = app.order(order_id).await.unwrap();
    assert!(order.cancelled_at.is_some());
    assert_eq!(
        app.gateway.cancelled.lock().unwrap().as_slice(),
        &[order_id.to_string()]
    );

    // Cancelled is terminal.
    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/cancel/{}", order_id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(response.status(), 409);
    assert_eq!(app.stock_of(product_id).await, 10);
}

#[tokio::test]
async fn cancelling_an_unpaid_order_marks_payment_failed() {
    let app = TestApp::new().await;
    let (token, product, order_id) = app.checked_out_order(50000, 10, 3).await;
    assert_eq!(app.stock_of(product.id).await, 7);

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/cancel/{}", order_id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(response.status(), 200);

    let order = app.order(order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(order.payment_status, PaymentStatus::Failed);
    assert_eq!(app.stock_of(product.id).await, 10);

    let logs = app.payment_logs(order_id).await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, "FAILED");
}

#[tokio::test]
async fn owner_completes_only_shipped_orders() {
    let app = TestApp::new().await;
    let (token, _, order_id) = packaged_order(&app).await;
    let complete_uri = format!("/api/v1/orders/complete/{}", order_id);

    let response = app
        .request(Method::PATCH, &complete_uri, Some(&token), None)
        .await;
    assert_eq!(response.status(), 409);

    let response = admin_patch(
        &app,
        order_id,
        json!({ "status": "SHIPPED", "tracking_number": "JP1234567890", "carrier_name": "SiCepat" }),
    )
    .await;
    assert_eq!(response.status(), 200);

    // Shipped orders can no longer be cancelled by the owner.
    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/cancel/{}", order_id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(response.status(), 409);

    let response = app
        .request(Method::PATCH, &complete_uri, Some(&token), None)
        .await;
    assert_eq!(response.status(), 200);

    let order = app.order(order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Completed);
    assert_eq!(order.carrier_name, "SiCepat");
    assert!(order.completed_at.is_some());
}

#[tokio::test]
async fn admin_delete_returns_reserved_stock() {
    let app = TestApp::new().await;
    let (_, product, order_id) = app.checked_out_order(50000, 10, 4).await;
    assert_eq!(app.stock_of(product.id).await, 6);

    let response = app
        .request(
            Method::DELETE,
            &format!("/api/v1/admin/orders/{}", order_id),
            Some(&app.admin_token()),
            None,
        )
        .await;
    assert_eq!(response.status(), 204);
    assert!(app.order(order_id).await.is_none());
    assert_eq!(app.stock_of(product.id).await, 10);

    let response = app
        .request(
            Method::DELETE,
            &format!("/api/v1/admin/orders/{}", order_id),
            Some(&app.admin_token()),
            None,
        )
        .await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn access_control_is_enforced() {
    let app = TestApp::new().await;
    let (token, _, order_id) = app.checked_out_order(50000, 10, 1).await;

    let response = app
        .request(Method::GET, "/api/v1/admin/orders", Some(&token), None)
        .await;
    assert_eq!(response.status(), 403);

    let response = app
        .request(Method::GET, "/api/v1/admin/orders", None, None)
        .await;
    assert_eq!(response.status(), 401);

    let stranger = app.seed_user("Orang Lain", Some("081399988877")).await;
    let stranger_token = app.token_for(stranger.id);
    for (method, uri) in [
        (Method::GET, format!("/api/v1/orders/{}", order_id)),
        (Method::POST, format!("/api/v1/orders/cancel/{}", order_id)),
        (Method::GET, format!("/api/v1/payment/status/{}", order_id)),
    ] {
        let response = app
            .request(method, &uri, Some(&stranger_token), None)
            .await;
        assert_eq!(response.status(), 403, "{uri}");
    }
    assert_eq!(
        app.order(order_id).await.unwrap().status,
        OrderStatus::Pending
    );

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", order_id),
            Some(&app.admin_token()),
            None,
        )
        .await;
    assert_eq!(response.status(), 200);

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", Uuid::new_v4()),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn admin_list_filters_by_status() {
    let app = TestApp::new().await;
    let (_, _, paid_order) = packaged_order(&app).await;
    let (_, _, _pending_order) = app.checked_out_order(20000, 10, 1).await;

    let response = app
        .request(
            Method::GET,
            "/api/v1/admin/orders?status=PACKAGED",
            Some(&app.admin_token()),
            None,
        )
        .await;
    assert_eq!(response.status(), 200);
    let json = response_json(response).await;
    assert_eq!(json["data"]["total"], 1);
    assert_eq!(json["data"]["orders"][0]["id"], paid_order.to_string());
    assert_eq!(json["data"]["orders"][0]["item_count"], 1);

    let response = app
        .request(
            Method::GET,
            "/api/v1/admin/orders?payment_status=PENDING&limit=1",
            Some(&app.admin_token()),
            None,
        )
        .await;
    let json = response_json(response).await;
    assert_eq!(json["data"]["total"], 1);
    assert_eq!(json["data"]["limit"], 1);

    let response = app
        .request(
            Method::GET,
            "/api/v1/admin/orders",
            Some(&app.admin_token()),
            None,
        )
        .await;
    assert_eq!(response_json(response).await["data"]["total"], 2);
}

#[tokio::test]
async fn payment_status_reports_live_gateway_state() {
    let app = TestApp::new().await;
    let (token, _, order_id) = app.checked_out_order(50000, 10, 2).await;
    app.gateway_reports(order_id, "pending", None, TOTAL);

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/payment/status/{}", order_id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(response.status(), 200);
    let json = response_json(response).await;
    assert_eq!(json["data"]["payment_status"], "PENDING");
    assert_eq!(json["data"]["gateway"]["transaction_status"], "pending");
}

#[tokio::test]
async fn owner_tracks_shipped_parcel() {
    let app = TestApp::new().await;
    let (token, _, order_id) = packaged_order(&app).await;
    let tracking_uri = format!("/api/v1/orders/tracking/{}", order_id);

    let response = app
        .request(Method::GET, &tracking_uri, Some(&token), None)
        .await;
    assert_eq!(response.status(), 400);
    assert_eq!(
        response_json(response).await["error"]["code"],
        "VALIDATION_ERROR"
    );

    let response = admin_patch(
        &app,
        order_id,
        json!({ "status": "SHIPPED", "tracking_number": "JP1234567890" }),
    )
    .await;
    assert_eq!(response.status(), 200);

    // Carrier has not scanned the parcel yet.
    let response = app
        .request(Method::GET, &tracking_uri, Some(&token), None)
        .await;
    assert_eq!(response.status(), 404);

    app.tracker.register("JP1234567890", "ON PROCESS");
    let response = app
        .request(Method::GET, &tracking_uri, Some(&token), None)
        .await;
    assert_eq!(response.status(), 200);
    let json = response_json(response).await;
    assert_eq!(json["data"]["order_status"], "SHIPPED");
    assert_eq!(json["data"]["tracking_number"], "JP1234567890");
    assert_eq!(json["data"]["courier"], "JNE");
    assert_eq!(json["data"]["tracking"]["status"], "ON PROCESS");
    assert_eq!(json["data"]["tracking"]["history"].as_array().unwrap().len(), 1);
    assert_eq!(
        app.tracker.lookups.lock().unwrap().last().cloned(),
        Some(("JNE".to_string(), "JP1234567890".to_string()))
    );

    let stranger = app.seed_user("Orang Lain", Some("081399988877")).await;
    let response = app
        .request(
            Method::GET,
            &tracking_uri,
            Some(&app.token_for(stranger.id)),
            None,
        )
        .await;
    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn admin_list_filters_by_creation_date() {
    let app = TestApp::new().await;
    let (_, _, old_order) = app.checked_out_order(50000, 10, 1).await;
    let (_, _, new_order) = app.checked_out_order(20000, 10, 1).await;

    let mut active: order::ActiveModel = app.order(old_order).await.unwrap().into();
    active.created_at = Set(Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap());
    active.update(&*app.state.db).await.unwrap();

    let (status, json) = admin_list(&app, "start_date=2024-01-01&end_date=2024-01-15").await;
    assert_eq!(status, 200);
    assert_eq!(json["data"]["total"], 1);
    assert_eq!(json["data"]["orders"][0]["id"], old_order.to_string());

    let (_, json) = admin_list(&app, "start_date=2025-01-01").await;
    assert_eq!(json["data"]["total"], 1);
    assert_eq!(json["data"]["orders"][0]["id"], new_order.to_string());

    let (status, json) = admin_list(&app, "start_date=2024-02-01&end_date=2024-01-01").await;
    assert_eq!(status, 400);
    assert_eq!(json["error"]["code"], "VALIDATION_ERROR");

    let (status, _) = admin_list(&app, "end_date=yesterday").await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn out_of_range_pages_are_rejected() {
    let app = TestApp::new().await;
    let (token, _, _) = app.checked_out_order(50000, 10, 1).await;

    let response = app
        .request(
            Method::GET,
            "/api/v1/orders?page=18446744073709551615&limit=10",
            Some(&token),
            None,
        )
        .await;
    assert_eq!(response.status(), 400);
    assert_eq!(
        response_json(response).await["error"]["code"],
        "VALIDATION_ERROR"
    );

    let response = app
        .request(
            Method::GET,
            "/api/v1/admin/orders?page=18446744073709551615",
            Some(&app.admin_token()),
            None,
        )
        .await;
    assert_eq!(response.status(), 400);

    // Far past the end but representable: an empty page, not an error.
    let response = app
        .request(Method::GET, "/api/v1/orders?page=1000&limit=10", Some(&token), None)
        .await;
    assert_eq!(response.status(), 200);
    let json = response_json(response).await;
    assert_eq!(json["data"]["total"], 1);
    assert!(json["data"]["orders"].as_array().unwrap().is_empty());
}
