#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{header, Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde_json::{json, Value};
use storefront_api::{
    auth::{AuthService, ROLE_ADMIN, ROLE_USER},
    build_router,
    config::AppConfig,
    db,
    entities::{order, payment_log, product, user},
    events::{self, EventSender},
    handlers::AppServices,
    services::{
        payments::{
            notification_signature, GatewayError, PaymentGateway, PaymentSession,
            PaymentSessionRequest, TransactionStatus,
        },
        shipping::{
            Destination, RateQuery, ShippingProviderError, ShippingQuote, ShippingRateProvider,
        },
        tracking::{ShipmentTracker, TrackingEvent, TrackingInfo},
    },
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const SERVER_KEY: &str = "SB-Mid-server-test-key";
pub const WAREHOUSE_ID: &str = "31555";
const JWT_SECRET: &str =
    "integration_test_secret_that_is_comfortably_longer_than_sixty_four_characters_total";

/// Shipping provider double: one known destination and a fixed rate card.
pub struct FakeShipping {
    pub destinations: Mutex<Vec<Destination>>,
    pub quotes: Mutex<Vec<ShippingQuote>>,
    pub rate_queries: Mutex<Vec<RateQuery>>,
    pub fail_with: Mutex<Option<ShippingProviderError>>,
}

impl Default for FakeShipping {
    fn default() -> Self {
        Self {
            destinations: Mutex::new(vec![Destination {
                id: "17480".into(),
                subdistrict_name: "PONDOK PETIR".into(),
                district_name: "BOJONGSARI".into(),
                city_name: "DEPOK".into(),
                zip_code: Some("16517".into()),
                label: None,
            }]),
            quotes: Mutex::new(vec![
                quote("JNE", "REG", 15000, Some("2-3")),
                quote("JNE", "YES", 30000, Some("1")),
                quote("SiCepat", "REG", 14000, None),
            ]),
            rate_queries: Mutex::new(Vec::new()),
            fail_with: Mutex::new(None),
        }
    }
}

fn quote(carrier: &str, service: &str, price: i64, etd: Option<&str>) -> ShippingQuote {
    ShippingQuote {
        carrier_name: carrier.into(),
        service_name: service.into(),
        price: Decimal::from(price),
        estimated_days: etd.map(str::to_string),
        cod_available: false,
    }
}

#[async_trait]
impl ShippingRateProvider for FakeShipping {
    async fn search_destinations(
        &self,
        keyword: &str,
    ) -> Result<Vec<Destination>, ShippingProviderError> {
        if let Some(err) = self.fail_with.lock().unwrap().clone() {
            return Err(err);
        }
        let keyword = keyword.trim().to_lowercase();
        Ok(self
            .destinations
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.subdistrict_name.to_lowercase().contains(&keyword))
            .cloned()
            .collect())
    }

    async fn calculate_shipping_cost(
        &self,
        query: &RateQuery,
    ) -> Result<Vec<ShippingQuote>, ShippingProviderError> {
        if let Some(err) = self.fail_with.lock().unwrap().clone() {
            return Err(err);
        }
        self.rate_queries.lock().unwrap().push(query.clone());
        Ok(self
            .quotes
            .lock()
            .unwrap()
            .iter()
            .filter(|q| match &query.courier {
                Some(c) => q.carrier_name.eq_ignore_ascii_case(c),
                None => true,
            })
            .cloned()
            .collect())
    }
}

/// Tracking double: answers for airway bills registered in `parcels` and
/// records every lookup as (courier, tracking number).
#[derive(Default)]
pub struct FakeTracker {
    pub parcels: Mutex<HashMap<String, TrackingInfo>>,
    pub lookups: Mutex<Vec<(String, String)>>,
}

impl FakeTracker {
    pub fn register(&self, tracking_number: &str, status: &str) {
        self.parcels.lock().unwrap().insert(
            tracking_number.to_string(),
            TrackingInfo {
                courier: "jne".into(),
                tracking_number: tracking_number.to_string(),
                status: status.to_string(),
                history: vec![TrackingEvent {
                    date: "2026-01-06 08:00:00".into(),
                    description: "SHIPMENT RECEIVED BY JNE COUNTER".into(),
                    location: Some("JAKARTA".into()),
                }],
                estimated_delivery: None,
                receiver: None,
            },
        );
    }
}

#[async_trait]
impl ShipmentTracker for FakeTracker {
    async fn track(
        &self,
        courier: &str,
        tracking_number: &str,
    ) -> Result<Option<TrackingInfo>, ShippingProviderError> {
        self.lookups
            .lock()
            .unwrap()
            .push((courier.to_string(), tracking_number.to_string()));
        Ok(self.parcels.lock().unwrap().get(tracking_number).cloned())
    }
}

/// Payment gateway double. Status lookups answer from `statuses`, keyed by
/// order reference, which tests fill before posting a notification.
pub struct FakeGateway {
    pub sessions: Mutex<Vec<PaymentSessionRequest>>,
    pub statuses: Mutex<HashMap<String, TransactionStatus>>,
    pub cancelled: Mutex<Vec<String>>,
    pub fail_create: Mutex<Option<GatewayError>>,
    pub fail_status: Mutex<Option<GatewayError>>,
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self {
            sessions: Mutex::new(Vec::new()),
            statuses: Mutex::new(HashMap::new()),
            cancelled: Mutex::new(Vec::new()),
            fail_create: Mutex::new(None),
            fail_status: Mutex::new(None),
        }
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_transaction(
        &self,
        request: &PaymentSessionRequest,
    ) -> Result<PaymentSession, GatewayError> {
        if let Some(err) = self.fail_create.lock().unwrap().clone() {
            return Err(err);
        }
        self.sessions.lock().unwrap().push(request.clone());
        Ok(PaymentSession {
            token: format!("snap-token-{}", request.order_ref),
            redirect_url: format!(
                "https://app.sandbox.midtrans.com/snap/v4/redirection/{}",
                request.order_ref
            ),
        })
    }

    async fn transaction_status(&self, order_ref: &str) -> Result<TransactionStatus, GatewayError> {
        if let Some(err) = self.fail_status.lock().unwrap().clone() {
            return Err(err);
        }
        self.statuses
            .lock()
            .unwrap()
            .get(order_ref)
            .cloned()
            .ok_or_else(|| GatewayError::Upstream {
                status: 404,
                message: "Transaction doesn't exist.".into(),
            })
    }

    async fn cancel_transaction(&self, order_ref: &str) -> Result<TransactionStatus, GatewayError> {
        self.cancelled.lock().unwrap().push(order_ref.to_string());
        let mut status = self.transaction_status(order_ref).await?;
        status.transaction_status = "cancel".into();
        Ok(status)
    }

    fn server_key(&self) -> &str {
        SERVER_KEY
    }
}

/// Helper harness for spinning up the application against an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub shipping: Arc<FakeShipping>,
    pub gateway: Arc<FakeGateway>,
    pub tracker: Arc<FakeTracker>,
    auth: Arc<AuthService>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(customize: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            JWT_SECRET.to_string(),
            "test".to_string(),
        );
        // A single connection keeps every query on the same in-memory database.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.shipping.warehouse_destination_id = WAREHOUSE_ID.to_string();
        cfg.payment.server_key = SERVER_KEY.to_string();
        cfg.payment.frontend_url = "https://shop.example.com".to_string();
        customize(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let shipping = Arc::new(FakeShipping::default());
        let gateway = Arc::new(FakeGateway::default());
        let tracker = Arc::new(FakeTracker::default());
        let auth = Arc::new(AuthService::new(&cfg.jwt_secret));
        let cfg = Arc::new(cfg);

        let services = AppServices::new(
            db_arc.clone(),
            cfg.clone(),
            shipping.clone(),
            gateway.clone(),
            tracker.clone(),
            Some(event_sender),
        );
        let state = AppState {
            db: db_arc,
            config: cfg,
            services,
            auth: auth.clone(),
        };
        let router = build_router(state.clone()).expect("router builds in tests");

        Self {
            router,
            state,
            shipping,
            gateway,
            tracker,
            auth,
            _event_task: event_task,
        }
    }

    pub fn token_for(&self, user_id: Uuid) -> String {
        self.auth
            .issue_token(user_id, ROLE_USER, chrono::Duration::hours(1))
            .expect("issue user token")
    }

    pub fn admin_token(&self) -> String {
        self.auth
            .issue_token(Uuid::new_v4(), ROLE_ADMIN, chrono::Duration::hours(1))
            .expect("issue admin token")
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("valid request");

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    pub async fn post_raw(&self, uri: &str, raw: impl Into<Body>) -> Response {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(raw.into())
            .expect("valid request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    pub async fn seed_user(&self, full_name: &str, phone: Option<&str>) -> user::Model {
        let now = Utc::now();
        user::ActiveModel {
            id: Set(Uuid::new_v4()),
            full_name: Set(full_name.to_string()),
            email: Set(format!("{}@example.com", Uuid::new_v4().simple())),
            phone: Set(phone.map(str::to_string)),
            role: Set(ROLE_USER.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed user")
    }

    pub async fn seed_product(&self, name: &str, price: i64, weight: i32, stock: i32) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            description: Set(None),
            price: Set(Decimal::from(price)),
            weight: Set(weight),
            stock: Set(stock),
            image_url: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    pub async fn stock_of(&self, product_id: Uuid) -> i32 {
        product::Entity::find_by_id(product_id)
            .one(&*self.state.db)
            .await
            .expect("query product")
            .expect("product exists")
            .stock
    }

    pub async fn order(&self, order_id: Uuid) -> Option<order::Model> {
        order::Entity::find_by_id(order_id)
            .one(&*self.state.db)
            .await
            .expect("query order")
    }

    pub async fn payment_logs(&self, order_id: Uuid) -> Vec<payment_log::Model> {
        payment_log::Entity::find()
            .filter(payment_log::Column::OrderId.eq(order_id))
            .all(&*self.state.db)
            .await
            .expect("query payment logs")
    }

    pub async fn add_to_cart(&self, token: &str, product_id: Uuid, quantity: i32) -> Response {
        self.request(
            Method::POST,
            "/api/v1/cart/items",
            Some(token),
            Some(json!({ "product_id": product_id, "quantity": quantity })),
        )
        .await
    }

    pub async fn checkout(&self, token: &str) -> Response {
        self.request(Method::POST, "/api/v1/checkout", Some(token), Some(checkout_body()))
            .await
    }

    /// Seeds a customer with `quantity` of a fresh product in the cart and
    /// checks out. Returns (customer token, product, order id).
    pub async fn checked_out_order(
        &self,
        price: i64,
        stock: i32,
        quantity: i32,
    ) -> (String, product::Model, Uuid) {
        let customer = self.seed_user("Budi Santoso", Some("081234567890")).await;
        let token = self.token_for(customer.id);
        let product = self.seed_product("Kopi Gayo 250g", price, 500, stock).await;
        assert_eq!(self.add_to_cart(&token, product.id, quantity).await.status(), 200);

        let response = self.checkout(&token).await;
        assert_eq!(response.status(), 201);
        let body = response_json(response).await;
        let order_id = body["data"]["order"]["id"]
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .expect("order id in receipt");
        (token, product, order_id)
    }

    /// Makes the gateway report `status` for the order and builds the matching
    /// signed notification body.
    pub fn gateway_reports(
        &self,
        order_id: Uuid,
        transaction_status: &str,
        fraud_status: Option<&str>,
        gross_amount: &str,
    ) -> Value {
        let order_ref = order_id.to_string();
        let status_code = match transaction_status {
            "pending" => "201",
            "deny" | "cancel" | "expire" => "202",
            _ => "200",
        };
        let transaction_id = format!("trx-{}", order_id.simple());
        self.gateway.statuses.lock().unwrap().insert(
            order_ref.clone(),
            TransactionStatus {
                order_id: order_ref.clone(),
                transaction_id: transaction_id.clone(),
                transaction_status: transaction_status.to_string(),
                fraud_status: fraud_status.map(str::to_string),
                status_code: status_code.to_string(),
                gross_amount: gross_amount.to_string(),
                payment_type: Some("bank_transfer".to_string()),
                transaction_time: Some("2026-01-05 10:00:00".to_string()),
                settlement_time: (transaction_status == "settlement")
                    .then(|| "2026-01-05 10:05:00".to_string()),
                status_message: None,
            },
        );

        let signature = notification_signature(&order_ref, status_code, gross_amount, SERVER_KEY);
        let mut body = json!({
            "order_id": order_ref,
            "status_code": status_code,
            "gross_amount": gross_amount,
            "signature_key": signature,
            "transaction_status": transaction_status,
            "transaction_id": transaction_id,
            "payment_type": "bank_transfer",
            "transaction_time": "2026-01-05 10:00:00",
        });
        if let Some(fraud) = fraud_status {
            body["fraud_status"] = json!(fraud);
        }
        body
    }

    pub async fn notify(&self, body: &Value) -> Response {
        self.post_raw("/api/v1/payment/notification", body.to_string())
            .await
    }
}

pub fn checkout_body() -> Value {
    json!({
        "shipping_address": "Jl. Kenanga No. 5, RT 02/RW 03",
        "shipping_province": "Jawa Barat",
        "shipping_city": "Depok",
        "shipping_district": "Bojongsari",
        "shipping_subdistrict": "Pondok Petir",
        "shipping_post_code": "16517",
        "courier": "jne",
        "shipping_service": "REG"
    })
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
