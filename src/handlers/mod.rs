pub mod admin_orders;
pub mod cart;
pub mod checkout;
pub mod common;
pub mod health;
pub mod orders;
pub mod payments;
pub mod shipping;

use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    services::{
        cart::CartService, checkout::CheckoutService, locks::KeyedLocks, orders::OrderService,
        payment_notifications::PaymentNotificationService, payments::PaymentGateway,
        shipping::ShippingRateProvider, tracking::ShipmentTracker,
    },
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub payment_notifications: Arc<PaymentNotificationService>,
    pub shipping: Arc<dyn ShippingRateProvider>,
}

impl AppServices {
    /// Wires every service against the given providers. Order mutations from
    /// staff, owners and the gateway share one set of per-order locks.
    pub fn new(
        db_pool: Arc<DbPool>,
        config: Arc<AppConfig>,
        shipping: Arc<dyn ShippingRateProvider>,
        gateway: Arc<dyn PaymentGateway>,
        tracker: Arc<dyn ShipmentTracker>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        let order_locks = KeyedLocks::new();

        let cart = Arc::new(CartService::new(db_pool.clone(), event_sender.clone()));
        let checkout = Arc::new(CheckoutService::new(
            db_pool.clone(),
            shipping.clone(),
            gateway.clone(),
            config,
            event_sender.clone(),
        ));
        let orders = Arc::new(OrderService::new(
            db_pool.clone(),
            gateway.clone(),
            tracker,
            order_locks.clone(),
            event_sender.clone(),
        ));
        let payment_notifications = Arc::new(PaymentNotificationService::new(
            db_pool,
            gateway,
            order_locks,
            event_sender,
        ));

        Self {
            cart,
            checkout,
            orders,
            payment_notifications,
            shipping,
        }
    }
}
