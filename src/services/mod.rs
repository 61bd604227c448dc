// Storefront pipeline: cart -> checkout -> payment -> fulfillment
pub mod cart;
pub mod checkout;
pub mod orders;
pub mod payment_notifications;

// Status rules shared by admin actions and gateway notifications
pub mod order_status;

// Stock movements and per-key serialization
pub mod inventory;
pub mod locks;

// External providers
pub mod payments;
pub mod shipping;
pub mod tracking;
