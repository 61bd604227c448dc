pub mod cart;
pub mod cart_item;
pub mod order;
pub mod order_item;
pub mod payment_log;
pub mod product;
pub mod user;

pub use order::{OrderStatus, PaymentStatus};
