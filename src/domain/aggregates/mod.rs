//! Aggregates module
pub mod cart;
pub mod order;

pub use cart::{Cart, CartLine};
pub use order::{FulfillmentStatus, MobileMoneyProvider, OrderLine, OrderRecord, PaymentChannel, PaymentStatus};
