//! OpenSASE Ordering
//!
//! Order intake and payment workflow shared by the wholesaler console, the
//! storefront checkout and the chat ordering assistant.
//!
//! ## Features
//! - Stock-bounded shopping cart over a catalog snapshot
//! - Subtotal, tax and shipping derivation
//! - Checkout state machine for cash and mobile-money channels
//! - Free-text order extraction for chat intake
//! - Append-only order record store

pub mod api;
pub mod checkout;
pub mod config;
pub mod domain;
pub mod gateway;
pub mod intake;
pub mod store;

pub use checkout::{Checkout, CheckoutState, FailureReason, PaymentSession};
pub use config::OrderingConfig;
pub use domain::aggregates::{Cart, CartLine, OrderLine, OrderRecord, PaymentChannel, PaymentStatus};
pub use domain::catalog::{CatalogItem, CatalogSnapshot, CatalogSource};
pub use domain::pricing::{PricingRules, Totals};
pub use intake::{Extraction, Intent, OrderExtractor};
pub use store::OrderStore;

use domain::value_objects::{MoneyError, PhoneNumberError};
use thiserror::Error;
use uuid::Uuid;

// =============================================================================
// Error Types
// =============================================================================

/// A guarded operation refused to run. The cart or payment session it was
/// aimed at is left exactly as it was; the message is meant for the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("{item_id} is out of stock")]
    OutOfStock { item_id: String },

    #[error("only {available} of {item_id} available, {requested} requested")]
    ExceedsStock { item_id: String, requested: u32, available: u32 },

    #[error("{0} is not in the catalog")]
    UnknownItem(String),

    #[error("cart is empty")]
    EmptyCart,

    #[error("please enter your phone number")]
    EmptyPayee,

    #[error("{0}")]
    InvalidPayee(PhoneNumberError),

    #[error("{channel} cannot be chosen at checkout")]
    ChannelNotSelectable { channel: PaymentChannel },

    #[error("cannot {action} while {state}")]
    InvalidTransition { state: CheckoutState, action: &'static str },

    #[error("payment attempts exhausted")]
    AttemptsExhausted,
}

#[derive(Error, Debug)]
pub enum OrderingError {
    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Duplicate order: {0}")]
    DuplicateOrder(Uuid),

    #[error("Catalog unavailable: {0}")]
    Catalog(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Payment failed ({reason}): {message}")]
    PaymentFailed { reason: FailureReason, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Money(#[from] MoneyError),
}

impl From<sqlx::Error> for OrderingError {
    fn from(e: sqlx::Error) -> Self { Self::Storage(e.to_string()) }
}

impl From<reqwest::Error> for OrderingError {
    fn from(e: reqwest::Error) -> Self { Self::Gateway(e.to_string()) }
}

pub type Result<T, E = OrderingError> = std::result::Result<T, E>;
