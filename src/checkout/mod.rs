//! Checkout: the payment flow state machine and the orchestrator that
//! drives it against a cart, a payment gateway and the order store.

pub mod flow;
pub mod state;

pub use flow::Checkout;
pub use state::{CheckoutEvent, CheckoutState, FailureReason, PaymentSession, ProcessingOutcome};
