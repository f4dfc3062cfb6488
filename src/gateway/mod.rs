//! Payment confirmation port.
//!
//! The checkout flow hands a [`PaymentRequest`] to a [`PaymentGateway`] and
//! waits (bounded by the configured timeout) for a [`ConfirmationOutcome`].

pub mod mpesa;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use crate::domain::aggregates::PaymentChannel;
use crate::domain::value_objects::{Money, PhoneNumber};
use crate::Result;

pub use mpesa::MpesaGateway;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PaymentRequest {
    pub channel: PaymentChannel,
    pub payee: PhoneNumber,
    pub amount: Money,
    /// Shown on the customer's handset; the order number.
    pub account_reference: String,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Confirmed { reference: String },
    Declined { reason: String },
}

/// Remote payment provider. `Err` means the provider could not be reached;
/// a refusal is an `Ok(Declined)`.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn request_payment(&self, request: &PaymentRequest) -> Result<ConfirmationOutcome>;
}

/// Confirms every request after a fixed delay, the way the storefront demo
/// behaves. Can be switched to decline for failure drills.
#[derive(Debug, Default)]
pub struct SimulatedGateway {
    delay: Duration,
    decline: AtomicBool,
    calls: AtomicU32,
}

impl SimulatedGateway {
    pub fn new(delay: Duration) -> Self { Self { delay, ..Self::default() } }

    pub fn set_decline(&self, decline: bool) { self.decline.store(decline, Ordering::SeqCst); }

    /// Number of requests received so far.
    pub fn calls(&self) -> u32 { self.calls.load(Ordering::SeqCst) }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn request_payment(&self, request: &PaymentRequest) -> Result<ConfirmationOutcome> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(payee = %request.payee, amount = %request.amount, reference = %request.account_reference, "simulated payment request");
        tokio::time::sleep(self.delay).await;
        if self.decline.load(Ordering::SeqCst) {
            return Ok(ConfirmationOutcome::Declined { reason: "declined by provider".to_string() });
        }
        Ok(ConfirmationOutcome::Confirmed { reference: format!("SIM{call:06}") })
    }
}
