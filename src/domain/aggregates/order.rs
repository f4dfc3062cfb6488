//! Order Record Aggregate

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use crate::domain::aggregates::Cart;
use crate::domain::value_objects::Money;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub item_id: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Money,
}

impl OrderLine {
    pub fn line_total(&self) -> Money { self.unit_price.multiply(self.quantity) }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MobileMoneyProvider { Mpesa, AirtelMoney }

/// How an order is (or will be) paid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "provider")]
pub enum PaymentChannel {
    /// Cash on delivery.
    Cash,
    MobileMoney(MobileMoneyProvider),
    /// Entered through the chat assistant or by hand; settled later.
    Chat,
}

impl PaymentChannel {
    pub fn is_remote(&self) -> bool { matches!(self, Self::MobileMoney(_)) }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::MobileMoney(MobileMoneyProvider::Mpesa) => "mpesa",
            Self::MobileMoney(MobileMoneyProvider::AirtelMoney) => "airtel_money",
            Self::Chat => "chat",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cash" | "cash_on_delivery" => Some(Self::Cash),
            "mpesa" | "m-pesa" => Some(Self::MobileMoney(MobileMoneyProvider::Mpesa)),
            "airtel_money" | "airtel" => Some(Self::MobileMoney(MobileMoneyProvider::AirtelMoney)),
            "chat" | "manual" => Some(Self::Chat),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus { #[default] Pending, Paid }

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str { match self { Self::Pending => "pending", Self::Paid => "paid" } }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentStatus { #[default] Unfulfilled, Fulfilled }

/// A placed order. Only the backend moves its statuses after creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: Uuid,
    pub order_number: String,
    pub lines: Vec<OrderLine>,
    pub grand_total: Money,
    pub payment_channel: PaymentChannel,
    pub payment_status: PaymentStatus,
    pub fulfillment_status: FulfillmentStatus,
    pub payee_identifier: Option<String>,
    pub payment_reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OrderRecord {
    pub fn create(lines: Vec<OrderLine>, grand_total: Money, payment_channel: PaymentChannel, payment_status: PaymentStatus) -> Self {
        Self {
            order_id: Uuid::now_v7(),
            order_number: generate_order_number(),
            lines,
            grand_total,
            payment_channel,
            payment_status,
            fulfillment_status: FulfillmentStatus::Unfulfilled,
            payee_identifier: None,
            payment_reference: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_payee(mut self, payee: impl Into<String>) -> Self { self.payee_identifier = Some(payee.into()); self }
    pub fn with_payment_reference(mut self, reference: impl Into<String>) -> Self { self.payment_reference = Some(reference.into()); self }

    pub fn item_count(&self) -> u32 { self.lines.iter().map(|l| l.quantity).sum() }
    pub fn is_paid(&self) -> bool { self.payment_status == PaymentStatus::Paid }

    /// Paid orders ship; cash orders ship and collect on delivery. Anything
    /// else waits for payment.
    pub fn can_fulfil(&self) -> bool {
        self.fulfillment_status == FulfillmentStatus::Unfulfilled
            && (self.is_paid() || self.payment_channel == PaymentChannel::Cash)
    }
}

/// Snapshots cart lines with their current names and prices.
pub fn lines_from_cart(cart: &Cart) -> Vec<OrderLine> {
    cart.priced_lines()
        .map(|(line, item)| OrderLine { item_id: item.id.clone(), name: item.name.clone(), quantity: line.quantity, unit_price: item.unit_price.clone() })
        .collect()
}

pub fn generate_order_number() -> String {
    format!("ORD-{:08}", rand::thread_rng().gen_range(0..100_000_000u32))
}
