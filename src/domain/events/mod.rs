//! Domain events
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;
use crate::domain::aggregates::{OrderRecord, PaymentChannel, PaymentStatus};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Placed { order_id: Uuid, order_number: String, channel: PaymentChannel, status: PaymentStatus, total: Decimal },
    PaymentFailed { channel: PaymentChannel, reason: String, attempts: u32 },
}

impl OrderEvent {
    pub fn placed(order: &OrderRecord) -> Self {
        Self::Placed {
            order_id: order.order_id,
            order_number: order.order_number.clone(),
            channel: order.payment_channel,
            status: order.payment_status,
            total: order.grand_total.amount(),
        }
    }

    pub fn subject(&self) -> &'static str {
        match self {
            Self::Placed { .. } => "ordering.order.placed",
            Self::PaymentFailed { .. } => "ordering.payment.failed",
        }
    }

    pub fn to_payload(&self) -> Vec<u8> { serde_json::to_vec(self).unwrap_or_default() }
}

/// Publishes to NATS when a client is configured; otherwise only logs.
pub async fn publish(nats: Option<&async_nats::Client>, event: &OrderEvent) {
    let Some(client) = nats else {
        tracing::debug!(subject = event.subject(), "no NATS client, event not published");
        return;
    };
    if let Err(e) = client.publish(event.subject().to_string(), event.to_payload().into()).await {
        tracing::warn!(subject = event.subject(), error = %e, "failed to publish order event");
    }
}
