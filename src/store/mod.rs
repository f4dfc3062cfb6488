//! Order record store.
//!
//! Append-only: the workflow appends placed orders and reads them back.
//! Status changes after creation belong to the fulfilment backend.

pub mod postgres;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;
use crate::domain::aggregates::OrderRecord;
use crate::{OrderingError, Result};

pub use postgres::{PgCatalog, PgOrderStore};

/// Caller-supplied predicate for [`OrderStore::list`].
pub type OrderFilter = dyn Fn(&OrderRecord) -> bool + Send + Sync;

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists the record and returns its id. A duplicate id is refused.
    async fn append(&self, order: OrderRecord) -> Result<Uuid>;

    /// Orders in insertion order, optionally filtered.
    async fn list(&self, filter: Option<&OrderFilter>) -> Result<Vec<OrderRecord>>;

    async fn get(&self, order_id: Uuid) -> Result<OrderRecord> {
        self.list(Some(&move |o: &OrderRecord| o.order_id == order_id))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| OrderingError::OrderNotFound(order_id.to_string()))
    }
}

/// Local mirror used by the listing screens and by tests.
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<Vec<OrderRecord>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self { Self::default() }

    pub async fn len(&self) -> usize { self.orders.read().await.len() }

    pub async fn is_empty(&self) -> bool { self.orders.read().await.is_empty() }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn append(&self, order: OrderRecord) -> Result<Uuid> {
        let mut orders = self.orders.write().await;
        if orders.iter().any(|o| o.order_id == order.order_id) {
            return Err(OrderingError::DuplicateOrder(order.order_id));
        }
        let id = order.order_id;
        tracing::info!(order_id = %id, order_number = %order.order_number, channel = %order.payment_channel, "order appended");
        orders.push(order);
        Ok(id)
    }

    async fn list(&self, filter: Option<&OrderFilter>) -> Result<Vec<OrderRecord>> {
        let orders = self.orders.read().await;
        Ok(orders.iter().filter(|o| filter.map_or(true, |f| f(o))).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{PaymentChannel, PaymentStatus};
    use crate::domain::value_objects::Money;

    fn order(status: PaymentStatus) -> OrderRecord {
        OrderRecord::create(vec![], Money::default(), PaymentChannel::Cash, status)
    }

    #[tokio::test]
    async fn test_append_and_list() {
        let store = InMemoryOrderStore::new();
        let paid = order(PaymentStatus::Paid);
        let paid_id = store.append(paid).await.unwrap();
        store.append(order(PaymentStatus::Pending)).await.unwrap();

        assert_eq!(store.list(None).await.unwrap().len(), 2);
        let only_paid = store.list(Some(&|o: &OrderRecord| o.is_paid())).await.unwrap();
        assert_eq!(only_paid.len(), 1);
        assert_eq!(only_paid[0].order_id, paid_id);
        assert_eq!(store.get(paid_id).await.unwrap().order_id, paid_id);
    }

    #[tokio::test]
    async fn test_duplicate_rejected() {
        let store = InMemoryOrderStore::new();
        let o = order(PaymentStatus::Pending);
        store.append(o.clone()).await.unwrap();
        assert!(matches!(store.append(o).await, Err(OrderingError::DuplicateOrder(_))));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = InMemoryOrderStore::new();
        assert!(matches!(store.get(Uuid::now_v7()).await, Err(OrderingError::OrderNotFound(_))));
    }
}
