//! Postgres-backed order store and catalog source.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;
use crate::domain::aggregates::{FulfillmentStatus, OrderLine, OrderRecord, PaymentChannel, PaymentStatus};
use crate::domain::catalog::{CatalogItem, CatalogSnapshot, CatalogSource};
use crate::domain::value_objects::Money;
use crate::store::{OrderFilter, OrderStore};
use crate::{OrderingError, Result};

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: String,
    lines: Json<Vec<OrderLine>>,
    grand_total: Decimal,
    currency: String,
    payment_channel: Json<PaymentChannel>,
    payment_status: String,
    fulfillment_status: String,
    payee_identifier: Option<String>,
    payment_reference: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for OrderRecord {
    type Error = OrderingError;

    fn try_from(row: OrderRow) -> Result<Self> {
        let payment_status = match row.payment_status.as_str() {
            "pending" => PaymentStatus::Pending,
            "paid" => PaymentStatus::Paid,
            other => return Err(OrderingError::Storage(format!("unknown payment status '{other}' on {}", row.id))),
        };
        let fulfillment_status = match row.fulfillment_status.as_str() {
            "fulfilled" => FulfillmentStatus::Fulfilled,
            _ => FulfillmentStatus::Unfulfilled,
        };
        Ok(OrderRecord {
            order_id: row.id,
            order_number: row.order_number,
            lines: row.lines.0,
            grand_total: Money::new(row.grand_total, &row.currency),
            payment_channel: row.payment_channel.0,
            payment_status,
            fulfillment_status,
            payee_identifier: row.payee_identifier,
            payment_reference: row.payment_reference,
            created_at: row.created_at,
        })
    }
}

#[derive(Clone, Debug)]
pub struct PgOrderStore { db: PgPool }

impl PgOrderStore {
    pub fn new(db: PgPool) -> Self { Self { db } }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn append(&self, order: OrderRecord) -> Result<Uuid> {
        let fulfillment = match order.fulfillment_status { FulfillmentStatus::Unfulfilled => "unfulfilled", FulfillmentStatus::Fulfilled => "fulfilled" };
        let inserted = sqlx::query("INSERT INTO ordering_orders (id, order_number, lines, grand_total, currency, payment_channel, payment_status, fulfillment_status, payee_identifier, payment_reference, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) ON CONFLICT (id) DO NOTHING")
            .bind(order.order_id).bind(&order.order_number).bind(Json(&order.lines)).bind(order.grand_total.amount()).bind(order.grand_total.currency())
            .bind(Json(order.payment_channel)).bind(order.payment_status.as_str()).bind(fulfillment).bind(&order.payee_identifier).bind(&order.payment_reference).bind(order.created_at)
            .execute(&self.db).await?;
        if inserted.rows_affected() == 0 {
            return Err(OrderingError::DuplicateOrder(order.order_id));
        }
        tracing::info!(order_id = %order.order_id, order_number = %order.order_number, "order persisted");
        Ok(order.order_id)
    }

    async fn list(&self, filter: Option<&OrderFilter>) -> Result<Vec<OrderRecord>> {
        let rows = sqlx::query_as::<_, OrderRow>("SELECT id, order_number, lines, grand_total, currency, payment_channel, payment_status, fulfillment_status, payee_identifier, payment_reference, created_at FROM ordering_orders ORDER BY created_at, id")
            .fetch_all(&self.db).await?;
        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            let order = OrderRecord::try_from(row)?;
            if filter.map_or(true, |f| f(&order)) { orders.push(order); }
        }
        Ok(orders)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ProductRow { id: String, name: String, price: Decimal, stock: i32, category: Option<String>, unit: Option<String> }

/// Reads active products from the shared `products` table.
#[derive(Clone, Debug)]
pub struct PgCatalog { db: PgPool, currency: String }

impl PgCatalog {
    pub fn new(db: PgPool, currency: &str) -> Self { Self { db, currency: currency.to_string() } }
}

#[async_trait]
impl CatalogSource for PgCatalog {
    async fn fetch(&self) -> Result<Arc<CatalogSnapshot>> {
        let rows = sqlx::query_as::<_, ProductRow>("SELECT id::text AS id, name, price, stock, category, unit FROM products WHERE status = 'active' ORDER BY name")
            .fetch_all(&self.db).await
            .map_err(|e| OrderingError::Catalog(e.to_string()))?;
        let items = rows
            .into_iter()
            .map(|r| CatalogItem {
                id: r.id,
                name: r.name,
                unit_price: Money::new(r.price, &self.currency),
                available_stock: u32::try_from(r.stock).unwrap_or(0),
                category: r.category.unwrap_or_default(),
                unit: r.unit,
            })
            .collect();
        Ok(Arc::new(CatalogSnapshot::new(items)))
    }
}
