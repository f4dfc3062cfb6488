//! Catalog snapshot

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use crate::domain::value_objects::Money;
use crate::Result;

/// A purchasable item as the external product source reports it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: String,
    pub name: String,
    pub unit_price: Money,
    pub available_stock: u32,
    pub category: String,
    #[serde(default)]
    pub unit: Option<String>,
}

impl CatalogItem {
    pub fn new(id: impl Into<String>, name: impl Into<String>, unit_price: Money, available_stock: u32, category: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into(), unit_price, available_stock, category: category.into(), unit: None }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self { self.unit = Some(unit.into()); self }
    pub fn is_in_stock(&self) -> bool { self.available_stock > 0 }
}

/// Read-only view of the catalog for one session. Refreshing means fetching a
/// new snapshot, never mutating this one.
#[derive(Clone, Debug, Default)]
pub struct CatalogSnapshot {
    items: Vec<CatalogItem>,
    index: HashMap<String, usize>,
}

impl CatalogSnapshot {
    /// Later duplicates of an id are ignored.
    pub fn new(items: Vec<CatalogItem>) -> Self {
        let mut index = HashMap::with_capacity(items.len());
        let mut unique = Vec::with_capacity(items.len());
        for item in items {
            if index.contains_key(&item.id) { continue; }
            index.insert(item.id.clone(), unique.len());
            unique.push(item);
        }
        Self { items: unique, index }
    }

    pub fn items(&self) -> &[CatalogItem] { &self.items }
    pub fn len(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }

    pub fn find_by_id(&self, id: &str) -> Option<&CatalogItem> {
        self.index.get(id).and_then(|&i| self.items.get(i))
    }

    pub fn find_by_name(&self, name: &str) -> Option<&CatalogItem> {
        self.items.iter().find(|i| i.name.eq_ignore_ascii_case(name.trim()))
    }

    pub fn available(&self) -> impl Iterator<Item = &CatalogItem> {
        self.items.iter().filter(|i| i.is_in_stock())
    }

    /// Up to `n` in-stock items, in catalog order.
    pub fn sample(&self, n: usize) -> Vec<&CatalogItem> { self.available().take(n).collect() }
}

/// External product source.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch(&self) -> Result<Arc<CatalogSnapshot>>;
}

/// Catalog held in memory, for demos and tests.
#[derive(Clone, Debug, Default)]
pub struct StaticCatalog {
    snapshot: Arc<CatalogSnapshot>,
}

impl StaticCatalog {
    pub fn new(items: Vec<CatalogItem>) -> Self { Self { snapshot: Arc::new(CatalogSnapshot::new(items)) } }
}

#[async_trait]
impl CatalogSource for StaticCatalog {
    async fn fetch(&self) -> Result<Arc<CatalogSnapshot>> { Ok(Arc::clone(&self.snapshot)) }
}

/// Wholesale demo catalog the binary falls back to without a database.
pub fn demo_items(currency: &str) -> Vec<CatalogItem> {
    use rust_decimal::Decimal;
    vec![
        CatalogItem::new("SUG-2KG", "Sugar 2kg", Money::new(Decimal::new(320, 0), currency), 120, "Groceries").with_unit("bag"),
        CatalogItem::new("RIC-5KG", "Rice Pishori 5kg", Money::new(Decimal::new(1150, 0), currency), 40, "Groceries").with_unit("bag"),
        CatalogItem::new("OIL-3L", "Cooking Oil 3L", Money::new(Decimal::new(890, 0), currency), 0, "Groceries").with_unit("unit"),
        CatalogItem::new("FLR-2KG", "Maize Flour 2kg", Money::new(Decimal::new(210, 0), currency), 75, "Groceries").with_unit("bag"),
        CatalogItem::new("SOAP-1KG", "Bar Soap 1kg", Money::new(Decimal::new(260, 0), currency), 30, "Household").with_unit("piece"),
    ]
}
