//! Cart Aggregate

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;
use crate::domain::catalog::{CatalogItem, CatalogSnapshot};
use crate::domain::pricing::{PricingRules, Totals};
use crate::Rejection;

/// One cart line. Invariant: `1 <= quantity <= available_stock` of the item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CartLine {
    pub item_id: String,
    pub quantity: u32,
}

#[derive(Clone, Debug)]
pub struct Cart {
    id: String,
    catalog: Arc<CatalogSnapshot>,
    lines: Vec<CartLine>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Cart {
    pub fn new(catalog: Arc<CatalogSnapshot>) -> Self {
        Self { id: Uuid::new_v4().to_string(), catalog, lines: vec![], created_at: Utc::now(), updated_at: Utc::now() }
    }

    pub fn id(&self) -> &str { &self.id }
    pub fn catalog(&self) -> &CatalogSnapshot { &self.catalog }
    pub fn lines(&self) -> &[CartLine] { &self.lines }
    pub fn line_count(&self) -> usize { self.lines.len() }
    pub fn item_count(&self) -> u32 { self.lines.iter().map(|l| l.quantity).sum() }
    pub fn is_empty(&self) -> bool { self.lines.is_empty() }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    pub fn quantity_of(&self, item_id: &str) -> Option<u32> {
        self.lines.iter().find(|l| l.item_id == item_id).map(|l| l.quantity)
    }

    /// Lines joined with their catalog entries.
    pub fn priced_lines(&self) -> impl Iterator<Item = (&CartLine, &CatalogItem)> {
        self.lines.iter().filter_map(|l| self.catalog.find_by_id(&l.item_id).map(|item| (l, item)))
    }

    pub fn totals(&self, rules: &PricingRules) -> Totals { Totals::compute(self, rules) }

    /// Adds `requested` units, merging with an existing line. The resulting
    /// quantity is clamped to stock; an item with no stock never enters.
    /// Returns the line's new quantity.
    pub fn add(&mut self, item_id: &str, requested: u32) -> Result<u32, Rejection> {
        let item = self.catalog.find_by_id(item_id).ok_or_else(|| Rejection::UnknownItem(item_id.to_string()))?;
        let stock = item.available_stock;
        if stock == 0 {
            return Err(Rejection::OutOfStock { item_id: item_id.to_string() });
        }
        let requested = requested.max(1);

        let quantity = match self.lines.iter_mut().find(|l| l.item_id == item_id) {
            Some(existing) => {
                existing.quantity = existing.quantity.saturating_add(requested).min(stock);
                existing.quantity
            }
            None => {
                let quantity = requested.min(stock);
                self.lines.push(CartLine { item_id: item_id.to_string(), quantity });
                quantity
            }
        };
        self.touch();
        Ok(quantity)
    }

    /// Sets a line's quantity. Zero removes the line; anything above stock is
    /// refused outright rather than clamped.
    pub fn set_quantity(&mut self, item_id: &str, quantity: u32) -> Result<(), Rejection> {
        if quantity < 1 {
            self.remove(item_id);
            return Ok(());
        }
        let available = self
            .catalog
            .find_by_id(item_id)
            .map(|i| i.available_stock)
            .ok_or_else(|| Rejection::UnknownItem(item_id.to_string()))?;
        if quantity > available {
            return Err(Rejection::ExceedsStock { item_id: item_id.to_string(), requested: quantity, available });
        }

        match self.lines.iter_mut().find(|l| l.item_id == item_id) {
            Some(line) => line.quantity = quantity,
            None => self.lines.push(CartLine { item_id: item_id.to_string(), quantity }),
        }
        self.touch();
        Ok(())
    }

    /// Idempotent.
    pub fn remove(&mut self, item_id: &str) {
        let before = self.lines.len();
        self.lines.retain(|l| l.item_id != item_id);
        if self.lines.len() != before { self.touch(); }
    }

    pub fn clear(&mut self) {
        if !self.lines.is_empty() { self.lines.clear(); self.touch(); }
    }

    /// Swaps in a freshly fetched snapshot and re-applies the stock bound:
    /// lines above their new stock are clamped, lines whose item vanished or
    /// ran out are dropped.
    pub fn refresh_catalog(&mut self, catalog: Arc<CatalogSnapshot>) {
        self.lines.retain_mut(|line| match catalog.find_by_id(&line.item_id) {
            Some(item) if item.available_stock > 0 => {
                line.quantity = line.quantity.min(item.available_stock);
                true
            }
            _ => false,
        });
        self.catalog = catalog;
        self.touch();
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}
