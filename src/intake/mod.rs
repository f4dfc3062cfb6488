//! Conversational order intake.
//!
//! Turns a chat message into a best-effort order candidate. Each field comes
//! from its own extractor ([`payee`], [`quantity`], [`product`], [`intent`])
//! and falls back to a default when nothing matches, so [`OrderExtractor::analyze`]
//! always produces an [`Extraction`] for any input.

pub mod intent;
pub mod payee;
pub mod product;
pub mod quantity;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::aggregates::{OrderLine, OrderRecord, PaymentChannel, PaymentStatus};
use crate::domain::catalog::{CatalogItem, CatalogSnapshot};
use crate::store::OrderStore;
use crate::{Rejection, Result};

pub use intent::Intent;
pub use product::{MatchKind, ProductMatch};

/// Stored as the payee when the message carried no phone number.
pub const PLACEHOLDER_PAYEE: &str = "N/A";

const DEFAULT_QUANTITY: u32 = 1;
const SUGGESTIONS: usize = 5;

static ORDER_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bORD-\d{8}\b").expect("order number pattern"));

/// A field value and whether it was read from the text or substituted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "source", content = "value", rename_all = "snake_case")]
pub enum Extracted<T> {
    Found(T),
    Defaulted(T),
}

impl<T> Extracted<T> {
    pub fn value(&self) -> &T {
        match self { Self::Found(v) | Self::Defaulted(v) => v }
    }

    pub fn into_value(self) -> T {
        match self { Self::Found(v) | Self::Defaulted(v) => v }
    }

    pub fn is_found(&self) -> bool { matches!(self, Self::Found(_)) }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Availability {
    InStock,
    Insufficient { available: u32 },
    OutOfStock,
}

impl Availability {
    pub fn of(item: &CatalogItem, quantity: u32) -> Self {
        match item.available_stock {
            0 => Self::OutOfStock,
            available if available < quantity => Self::Insufficient { available },
            _ => Self::InStock,
        }
    }
}

/// A pending chat order that has not been stored yet.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OrderCandidate {
    pub record: OrderRecord,
    pub availability: Availability,
}

impl OrderCandidate {
    /// One line, priced at the item's unit price. Chat orders carry no tax or
    /// shipping; those are settled when the order is fulfilled.
    pub fn new(item: &CatalogItem, quantity: u32, payee: &str) -> Self {
        let line = OrderLine { item_id: item.id.clone(), name: item.name.clone(), quantity, unit_price: item.unit_price.clone() };
        let total = line.line_total();
        let record = OrderRecord::create(vec![line], total, PaymentChannel::Chat, PaymentStatus::Pending).with_payee(payee);
        Self { record, availability: Availability::of(item, quantity) }
    }

    /// Appends the record. Candidates that exceed stock are refused.
    pub async fn commit(self, store: &dyn OrderStore) -> Result<Uuid> {
        let Some(line) = self.record.lines.first() else {
            return Err(Rejection::EmptyCart.into());
        };
        match self.availability {
            Availability::InStock => {}
            Availability::OutOfStock => return Err(Rejection::OutOfStock { item_id: line.item_id.clone() }.into()),
            Availability::Insufficient { available } => {
                return Err(Rejection::ExceedsStock { item_id: line.item_id.clone(), requested: line.quantity, available }.into());
            }
        }
        store.append(self.record).await
    }
}

/// What the assistant says back.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatReply {
    ProductAvailable { name: String, quantity: u32, total: String },
    NeedProduct { suggestions: Vec<String> },
    OutOfStock { name: String },
    InsufficientStock { name: String, available: u32, requested: u32 },
    Search { matches: Vec<String> },
    Status { order_number: Option<String> },
    Help,
}

impl ChatReply {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProductAvailable { .. } => "product_available",
            Self::NeedProduct { .. } => "need_product",
            Self::OutOfStock { .. } => "out_of_stock",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::Search { .. } => "search",
            Self::Status { .. } => "status",
            Self::Help => "help",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::ProductAvailable { name, quantity, total } => {
                format!("Perfect! {name} is available. I can order {quantity} for you at {total}. Shall I proceed?")
            }
            Self::NeedProduct { suggestions } if suggestions.is_empty() => {
                "Please tell me which product you'd like. No products are available at the moment.".to_string()
            }
            Self::NeedProduct { suggestions } => {
                format!("Please tell me which product you'd like and how many. Available now: {}.", join_names(suggestions))
            }
            Self::OutOfStock { name } => format!("I'm sorry, {name} is currently out of stock."),
            Self::InsufficientStock { name, available, .. } => {
                format!("I'm sorry, we only have {available} of {name} available. Would you like to order {available} instead?")
            }
            Self::Search { matches } if matches.is_empty() => "Nothing matching is in stock right now.".to_string(),
            Self::Search { matches } => format!("Here is what we have: {}.", join_names(matches)),
            Self::Status { order_number: Some(number) } => {
                format!("I've noted your request about {number}. The fulfilment team will update its status.")
            }
            Self::Status { order_number: None } => {
                "Which order is this about? Please share the order number, e.g. ORD-12345678.".to_string()
            }
            Self::Help => {
                "I'd be happy to help you order! Tell me the product and how many, for example 'I want 2 bags of rice'.".to_string()
            }
        }
    }
}

/// `a`, `a and b`, `a, b, and c`.
fn join_names(names: &[String]) -> String {
    match names {
        [] => String::new(),
        [one] => one.clone(),
        [a, b] => format!("{a} and {b}"),
        [init @ .., last] => format!("{}, and {last}", init.join(", ")),
    }
}

/// Everything read from one message.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Extraction {
    pub intent: Intent,
    pub payee: Extracted<String>,
    pub quantity: Extracted<u32>,
    pub unit: Option<&'static str>,
    pub product: Option<ProductMatch>,
    /// Present only for order-creation messages that resolved to an item.
    pub candidate: Option<OrderCandidate>,
    pub reply: ChatReply,
}

impl Extraction {
    pub fn is_order(&self) -> bool { self.candidate.is_some() }
}

#[derive(Clone, Debug)]
pub struct OrderExtractor {
    catalog: Arc<CatalogSnapshot>,
    fallback: Option<CatalogItem>,
}

impl OrderExtractor {
    /// `fallback` names the item used when a message mentions no known
    /// product, by id or by name. Unset or unknown means the first catalog item.
    pub fn new(catalog: Arc<CatalogSnapshot>, fallback: Option<&str>) -> Self {
        let configured = fallback.and_then(|key| catalog.find_by_id(key).or_else(|| catalog.find_by_name(key)));
        if let (Some(key), None) = (fallback, configured) {
            tracing::warn!(fallback = key, "fallback product not in catalog, using first item");
        }
        let fallback = configured.or_else(|| catalog.items().first()).cloned();
        Self { catalog, fallback }
    }

    pub fn catalog(&self) -> &CatalogSnapshot { &self.catalog }
    pub fn fallback(&self) -> Option<&CatalogItem> { self.fallback.as_ref() }

    pub fn analyze(&self, text: &str) -> Extraction {
        let intent = intent::classify(text);

        let found_payee = payee::extract(text);
        let remainder = match &found_payee {
            Some(m) => {
                let mut rest = text.to_string();
                rest.replace_range(m.span.clone(), " ");
                rest
            }
            None => text.to_string(),
        };
        let payee = match found_payee {
            Some(m) => Extracted::Found(m.value),
            None => Extracted::Defaulted(PLACEHOLDER_PAYEE.to_string()),
        };

        let found_quantity = quantity::extract(&remainder);
        let unit = found_quantity.as_ref().and_then(|q| q.unit);
        let quantity = match found_quantity {
            Some(q) => Extracted::Found(q.value),
            None => Extracted::Defaulted(DEFAULT_QUANTITY),
        };

        let product = product::resolve(&remainder, &self.catalog).or_else(|| {
            self.fallback.clone().map(|item| ProductMatch { item, kind: MatchKind::Fallback })
        });

        let candidate = match (&intent, &product) {
            (Intent::CreateOrder, Some(m)) => Some(OrderCandidate::new(&m.item, *quantity.value(), payee.value())),
            _ => None,
        };

        let reply = self.reply(intent, text, product.as_ref(), *quantity.value());
        tracing::debug!(
            intent = ?intent,
            reply = reply.kind(),
            product = product.as_ref().map(|m| m.item.id.as_str()),
            quantity = *quantity.value(),
            "chat message analyzed"
        );

        Extraction { intent, payee, quantity, unit, product, candidate, reply }
    }

    fn reply(&self, intent: Intent, text: &str, product: Option<&ProductMatch>, quantity: u32) -> ChatReply {
        match intent {
            Intent::CreateOrder => match product {
                Some(m) if m.kind != MatchKind::Fallback => match Availability::of(&m.item, quantity) {
                    Availability::OutOfStock => ChatReply::OutOfStock { name: m.item.name.clone() },
                    Availability::Insufficient { available } => {
                        ChatReply::InsufficientStock { name: m.item.name.clone(), available, requested: quantity }
                    }
                    Availability::InStock => ChatReply::ProductAvailable {
                        name: m.item.name.clone(),
                        quantity,
                        total: m.item.unit_price.multiply(quantity).to_string(),
                    },
                },
                _ => ChatReply::NeedProduct { suggestions: self.suggestions() },
            },
            Intent::Search => {
                let matches = match product {
                    Some(m) if m.kind != MatchKind::Fallback => {
                        vec![format!("{} ({} in stock at {})", m.item.name, m.item.available_stock, m.item.unit_price)]
                    }
                    _ => self.suggestions(),
                };
                ChatReply::Search { matches }
            }
            Intent::StatusUpdate => ChatReply::Status {
                order_number: ORDER_NUMBER.find(text).map(|m| m.as_str().to_ascii_uppercase()),
            },
            Intent::Unrecognized => ChatReply::Help,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        self.catalog.sample(SUGGESTIONS).into_iter().map(|i| i.name.clone()).collect()
    }
}
