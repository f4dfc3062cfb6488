//! Keyword-based intent classification.

use serde::Serialize;
use crate::intake::product::tokens;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    CreateOrder,
    Search,
    StatusUpdate,
    /// Nothing recognised; answer with help.
    Unrecognized,
}

/// Checked top to bottom, first group with a hit wins. Creation must stay
/// ahead of search, and search ahead of status.
pub const KEYWORD_GROUPS: &[(Intent, &[&str])] = &[
    (Intent::CreateOrder, &["create", "new", "place", "buy", "purchase", "want", "wants", "need", "needs", "like", "add", "nataka", "nahitaji", "nipe"]),
    (Intent::Search, &["find", "search", "show", "list", "lookup", "look", "browse", "products", "available", "stock"]),
    (Intent::StatusUpdate, &["status", "update", "mark", "approve", "approved", "deliver", "delivered", "ship", "shipped", "track", "cancel"]),
];

pub fn classify(text: &str) -> Intent {
    let words = tokens(text);
    KEYWORD_GROUPS
        .iter()
        .find(|(_, keywords)| words.iter().any(|w| keywords.contains(&w.as_str())))
        .map_or(Intent::Unrecognized, |(intent, _)| *intent)
}
