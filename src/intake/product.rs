//! Resolving a catalog item from free text.

use serde::Serialize;
use crate::domain::catalog::{CatalogItem, CatalogSnapshot};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// The first word of the item's name appears in the text.
    FirstWord,
    /// Some other significant word of the name appears.
    NameWord,
    /// Nothing matched; the configured fallback item was used.
    Fallback,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProductMatch {
    pub item: CatalogItem,
    pub kind: MatchKind,
}

/// Lower-cased alphanumeric tokens.
pub(crate) fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// A name word counts when it has at least three letters; sizes like `2kg`
/// and numbers are ignored.
fn significant(word: &str) -> bool {
    word.chars().filter(|c| c.is_alphabetic()).count() >= 3 && !word.chars().any(|c| c.is_ascii_digit())
}

/// `sugar` matches `sugar` and `sugars`, not `brownsugar` or `price` for `rice`.
fn mentions(text_tokens: &[String], word: &str) -> bool {
    text_tokens.iter().any(|t| t.starts_with(word))
}

/// Matches whole message tokens by prefix rather than raw substrings, so
/// "brownsugar" does not pick "Sugar 2kg". Catalog order decides ties.
pub fn resolve(text: &str, catalog: &CatalogSnapshot) -> Option<ProductMatch> {
    let text_tokens = tokens(text);
    if text_tokens.is_empty() { return None; }

    let first_word = catalog.items().iter().find(|item| {
        tokens(&item.name).first().is_some_and(|w| mentions(&text_tokens, w))
    });
    if let Some(item) = first_word {
        return Some(ProductMatch { item: item.clone(), kind: MatchKind::FirstWord });
    }

    catalog
        .items()
        .iter()
        .find(|item| tokens(&item.name).iter().skip(1).filter(|w| significant(w)).any(|w| mentions(&text_tokens, w)))
        .map(|item| ProductMatch { item: item.clone(), kind: MatchKind::NameWord })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::demo_items;

    fn catalog() -> CatalogSnapshot { CatalogSnapshot::new(demo_items("KES")) }

    #[test]
    fn test_first_word_match() {
        let m = resolve("Customer wants 3 bags of SUGAR", &catalog()).unwrap();
        assert_eq!(m.item.name, "Sugar 2kg");
        assert_eq!(m.kind, MatchKind::FirstWord);
    }

    #[test]
    fn test_other_name_word() {
        let m = resolve("5 pishori please", &catalog()).unwrap();
        assert_eq!(m.item.id, "RIC-5KG");
        assert_eq!(m.kind, MatchKind::NameWord);

        assert_eq!(resolve("need flour", &catalog()).unwrap().item.id, "FLR-2KG");
    }

    #[test]
    fn test_no_partial_word_hits() {
        assert_eq!(resolve("what is the price", &catalog()), None);
        assert_eq!(resolve("brownsugar x3", &catalog()), None);
        assert_eq!(resolve("", &catalog()), None);
    }

    #[test]
    fn test_plural() {
        assert_eq!(resolve("2 soaps", &catalog()).unwrap().item.id, "SOAP-1KG");
    }
}
