//! Phone-number-shaped payee identifiers in free text.

use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;

/// Optional country code, then a 3-3-4 number with optional parentheses and
/// separators: `+1 (555) 123-4567`, `0712345678`, `254712345678`.
static PHONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+?\d{1,3}[\s.-]?)?\(?\d{3}\)?[\s.-]?\d{3}[\s.-]?\d{4}\b").expect("phone pattern")
});

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PayeeMatch {
    pub value: String,
    pub span: Range<usize>,
}

/// First phone-shaped substring, verbatim.
pub fn extract(text: &str) -> Option<PayeeMatch> {
    PHONE.find(text).map(|m| PayeeMatch { value: m.as_str().trim().to_string(), span: m.range() })
}
