//! Quantities in free text.

use once_cell::sync::Lazy;
use regex::Regex;

static WITH_UNIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{1,6})\s*(bags?|units?|pieces?|pcs|kgs?)\b").expect("quantity-with-unit pattern")
});

static BARE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{1,6})\b").expect("bare quantity pattern"));

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuantityMatch {
    pub value: u32,
    /// Normalised singular unit (`bag`, `unit`, `piece`, `kg`) when one followed the number.
    pub unit: Option<&'static str>,
}

/// A number followed by a unit word wins, even over an earlier bare number:
/// "shop 12: 5 bags" reads as 5, not 12. Without a unit-qualified number
/// the first standalone integer is used. Zero is not a quantity.
pub fn extract(text: &str) -> Option<QuantityMatch> {
    let with_unit = WITH_UNIT.captures_iter(text).find_map(|c| {
        let value = c.get(1)?.as_str().parse::<u32>().ok().filter(|v| *v > 0)?;
        Some(QuantityMatch { value, unit: c.get(2).map(|u| normalise_unit(u.as_str())) })
    });
    with_unit.or_else(|| {
        BARE.captures_iter(text).find_map(|c| {
            let value = c.get(1)?.as_str().parse::<u32>().ok().filter(|v| *v > 0)?;
            Some(QuantityMatch { value, unit: None })
        })
    })
}

fn normalise_unit(raw: &str) -> &'static str {
    match raw.to_ascii_lowercase().as_str() {
        "bag" | "bags" => "bag",
        "unit" | "units" => "unit",
        "piece" | "pieces" | "pcs" => "piece",
        _ => "kg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_word() {
        assert_eq!(extract("wants 3 bags of sugar"), Some(QuantityMatch { value: 3, unit: Some("bag") }));
        assert_eq!(extract("10kg rice"), Some(QuantityMatch { value: 10, unit: Some("kg") }));
        assert_eq!(extract("4 PCS soap"), Some(QuantityMatch { value: 4, unit: Some("piece") }));
    }

    #[test]
    fn test_unit_word_beats_earlier_number() {
        assert_eq!(extract("for shop 12: 5 bags flour").unwrap().value, 5);
        assert_eq!(extract("order 2 now, make it 9 bags"), Some(QuantityMatch { value: 9, unit: Some("bag") }));
    }

    #[test]
    fn test_bare_number() {
        assert_eq!(extract("I need 7 sugar"), Some(QuantityMatch { value: 7, unit: None }));
    }

    #[test]
    fn test_missing_or_zero() {
        assert_eq!(extract("some sugar please"), None);
        assert_eq!(extract("0 bags"), None);
        assert_eq!(extract("Sugar 2kg"), Some(QuantityMatch { value: 2, unit: Some("kg") }));
    }
}
