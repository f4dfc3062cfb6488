//! Value Objects for ordering

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Money value object
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money { amount: Decimal, currency: String }

impl Money {
    pub fn new(amount: Decimal, currency: &str) -> Self { Self { amount, currency: currency.to_uppercase() } }
    pub fn kes(amount: Decimal) -> Self { Self::new(amount, "KES") }
    pub fn zero(currency: &str) -> Self { Self::new(Decimal::ZERO, currency) }
    pub fn amount(&self) -> Decimal { self.amount }
    pub fn currency(&self) -> &str { &self.currency }
    pub fn is_zero(&self) -> bool { self.amount.is_zero() }
    pub fn add(&self, other: &Money) -> Result<Money, MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch { left: self.currency.clone(), right: other.currency.clone() });
        }
        Ok(Money::new(self.amount + other.amount, &self.currency))
    }
    pub fn multiply(&self, qty: u32) -> Money { Money::new(self.amount * Decimal::from(qty), &self.currency) }

    /// Scales by `rate` and rounds to cents, midpoint away from zero.
    pub fn percent(&self, rate: Decimal) -> Money {
        Money::new(round_cents(self.amount * rate), &self.currency)
    }
}

impl Default for Money { fn default() -> Self { Self::zero("KES") } }

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.currency, self.amount.round_dp(2))
    }
}

pub(crate) fn round_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("currency mismatch: {left} vs {right}")]
    CurrencyMismatch { left: String, right: String },
}

/// Mobile-money payee number, normalised to the `254XXXXXXXXX` form the
/// provider expects.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Accepts `+254…`, `254…`, `07…`/`01…` and bare `7…`/`1…` numbers.
    /// Spaces, dashes, dots and parentheses are ignored.
    pub fn parse(raw: &str) -> Result<Self, PhoneNumberError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() { return Err(PhoneNumberError::Empty); }

        let cleaned: String = trimmed.chars().filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')')).collect();
        let digits = cleaned.strip_prefix('+').unwrap_or(&cleaned);
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(PhoneNumberError::Malformed(raw.to_string()));
        }

        let subscriber = match digits.len() {
            12 if digits.starts_with("254") => &digits[3..],
            10 if digits.starts_with('0') => &digits[1..],
            9 => digits,
            _ => return Err(PhoneNumberError::Malformed(raw.to_string())),
        };
        if !(subscriber.starts_with('7') || subscriber.starts_with('1')) {
            return Err(PhoneNumberError::Malformed(raw.to_string()));
        }
        Ok(Self(format!("254{subscriber}")))
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

impl TryFrom<String> for PhoneNumber {
    type Error = PhoneNumberError;
    fn try_from(value: String) -> Result<Self, Self::Error> { Self::parse(&value) }
}

impl From<PhoneNumber> for String {
    fn from(value: PhoneNumber) -> Self { value.0 }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhoneNumberError {
    #[error("phone number is empty")]
    Empty,
    #[error("'{0}' is not a valid mobile number")]
    Malformed(String),
}
