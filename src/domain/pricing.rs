//! Totals derivation

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use crate::domain::aggregates::Cart;
use crate::domain::value_objects::Money;

/// Tax and shipping constants. Built from [`crate::OrderingConfig`] so the
/// numbers live in one place.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingRules {
    pub currency: String,
    pub tax_rate: Decimal,
    pub free_shipping_threshold: Decimal,
    pub flat_shipping_fee: Decimal,
}

impl Default for PricingRules {
    fn default() -> Self {
        Self {
            currency: "KES".to_string(),
            tax_rate: Decimal::new(16, 2),
            free_shipping_threshold: Decimal::new(50, 0),
            flat_shipping_fee: Decimal::new(599, 2),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal: Money,
    pub tax_amount: Money,
    pub shipping_fee: Money,
    pub grand_total: Money,
}

impl Totals {
    /// Derives totals from the cart's current lines and its catalog snapshot.
    /// Nothing is cached: call it again after every mutation.
    pub fn compute(cart: &Cart, rules: &PricingRules) -> Self {
        let subtotal = cart
            .priced_lines()
            .map(|(line, item)| item.unit_price.amount() * Decimal::from(line.quantity))
            .sum::<Decimal>();
        Self::from_subtotal(subtotal, rules)
    }

    pub fn from_subtotal(subtotal: Decimal, rules: &PricingRules) -> Self {
        let subtotal = Money::new(subtotal, &rules.currency);
        let tax_amount = subtotal.percent(rules.tax_rate);
        let shipping = if subtotal.amount() >= rules.free_shipping_threshold { Decimal::ZERO } else { rules.flat_shipping_fee };
        let shipping_fee = Money::new(shipping, &rules.currency);
        let grand_total = Money::new(subtotal.amount() + tax_amount.amount() + shipping_fee.amount(), &rules.currency);
        Self { subtotal, tax_amount, shipping_fee, grand_total }
    }

    pub fn is_free_shipping(&self) -> bool { self.shipping_fee.is_zero() }
}
