//! Configuration for the ordering workflow.
//!
//! Defaults match the storefront's published prices; every value can be
//! overridden from the environment (a `.env` file is honoured by the binary).

use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;
use crate::domain::pricing::PricingRules;
use crate::{OrderingError, Result};

#[derive(Debug, Clone)]
pub struct OrderingConfig {
    pub currency: String,
    pub tax_rate: Decimal,
    pub free_shipping_threshold: Decimal,
    pub flat_shipping_fee: Decimal,
    /// Payee submissions allowed per checkout before it fails for good.
    pub max_payment_attempts: u32,
    /// Upper bound on waiting for the payment provider.
    pub confirmation_timeout: Duration,
    /// HTTP checkout sessions untouched for this long are dropped.
    pub session_idle_timeout: Duration,
    /// Open HTTP checkout sessions allowed at once.
    pub max_sessions: usize,
    /// Catalog name the chat extractor uses when nothing matches.
    pub fallback_product: Option<String>,
    pub mpesa: MpesaConfig,
}

impl Default for OrderingConfig {
    fn default() -> Self {
        let pricing = PricingRules::default();
        Self {
            currency: pricing.currency,
            tax_rate: pricing.tax_rate,
            free_shipping_threshold: pricing.free_shipping_threshold,
            flat_shipping_fee: pricing.flat_shipping_fee,
            max_payment_attempts: 3,
            confirmation_timeout: Duration::from_secs(30),
            session_idle_timeout: Duration::from_secs(30 * 60),
            max_sessions: 10_000,
            fallback_product: None,
            mpesa: MpesaConfig::default(),
        }
    }
}

/// Daraja (M-Pesa) credentials. Without a consumer key the binary uses the
/// simulated gateway.
#[derive(Debug, Clone)]
pub struct MpesaConfig {
    pub consumer_key: Option<String>,
    pub consumer_secret: Option<String>,
    pub business_shortcode: String,
    pub passkey: Option<String>,
    pub callback_url: String,
    pub environment: MpesaEnvironment,
    /// Delay between STK push status queries.
    pub poll_interval: Duration,
}

impl Default for MpesaConfig {
    fn default() -> Self {
        Self {
            consumer_key: None,
            consumer_secret: None,
            business_shortcode: "174379".to_string(),
            passkey: None,
            callback_url: "https://localhost/api/v1/mpesa/callback".to_string(),
            environment: MpesaEnvironment::Sandbox,
            poll_interval: Duration::from_secs(3),
        }
    }
}

impl MpesaConfig {
    pub fn is_configured(&self) -> bool {
        self.consumer_key.is_some() && self.consumer_secret.is_some() && self.passkey.is_some()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MpesaEnvironment {
    #[default]
    Sandbox,
    Production,
}

impl MpesaEnvironment {
    pub fn base_url(&self) -> &'static str {
        match self {
            Self::Sandbox => "https://sandbox.safaricom.co.ke",
            Self::Production => "https://api.safaricom.co.ke",
        }
    }
}

impl OrderingConfig {
    /// Reads `ORDERING_*` and `MPESA_*` variables over the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = lookup("ORDERING_CURRENCY") { config.currency = v.trim().to_uppercase(); }
        if let Some(v) = lookup("ORDERING_TAX_RATE") { config.tax_rate = parse("ORDERING_TAX_RATE", &v)?; }
        if let Some(v) = lookup("ORDERING_FREE_SHIPPING_THRESHOLD") { config.free_shipping_threshold = parse("ORDERING_FREE_SHIPPING_THRESHOLD", &v)?; }
        if let Some(v) = lookup("ORDERING_FLAT_SHIPPING_FEE") { config.flat_shipping_fee = parse("ORDERING_FLAT_SHIPPING_FEE", &v)?; }
        if let Some(v) = lookup("ORDERING_MAX_PAYMENT_ATTEMPTS") { config.max_payment_attempts = parse("ORDERING_MAX_PAYMENT_ATTEMPTS", &v)?; }
        if let Some(v) = lookup("ORDERING_CONFIRMATION_TIMEOUT_SECS") {
            config.confirmation_timeout = Duration::from_secs(parse("ORDERING_CONFIRMATION_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("ORDERING_SESSION_IDLE_SECS") {
            config.session_idle_timeout = Duration::from_secs(parse("ORDERING_SESSION_IDLE_SECS", &v)?);
        }
        if let Some(v) = lookup("ORDERING_MAX_SESSIONS") { config.max_sessions = parse("ORDERING_MAX_SESSIONS", &v)?; }
        config.fallback_product = lookup("ORDERING_FALLBACK_PRODUCT").filter(|v| !v.trim().is_empty());

        config.mpesa.consumer_key = lookup("MPESA_CONSUMER_KEY");
        config.mpesa.consumer_secret = lookup("MPESA_CONSUMER_SECRET");
        config.mpesa.passkey = lookup("MPESA_PASSKEY");
        if let Some(v) = lookup("MPESA_BUSINESS_SHORTCODE") { config.mpesa.business_shortcode = v; }
        if let Some(v) = lookup("MPESA_CALLBACK_URL") { config.mpesa.callback_url = v; }
        if let Some(v) = lookup("MPESA_POLL_INTERVAL_SECS") {
            config.mpesa.poll_interval = Duration::from_secs(parse("MPESA_POLL_INTERVAL_SECS", &v)?);
        }
        if let Some(v) = lookup("MPESA_ENVIRONMENT") {
            config.mpesa.environment = match v.trim().to_ascii_lowercase().as_str() {
                "sandbox" => MpesaEnvironment::Sandbox,
                "production" => MpesaEnvironment::Production,
                other => return Err(OrderingError::Config(format!("MPESA_ENVIRONMENT: unknown environment '{other}'"))),
            };
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tax_rate.is_sign_negative() || self.tax_rate > Decimal::ONE {
            return Err(OrderingError::Config(format!("tax rate {} outside 0..=1", self.tax_rate)));
        }
        if self.flat_shipping_fee.is_sign_negative() || self.free_shipping_threshold.is_sign_negative() {
            return Err(OrderingError::Config("shipping amounts must not be negative".into()));
        }
        if self.max_payment_attempts == 0 {
            return Err(OrderingError::Config("max payment attempts must be at least 1".into()));
        }
        if self.confirmation_timeout.is_zero() {
            return Err(OrderingError::Config("confirmation timeout must be greater than zero".into()));
        }
        if self.session_idle_timeout.is_zero() || self.max_sessions == 0 {
            return Err(OrderingError::Config("session idle timeout and session limit must be greater than zero".into()));
        }
        if self.mpesa.poll_interval.is_zero() {
            return Err(OrderingError::Config("M-Pesa poll interval must be greater than zero".into()));
        }
        Ok(())
    }

    pub fn pricing(&self) -> PricingRules {
        PricingRules {
            currency: self.currency.clone(),
            tax_rate: self.tax_rate,
            free_shipping_threshold: self.free_shipping_threshold,
            flat_shipping_fee: self.flat_shipping_fee,
        }
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| OrderingError::Config(format!("{key}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = OrderingConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.tax_rate, Decimal::new(16, 2));
        assert_eq!(config.free_shipping_threshold, Decimal::new(50, 0));
        assert_eq!(config.flat_shipping_fee, Decimal::new(599, 2));
        assert_eq!(config.max_payment_attempts, 3);
        assert!(!config.mpesa.is_configured());
        assert_eq!(config.pricing(), PricingRules::default());
    }

    #[test]
    fn test_overrides() {
        let config = OrderingConfig::from_lookup(lookup(&[
            ("ORDERING_TAX_RATE", "0.08"),
            ("ORDERING_CURRENCY", "usd"),
            ("ORDERING_CONFIRMATION_TIMEOUT_SECS", "5"),
            ("MPESA_ENVIRONMENT", "production"),
        ]))
        .unwrap();
        assert_eq!(config.tax_rate, Decimal::new(8, 2));
        assert_eq!(config.currency, "USD");
        assert_eq!(config.confirmation_timeout, Duration::from_secs(5));
        assert_eq!(config.mpesa.environment.base_url(), "https://api.safaricom.co.ke");
    }

    #[test]
    fn test_invalid_values() {
        assert!(OrderingConfig::from_lookup(lookup(&[("ORDERING_TAX_RATE", "lots")])).is_err());
        assert!(OrderingConfig::from_lookup(lookup(&[("ORDERING_TAX_RATE", "1.5")])).is_err());
        assert!(OrderingConfig::from_lookup(lookup(&[("ORDERING_MAX_PAYMENT_ATTEMPTS", "0")])).is_err());
        assert!(OrderingConfig::from_lookup(lookup(&[("MPESA_ENVIRONMENT", "staging")])).is_err());
    }

    #[test]
    fn test_zero_durations_rejected() {
        let err = OrderingConfig::from_lookup(lookup(&[("ORDERING_CONFIRMATION_TIMEOUT_SECS", "0")])).unwrap_err();
        assert!(matches!(err, OrderingError::Config(ref m) if m.contains("confirmation timeout")));
        assert!(OrderingConfig::from_lookup(lookup(&[("ORDERING_SESSION_IDLE_SECS", "0")])).is_err());
        assert!(OrderingConfig::from_lookup(lookup(&[("ORDERING_MAX_SESSIONS", "0")])).is_err());
        assert!(OrderingConfig::from_lookup(lookup(&[("MPESA_POLL_INTERVAL_SECS", "0")])).is_err());

        let config = OrderingConfig { confirmation_timeout: Duration::ZERO, ..OrderingConfig::default() };
        assert!(config.validate().is_err());
        assert!(OrderingConfig::default().validate().is_ok());
    }
}
