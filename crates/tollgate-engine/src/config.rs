//! Engine configuration
//!
//! Merchant-level currency table and per-currency credit settings, loaded once
//! from JSON and shared read-only by every computation.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use tollgate_common::Currency;

use crate::{BillingError, BillingResult};

/// Engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Merchant currency table, one entry per default currency
    pub currencies: Vec<MerchantCurrencyConfig>,
    /// Credit settings per currency
    pub credits: Vec<CreditCurrencyConfig>,
}

impl EngineConfig {
    /// Parse and validate a JSON configuration document
    pub fn from_json_str(json: &str) -> BillingResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> BillingResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            BillingError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_json_str(&raw)?;
        tracing::info!(
            path = %path.display(),
            currencies = config.currencies.len(),
            "engine config loaded"
        );
        Ok(config)
    }

    /// Reject non-positive rates, self-exchange and duplicate currency pairs
    pub fn validate(&self) -> BillingResult<()> {
        let mut pairs = HashSet::new();
        for merchant in &self.currencies {
            for entry in &merchant.exchanges {
                if entry.rate <= Decimal::ZERO {
                    return Err(BillingError::Config(format!(
                        "exchange rate {} -> {} must be positive, got {}",
                        merchant.default_currency, entry.target_currency, entry.rate
                    )));
                }
                if entry.target_currency == merchant.default_currency {
                    return Err(BillingError::Config(format!(
                        "exchange entry maps {} to itself",
                        merchant.default_currency
                    )));
                }
                let pair = (merchant.default_currency.clone(), entry.target_currency.clone());
                if !pairs.insert(pair) {
                    return Err(BillingError::Config(format!(
                        "duplicate exchange entry {} -> {}",
                        merchant.default_currency, entry.target_currency
                    )));
                }
            }
        }

        let mut credit_currencies = HashSet::new();
        for credit in &self.credits {
            if !credit_currencies.insert(credit.currency.clone()) {
                return Err(BillingError::Config(format!(
                    "duplicate credit config for {}",
                    credit.currency
                )));
            }
        }
        Ok(())
    }

    /// Exchange entry for `from -> to`, if configured
    pub fn exchange_entry(&self, from: &Currency, to: &Currency) -> Option<&ExchangeRateEntry> {
        self.currencies
            .iter()
            .filter(|m| &m.default_currency == from)
            .flat_map(|m| m.exchanges.iter())
            .find(|e| &e.target_currency == to)
    }

    /// Credit settings for a currency
    pub fn credit_config(&self, currency: &Currency) -> Option<&CreditCurrencyConfig> {
        self.credits.iter().find(|c| &c.currency == currency)
    }
}

/// Currency table for one merchant default currency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerchantCurrencyConfig {
    /// Currency the merchant prices plans in
    pub default_currency: Currency,
    /// Currencies the default currency may be exchanged to
    #[serde(default)]
    pub exchanges: Vec<ExchangeRateEntry>,
}

/// One configured exchange route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeRateEntry {
    /// Target currency
    pub target_currency: Currency,
    /// Static rate: one minor unit of the default currency in target minor units
    pub rate: Decimal,
    /// Prefer a live rate snapshot when the caller supplies one
    #[serde(default)]
    pub auto_exchange: bool,
    /// Route may be previewed but not charged
    #[serde(default)]
    pub disabled: bool,
}

/// Credit settings for one currency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditCurrencyConfig {
    /// Currency these settings apply to
    pub currency: Currency,
    /// Promo credit and discount codes cannot be combined on one invoice
    #[serde(default)]
    pub promo_exclusive_with_discount_code: bool,
    /// Promo credit may be used at all
    #[serde(default = "default_true")]
    pub promo_credit_enabled: bool,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const SAMPLE: &str = r#"{
        "currencies": [
            {
                "default_currency": "usd",
                "exchanges": [
                    { "target_currency": "EUR", "rate": "0.92" },
                    { "target_currency": "GBP", "rate": "0.79", "disabled": true }
                ]
            }
        ],
        "credits": [
            { "currency": "USD", "promo_exclusive_with_discount_code": true }
        ]
    }"#;

    #[test]
    fn test_parse_sample() {
        let config = EngineConfig::from_json_str(SAMPLE).unwrap();
        let eur = config.exchange_entry(&Currency::USD, &Currency::EUR).unwrap();
        assert_eq!(eur.rate, dec!(0.92));
        assert!(!eur.disabled);
        assert!(!eur.auto_exchange);

        let gbp = config.exchange_entry(&Currency::USD, &Currency::GBP).unwrap();
        assert!(gbp.disabled);

        assert!(config.exchange_entry(&Currency::EUR, &Currency::USD).is_none());

        let credit = config.credit_config(&Currency::USD).unwrap();
        assert!(credit.promo_exclusive_with_discount_code);
        assert!(credit.promo_credit_enabled);
    }

    #[test]
    fn test_empty_config_is_valid() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert!(config.currencies.is_empty());
        assert!(config.credits.is_empty());
    }

    #[test]
    fn test_rejects_non_positive_rate() {
        let json = r#"{"currencies":[{"default_currency":"USD","exchanges":[{"target_currency":"EUR","rate":"0"}]}]}"#;
        assert!(matches!(
            EngineConfig::from_json_str(json),
            Err(BillingError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_duplicate_pair() {
        let json = r#"{"currencies":[
            {"default_currency":"USD","exchanges":[{"target_currency":"EUR","rate":"0.9"}]},
            {"default_currency":"usd","exchanges":[{"target_currency":"eur","rate":"0.8"}]}
        ]}"#;
        assert!(matches!(
            EngineConfig::from_json_str(json),
            Err(BillingError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(matches!(
            EngineConfig::from_json_str("{ not json"),
            Err(BillingError::ConfigParse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            EngineConfig::from_file("/nonexistent/tollgate.json"),
            Err(BillingError::Config(_))
        ));
    }
}
