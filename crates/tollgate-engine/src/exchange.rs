//! Currency Exchange Resolver

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tollgate_common::{apply_ratio, Currency, Money};

use crate::config::EngineConfig;
use crate::{BillingError, BillingResult, ComputationMode};

/// Live rate snapshot fetched by the caller for an auto-exchange route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveRate {
    pub from: Currency,
    pub to: Currency,
    pub rate: Decimal,
}

/// Per-plan rate override for converting into `target_currency`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateOverride {
    pub target_currency: Currency,
    pub rate: Decimal,
}

/// Find the override rate for a target currency
pub fn override_for(overrides: &[RateOverride], target: &Currency) -> Option<Decimal> {
    overrides
        .iter()
        .find(|o| &o.target_currency == target)
        .map(|o| o.rate)
}

/// Converts amounts between currencies using the merchant currency table.
///
/// Rate precedence: explicit per-plan override, then a live snapshot for
/// auto-exchange routes, then the static configured rate. A pair with no
/// configured route and no override is never defaulted to 1:1.
#[derive(Debug, Clone, Copy)]
pub struct ExchangeResolver<'a> {
    config: &'a EngineConfig,
    live_rates: &'a [LiveRate],
    mode: ComputationMode,
}

impl<'a> ExchangeResolver<'a> {
    pub fn new(config: &'a EngineConfig, live_rates: &'a [LiveRate], mode: ComputationMode) -> Self {
        Self {
            config,
            live_rates,
            mode,
        }
    }

    pub fn mode(&self) -> ComputationMode {
        self.mode
    }

    /// Convert `amount` into `to`.
    pub fn convert(
        &self,
        amount: &Money,
        to: &Currency,
        explicit_rate: Option<Decimal>,
    ) -> BillingResult<Money> {
        let from = amount.currency();
        if from == to {
            return Ok(amount.clone());
        }

        let rate = self.resolve_rate(from, to, explicit_rate)?;
        let converted = apply_ratio(amount.amount(), rate)?;

        tracing::debug!(
            from = %from,
            to = %to,
            %rate,
            amount = amount.amount(),
            converted,
            "currency converted"
        );
        Ok(Money::new(converted, to.clone()))
    }

    /// Convert a bare minor-unit amount.
    pub fn convert_amount(
        &self,
        amount: i64,
        from: &Currency,
        to: &Currency,
        explicit_rate: Option<Decimal>,
    ) -> BillingResult<i64> {
        Ok(self
            .convert(&Money::new(amount, from.clone()), to, explicit_rate)?
            .amount())
    }

    /// Rate used for `from -> to`; same-currency pairs resolve to one.
    pub fn resolve_rate(
        &self,
        from: &Currency,
        to: &Currency,
        explicit_rate: Option<Decimal>,
    ) -> BillingResult<Decimal> {
        if from == to {
            return Ok(Decimal::ONE);
        }

        let entry = self.config.exchange_entry(from, to);

        if let Some(entry) = entry {
            if entry.disabled && self.mode.is_chargeable() {
                tracing::warn!(from = %from, to = %to, "charge attempted on disabled currency route");
                return Err(BillingError::CurrencyDisabled {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
        }

        let rate = match (explicit_rate, entry) {
            (Some(rate), _) => rate,
            (None, Some(entry)) if entry.auto_exchange => self
                .live_rate(from, to)
                .unwrap_or(entry.rate),
            (None, Some(entry)) => entry.rate,
            (None, None) => {
                return Err(BillingError::CurrencyNotConfigured {
                    from: from.to_string(),
                    to: to.to_string(),
                })
            }
        };

        if rate <= Decimal::ZERO {
            return Err(BillingError::InvalidInput(format!(
                "exchange rate {} -> {} must be positive, got {}",
                from, to, rate
            )));
        }
        Ok(rate)
    }

    fn live_rate(&self, from: &Currency, to: &Currency) -> Option<Decimal> {
        self.live_rates
            .iter()
            .find(|r| &r.from == from && &r.to == to)
            .map(|r| r.rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExchangeRateEntry, MerchantCurrencyConfig};
    use rust_decimal_macros::dec;

    fn config() -> EngineConfig {
        EngineConfig {
            currencies: vec![MerchantCurrencyConfig {
                default_currency: Currency::USD,
                exchanges: vec![
                    ExchangeRateEntry {
                        target_currency: Currency::EUR,
                        rate: dec!(0.92),
                        auto_exchange: false,
                        disabled: false,
                    },
                    ExchangeRateEntry {
                        target_currency: Currency::GBP,
                        rate: dec!(0.79),
                        auto_exchange: false,
                        disabled: true,
                    },
                    ExchangeRateEntry {
                        target_currency: Currency::JPY,
                        rate: dec!(1.5),
                        auto_exchange: true,
                        disabled: false,
                    },
                ],
            }],
            credits: vec![],
        }
    }

    fn usd(amount: i64) -> Money {
        Money::new(amount, Currency::USD)
    }

    #[test]
    fn test_same_currency_unchanged() {
        let config = EngineConfig::default();
        let resolver = ExchangeResolver::new(&config, &[], ComputationMode::Submit);
        let to = Currency::parse("usd").unwrap();
        assert_eq!(resolver.convert(&usd(1234), &to, None).unwrap(), usd(1234));
    }

    #[test]
    fn test_static_rate() {
        let config = config();
        let resolver = ExchangeResolver::new(&config, &[], ComputationMode::Submit);
        let eur = resolver.convert(&usd(1000), &Currency::EUR, None).unwrap();
        assert_eq!(eur, Money::new(920, Currency::EUR));
    }

    #[test]
    fn test_rounds_half_away_from_zero() {
        let config = config();
        let resolver = ExchangeResolver::new(&config, &[], ComputationMode::Submit);
        let eur = resolver
            .convert(&usd(1000), &Currency::EUR, Some(dec!(0.915)))
            .unwrap();
        assert_eq!(eur.amount(), 915);

        // 1 * 0.5 sits exactly on the midpoint
        let half = resolver
            .convert(&usd(1), &Currency::EUR, Some(dec!(0.5)))
            .unwrap();
        assert_eq!(half.amount(), 1);
    }

    #[test]
    fn test_not_configured_is_error() {
        let config = config();
        let resolver = ExchangeResolver::new(&config, &[], ComputationMode::Preview);
        let err = resolver.convert(&usd(1000), &Currency::CAD, None).unwrap_err();
        assert!(matches!(err, BillingError::CurrencyNotConfigured { .. }));

        // reverse direction is not inferred
        let eur = Money::new(1000, Currency::EUR);
        assert!(matches!(
            resolver.convert(&eur, &Currency::USD, None),
            Err(BillingError::CurrencyNotConfigured { .. })
        ));
    }

    #[test]
    fn test_disabled_route() {
        let config = config();
        let preview = ExchangeResolver::new(&config, &[], ComputationMode::Preview);
        assert_eq!(
            preview.convert(&usd(1000), &Currency::GBP, None).unwrap().amount(),
            790
        );

        let submit = ExchangeResolver::new(&config, &[], ComputationMode::Submit);
        assert!(matches!(
            submit.convert(&usd(1000), &Currency::GBP, None),
            Err(BillingError::CurrencyDisabled { .. })
        ));
    }

    #[test]
    fn test_override_wins_over_table() {
        let config = config();
        let resolver = ExchangeResolver::new(&config, &[], ComputationMode::Submit);
        let eur = resolver
            .convert(&usd(1000), &Currency::EUR, Some(dec!(0.9)))
            .unwrap();
        assert_eq!(eur.amount(), 900);

        // an override covers pairs the table does not
        let cad = resolver
            .convert(&usd(1000), &Currency::CAD, Some(dec!(1.37)))
            .unwrap();
        assert_eq!(cad.amount(), 1370);
    }

    #[test]
    fn test_live_rate_for_auto_exchange() {
        let config = config();
        let live = vec![LiveRate {
            from: Currency::USD,
            to: Currency::JPY,
            rate: dec!(1.52),
        }];
        let resolver = ExchangeResolver::new(&config, &live, ComputationMode::Submit);
        assert_eq!(
            resolver.convert(&usd(1000), &Currency::JPY, None).unwrap().amount(),
            1520
        );

        let without_snapshot = ExchangeResolver::new(&config, &[], ComputationMode::Submit);
        assert_eq!(
            without_snapshot
                .convert(&usd(1000), &Currency::JPY, None)
                .unwrap()
                .amount(),
            1500
        );
    }

    #[test]
    fn test_live_rate_ignored_for_static_route() {
        let config = config();
        let live = vec![LiveRate {
            from: Currency::USD,
            to: Currency::EUR,
            rate: dec!(0.5),
        }];
        let resolver = ExchangeResolver::new(&config, &live, ComputationMode::Submit);
        assert_eq!(
            resolver.convert(&usd(1000), &Currency::EUR, None).unwrap().amount(),
            920
        );
    }

    #[test]
    fn test_override_lookup() {
        let overrides = vec![RateOverride {
            target_currency: Currency::EUR,
            rate: dec!(0.95),
        }];
        assert_eq!(override_for(&overrides, &Currency::EUR), Some(dec!(0.95)));
        assert_eq!(override_for(&overrides, &Currency::GBP), None);
    }
}
