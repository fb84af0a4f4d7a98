//! Configuration for the rate engine components.

use std::time::Duration;

use ratekeeper_common::constants;
use ratekeeper_common::{Currency, DurationExt};

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct TtlCacheConfig {
    /// TTL used when an entry is stored without one.
    pub default_ttl: Duration,
    /// Interval of the background sweep.
    pub sweep_interval: Duration,
}

impl Default for TtlCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(60 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Rate store configuration.
#[derive(Debug, Clone)]
pub struct RateStoreConfig {
    /// Lifetime of a base rate.
    pub base_ttl: Duration,
    /// Lifetime of an adjustment.
    pub adjustment_ttl: Duration,
    /// Lifetime of a derived cross rate.
    pub cross_ttl: Duration,
    /// Minimum relative size of an adjustment, in basis points.
    pub adjustment_threshold_bps: u32,
    /// Interval of the background sweep over all tiers.
    pub sweep_interval: Duration,
}

impl Default for RateStoreConfig {
    fn default() -> Self {
        Self {
            // One adjustment period past the hourly refresh, so the next
            // refresh rewrites base and cross records before they expire.
            base_ttl: (constants::base_rate_ttl() + constants::adjustment_ttl()).as_std(),
            adjustment_ttl: constants::adjustment_ttl().as_std(),
            cross_ttl: (constants::base_rate_ttl() + constants::adjustment_ttl()).as_std(),
            adjustment_threshold_bps: 1, // 0.01%
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl RateStoreConfig {
    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_ttl.is_zero() || self.adjustment_ttl.is_zero() || self.cross_ttl.is_zero() {
            return Err("Rate TTLs must be non-zero".to_string());
        }
        if self.sweep_interval.is_zero() {
            return Err("Sweep interval cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Refresh scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Currency every base rate is quoted from.
    pub reference_currency: Currency,
    /// Currencies kept fresh by the scheduler.
    pub currencies: Vec<Currency>,
    /// Period of the full base refresh.
    pub base_refresh_interval: Duration,
    /// Period of the adjustment refresh.
    pub adjustment_refresh_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reference_currency: Currency::usd(),
            currencies: default_currencies(),
            base_refresh_interval: constants::base_rate_ttl().as_std(),
            adjustment_refresh_interval: constants::adjustment_ttl().as_std(),
        }
    }
}

impl SchedulerConfig {
    /// Targets quoted against the reference currency.
    pub fn targets(&self) -> impl Iterator<Item = &Currency> {
        self.currencies
            .iter()
            .filter(move |c| **c != self.reference_currency)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_refresh_interval.is_zero() || self.adjustment_refresh_interval.is_zero() {
            return Err("Refresh intervals cannot be 0".to_string());
        }
        if !self.currencies.contains(&self.reference_currency) {
            return Err(format!(
                "Reference currency {} is not in the supported set",
                self.reference_currency
            ));
        }
        Ok(())
    }
}

/// Conversion engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Currencies accepted in requests.
    pub supported_currencies: Vec<Currency>,
    /// Currency used to derive cross rates on the request path.
    pub reference_currency: Currency,
    /// Oldest stored rate the conversion path will use.
    pub max_rate_age: chrono::Duration,
    /// Oldest request date accepted.
    pub history_window: chrono::Duration,
    /// Response cache configuration.
    pub response_cache: TtlCacheConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            supported_currencies: default_currencies(),
            reference_currency: Currency::usd(),
            max_rate_age: constants::max_rate_age(),
            history_window: constants::history_window(),
            response_cache: TtlCacheConfig {
                default_ttl: Duration::from_secs(5 * 60),
                sweep_interval: Duration::from_secs(60),
            },
        }
    }
}

impl EngineConfig {
    /// Whether `currency` is accepted in requests.
    pub fn supports(&self, currency: &Currency) -> bool {
        self.supported_currencies.contains(currency)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.supported_currencies.is_empty() {
            return Err("Supported currency set cannot be empty".to_string());
        }
        if let Some(bad) = self.supported_currencies.iter().find(|c| !c.is_well_formed()) {
            return Err(format!("Malformed currency code: {}", bad));
        }
        if self.max_rate_age <= chrono::Duration::zero() {
            return Err("Max rate age must be positive".to_string());
        }
        if self.response_cache.default_ttl.is_zero() {
            return Err("Response TTL cannot be 0".to_string());
        }
        Ok(())
    }
}

/// The reference deployment's currency set.
pub fn default_currencies() -> Vec<Currency> {
    vec![
        Currency::usd(),
        Currency::inr(),
        Currency::eur(),
        Currency::jpy(),
        Currency::gbp(),
    ]
}
