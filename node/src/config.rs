//! Node configuration.

use std::time::Duration;

use ratekeeper_common::Currency;
use ratekeeper_fx::{EngineConfig, RateStoreConfig, SchedulerConfig};

/// Upstream rate API configuration.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL; `/convert` is appended.
    pub base_url: String,
    /// Access key sent with every request.
    pub api_key: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.exchangerate.host".to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Main node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Upstream configuration.
    pub upstream: UpstreamConfig,
    /// Rate store configuration.
    pub store: RateStoreConfig,
    /// Scheduler configuration.
    pub scheduler: SchedulerConfig,
    /// Conversion engine configuration.
    pub engine: EngineConfig,
    /// Log level.
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            upstream: UpstreamConfig::default(),
            store: RateStoreConfig::default(),
            scheduler: SchedulerConfig::default(),
            engine: EngineConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Overlay variables from `lookup` onto the defaults. Unparseable values are ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("RATEKEEPER_UPSTREAM_URL") {
            config.upstream.base_url = url.trim_end_matches('/').to_string();
        }

        if let Some(key) = lookup("RATEKEEPER_UPSTREAM_API_KEY") {
            config.upstream.api_key = key;
        }

        if let Some(secs) = lookup("RATEKEEPER_UPSTREAM_TIMEOUT_SECS") {
            if let Ok(secs) = secs.trim().parse::<u64>() {
                config.upstream.timeout = Duration::from_secs(secs);
            }
        }

        if let Some(list) = lookup("RATEKEEPER_SUPPORTED_CURRENCIES") {
            let currencies: Vec<Currency> = list
                .split(',')
                .map(str::trim)
                .filter(|code| !code.is_empty())
                .map(Currency::new)
                .collect();
            if !currencies.is_empty() && currencies.iter().all(Currency::is_well_formed) {
                config.scheduler.currencies = currencies.clone();
                config.engine.supported_currencies = currencies;
            }
        }

        if let Some(code) = lookup("RATEKEEPER_REFERENCE_CURRENCY") {
            let reference = Currency::new(code.trim());
            if reference.is_well_formed() {
                config.scheduler.reference_currency = reference.clone();
                config.engine.reference_currency = reference;
            }
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.upstream.base_url.is_empty() {
            return Err("Upstream URL cannot be empty".to_string());
        }

        if self.upstream.timeout.is_zero() {
            return Err("Upstream timeout cannot be 0".to_string());
        }

        if !self.engine.supports(&self.engine.reference_currency) {
            return Err(format!(
                "Reference currency {} is not in the supported set",
                self.engine.reference_currency
            ));
        }

        if self.store.base_ttl <= self.scheduler.base_refresh_interval
            || self.store.cross_ttl <= self.scheduler.base_refresh_interval
        {
            return Err("Base and cross TTLs must outlive the base refresh interval".to_string());
        }

        self.store.validate()?;
        self.scheduler.validate()?;
        self.engine.validate()?;

        Ok(())
    }
}
