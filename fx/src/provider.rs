//! Upstream rate source contract.

use async_trait::async_trait;
use chrono::NaiveDate;
use ratekeeper_common::{CurrencyPair, FixedPointMoney, Timestamp, DEFAULT_SCALE};

use crate::error::{FxError, FxResult};

/// A conversion quote request sent upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteRequest {
    pub pair: CurrencyPair,
    /// Amount in `pair.from` to convert.
    pub amount: FixedPointMoney,
    /// Historical date, or `None` for the latest quote.
    pub date: Option<NaiveDate>,
}

impl QuoteRequest {
    /// A 1-unit request, used to read a rate.
    pub fn unit(pair: CurrencyPair, date: Option<NaiveDate>) -> Self {
        Self {
            pair,
            amount: unit_amount(),
            date,
        }
    }
}

/// Upstream answer to a [`QuoteRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub success: bool,
    pub rate: FixedPointMoney,
    pub converted_amount: FixedPointMoney,
    pub timestamp: Timestamp,
}

/// `1.000000`
pub fn unit_amount() -> FixedPointMoney {
    FixedPointMoney::new(10i64.pow(DEFAULT_SCALE), DEFAULT_SCALE).unwrap_or_default()
}

/// Trait for upstream rate sources.
#[async_trait]
pub trait UpstreamRateSource: Send + Sync {
    /// Get the source name.
    fn name(&self) -> &str;

    /// Quote a conversion.
    async fn convert(&self, request: &QuoteRequest) -> FxResult<Quote>;

    /// Quote one unit of `pair.from` and return the rate.
    async fn unit_rate(&self, pair: &CurrencyPair, date: Option<NaiveDate>) -> FxResult<FixedPointMoney> {
        let quote = self.convert(&QuoteRequest::unit(pair.clone(), date)).await?;
        if !quote.success {
            return Err(FxError::UpstreamRejected(pair.clone()));
        }
        Ok(quote.rate)
    }
}

/// Mock rate source for testing.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockRateSource {
    name: String,
    rates: dashmap::DashMap<CurrencyPair, FixedPointMoney>,
    failing: dashmap::DashSet<CurrencyPair>,
    calls: dashmap::DashMap<CurrencyPair, usize>,
    latency: parking_lot::RwLock<Option<std::time::Duration>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockRateSource {
    /// Create a new mock source.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rates: dashmap::DashMap::new(),
            failing: dashmap::DashSet::new(),
            calls: dashmap::DashMap::new(),
            latency: parking_lot::RwLock::new(None),
        }
    }

    /// Set the rate quoted for a pair.
    pub fn set_rate(&self, pair: CurrencyPair, rate: FixedPointMoney) {
        self.failing.remove(&pair);
        self.rates.insert(pair, rate);
    }

    /// Make every quote for `pair` fail.
    pub fn fail_pair(&self, pair: CurrencyPair) {
        self.failing.insert(pair);
    }

    /// Delay every quote by `latency`.
    pub fn set_latency(&self, latency: std::time::Duration) {
        *self.latency.write() = Some(latency);
    }

    /// Total number of quotes requested.
    pub fn calls(&self) -> usize {
        self.calls.iter().map(|c| *c.value()).sum()
    }

    /// Number of quotes requested for `pair`.
    pub fn calls_for(&self, pair: &CurrencyPair) -> usize {
        self.calls.get(pair).map(|c| *c).unwrap_or(0)
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl UpstreamRateSource for MockRateSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn convert(&self, request: &QuoteRequest) -> FxResult<Quote> {
        *self.calls.entry(request.pair.clone()).or_insert(0) += 1;

        let latency = *self.latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if self.failing.contains(&request.pair) {
            return Err(FxError::upstream(&request.pair, "quote", "simulated outage"));
        }

        let rate = self
            .rates
            .get(&request.pair)
            .map(|r| *r)
            .ok_or_else(|| FxError::RateNotAvailable(request.pair.clone()))?;

        Ok(Quote {
            success: true,
            rate,
            converted_amount: request.amount.multiply(&rate),
            timestamp: chrono::Utc::now(),
        })
    }
}
