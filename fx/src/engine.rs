//! Conversion engine: the public entry point of the rate engine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use ratekeeper_common::{is_older_than, CurrencyPair, FixedPointMoney};
use tracing::{debug, info, instrument};

use crate::cache::TtlCache;
use crate::config::EngineConfig;
use crate::conversion::{validate_request, ConversionKey, ConversionRequest, ConversionResponse};
use crate::error::{FxError, FxResult};
use crate::provider::UpstreamRateSource;
use crate::store::RateStore;

/// Where the rate of a conversion came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RateOrigin {
    Precision,
    Cross,
    Upstream,
}

/// Engine counters.
#[derive(Default)]
struct Counters {
    response_cache_hits: AtomicU64,
    precision_hits: AtomicU64,
    cross_hits: AtomicU64,
    upstream_fallbacks: AtomicU64,
}

/// Snapshot of engine counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub response_cache_hits: u64,
    pub precision_hits: u64,
    pub cross_hits: u64,
    pub upstream_fallbacks: u64,
}

/// Converts amounts using the rate store, falling back to the upstream source.
pub struct ConversionEngine {
    store: Arc<RateStore>,
    source: Arc<dyn UpstreamRateSource>,
    responses: Arc<TtlCache<ConversionKey, ConversionResponse>>,
    config: EngineConfig,
    counters: Counters,
}

impl ConversionEngine {
    pub fn new(store: Arc<RateStore>, source: Arc<dyn UpstreamRateSource>, config: EngineConfig) -> Self {
        Self {
            store,
            source,
            responses: Arc::new(TtlCache::with_config(config.response_cache.clone())),
            config,
            counters: Counters::default(),
        }
    }

    /// Response cache, for wiring its sweeper.
    pub fn response_cache(&self) -> &Arc<TtlCache<ConversionKey, ConversionResponse>> {
        &self.responses
    }

    pub fn store(&self) -> &Arc<RateStore> {
        &self.store
    }

    /// Convert an amount.
    ///
    /// Identical requests within the response TTL return the cached response
    /// without touching the store or the upstream source.
    #[instrument(skip(self, request), fields(
        from = %request.from,
        to = %request.to,
        amount = %request.amount
    ))]
    pub async fn convert(&self, request: &ConversionRequest) -> FxResult<ConversionResponse> {
        let validated = validate_request(request, &self.config, Utc::now())?;
        let key = ConversionKey::from(&validated);

        if let Some(cached) = self.responses.get(&key) {
            self.counters.response_cache_hits.fetch_add(1, Ordering::Relaxed);
            debug!("Response cache hit");
            return Ok(cached);
        }

        let (rate, origin) = if validated.is_current {
            self.current_rate(&validated.pair).await?
        } else {
            (self.fallback_rate(&validated.pair, validated.date).await?, RateOrigin::Upstream)
        };

        let result = validated.amount.multiply(&rate);
        let response = ConversionResponse {
            success: true,
            result,
            rate,
        };
        self.responses.set(key, response.clone());

        info!(
            rate = %rate,
            result = %result,
            origin = ?origin,
            "Conversion completed"
        );
        Ok(response)
    }

    /// Best stored rate for a pair, regardless of age.
    pub fn precision_rate(&self, pair: &CurrencyPair) -> FxResult<FixedPointMoney> {
        self.store
            .precision_rate(pair)
            .map(|p| p.value)
            .filter(|v| v.is_positive())
            .ok_or_else(|| FxError::RateNotAvailable(pair.clone()))
    }

    /// Quote one unit of `pair.from` directly from upstream.
    pub async fn exchange_rate(&self, pair: &CurrencyPair, date: Option<NaiveDate>) -> FxResult<FixedPointMoney> {
        self.source.unit_rate(pair, date).await
    }

    /// Get engine statistics.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            response_cache_hits: self.counters.response_cache_hits.load(Ordering::Relaxed),
            precision_hits: self.counters.precision_hits.load(Ordering::Relaxed),
            cross_hits: self.counters.cross_hits.load(Ordering::Relaxed),
            upstream_fallbacks: self.counters.upstream_fallbacks.load(Ordering::Relaxed),
        }
    }

    /// Fresh precision rate, then a fresh cross rate, then upstream.
    async fn current_rate(&self, pair: &CurrencyPair) -> FxResult<(FixedPointMoney, RateOrigin)> {
        let max_age = self.config.max_rate_age;

        match self.store.precision_rate(pair) {
            Some(p) if p.value.is_positive() && !is_older_than(p.captured_at, max_age) => {
                self.counters.precision_hits.fetch_add(1, Ordering::Relaxed);
                return Ok((p.value, RateOrigin::Precision));
            }
            Some(p) => debug!(age_secs = p.age().num_seconds(), rate = %p.value, "Precision rate unusable"),
            None => debug!("No precision rate stored"),
        }

        let reference = &self.config.reference_currency;
        if !pair.involves(reference) {
            if let Some(cross) = self.store.fresh_cross_rate(pair, reference, max_age) {
                self.counters.cross_hits.fetch_add(1, Ordering::Relaxed);
                return Ok((cross.value, RateOrigin::Cross));
            }
        }

        let rate = self.fallback_rate(pair, Utc::now().date_naive()).await?;
        Ok((rate, RateOrigin::Upstream))
    }

    async fn fallback_rate(&self, pair: &CurrencyPair, date: NaiveDate) -> FxResult<FixedPointMoney> {
        self.counters.upstream_fallbacks.fetch_add(1, Ordering::Relaxed);
        self.exchange_rate(pair, Some(date))
            .await
            .map_err(|e| e.in_stage("fallback quote"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockRateSource;
    use crate::error::ValidationError;
    use crate::store::{RateRecord, RateTier};
    use ratekeeper_common::{now, Currency};
    use rust_decimal_macros::dec;
    use tokio_test::{assert_err, assert_ok};

    fn money(value: f64, scale: u32) -> FixedPointMoney {
        FixedPointMoney::from_decimal(value, scale).unwrap()
    }

    fn pair(from: &str, to: &str) -> CurrencyPair {
        CurrencyPair::new(Currency::new(from), Currency::new(to))
    }

    fn setup() -> (Arc<RateStore>, Arc<MockRateSource>, ConversionEngine) {
        let store = Arc::new(RateStore::new());
        let source = Arc::new(MockRateSource::new("test"));
        let engine = ConversionEngine::new(store.clone(), source.clone(), EngineConfig::default());
        (store, source, engine)
    }

    #[tokio::test]
    async fn test_convert_falls_back_to_upstream() {
        let (_store, source, engine) = setup();
        source.set_rate(pair("EUR", "USD"), money(1.234567, 6));

        let request = ConversionRequest::new("EUR", "USD", money(1000.0, 2));
        let response = engine.convert(&request).await.unwrap();

        assert!(response.success);
        assert_eq!(response.rate, money(1.234567, 6));
        assert_eq!(response.result.to_decimal(), dec!(1234.567000));
        assert_eq!(engine.stats().upstream_fallbacks, 1);
    }

    #[tokio::test]
    async fn test_convert_is_idempotent() {
        let (_store, source, engine) = setup();
        source.set_rate(pair("USD", "EUR"), money(1.234567, 6));

        let request = ConversionRequest::new("USD", "EUR", money(100.0, 2));
        let first = engine.convert(&request).await.unwrap();
        let second = engine.convert(&request).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(source.calls(), 1);
        assert_eq!(engine.stats().response_cache_hits, 1);
    }

    #[tokio::test]
    async fn test_convert_uses_fresh_precision_rate() {
        let (store, source, engine) = setup();
        store.record_base(pair("USD", "EUR"), money(0.90, 6));
        store.record_adjustment(pair("USD", "EUR"), money(0.0045, 6));

        let request = ConversionRequest::new("USD", "EUR", money(200.0, 2));
        let response = engine.convert(&request).await.unwrap();

        assert_eq!(response.rate.to_decimal(), dec!(0.904500));
        assert_eq!(response.result.to_decimal(), dec!(180.900000));
        assert_eq!(source.calls(), 0);
        assert_eq!(engine.stats().precision_hits, 1);
    }

    #[tokio::test]
    async fn test_stale_precision_rate_is_not_used() {
        let (store, source, engine) = setup();
        let old = now() - chrono::Duration::minutes(6);
        store.insert_base(RateRecord::captured(pair("USD", "EUR"), money(0.90, 6), RateTier::Base, old));
        source.set_rate(pair("USD", "EUR"), money(0.95, 6));

        let request = ConversionRequest::new("USD", "EUR", money(10.0, 2));
        let response = engine.convert(&request).await.unwrap();

        assert_eq!(response.rate, money(0.95, 6));
        assert_eq!(source.calls(), 1);
        assert_eq!(engine.stats().precision_hits, 0);
    }

    #[tokio::test]
    async fn test_stale_cross_legs_go_upstream() {
        let (store, source, engine) = setup();
        let old = now() - chrono::Duration::minutes(30);
        store.insert_base(RateRecord::captured(pair("USD", "EUR"), money(0.90, 6), RateTier::Base, old));
        store.insert_base(RateRecord::captured(pair("USD", "GBP"), money(0.75, 6), RateTier::Base, now()));
        source.set_rate(pair("EUR", "GBP"), money(0.84, 6));

        let request = ConversionRequest::new("EUR", "GBP", money(90.0, 2));
        let response = engine.convert(&request).await.unwrap();

        assert_eq!(response.rate, money(0.84, 6));
        assert_eq!(source.calls(), 1);
        assert_eq!(engine.stats().cross_hits, 0);
    }

    #[tokio::test]
    async fn test_convert_derives_cross_rate_when_none_stored() {
        let (store, source, engine) = setup();
        store.record_base(pair("USD", "EUR"), money(0.90, 6));
        store.record_base(pair("USD", "GBP"), money(0.75, 6));

        let request = ConversionRequest::new("EUR", "GBP", money(90.0, 2));
        let response = engine.convert(&request).await.unwrap();

        assert_eq!(response.rate.to_decimal(), dec!(0.833333));
        assert_eq!(response.result.to_decimal(), dec!(74.999970));
        assert_eq!(source.calls(), 0);
        assert_eq!(engine.stats().cross_hits, 1);
    }

    #[tokio::test]
    async fn test_negative_base_leg_goes_upstream() {
        let (store, source, engine) = setup();
        store.record_base(pair("USD", "EUR"), money(-0.90, 6));
        store.record_base(pair("USD", "GBP"), money(0.75, 6));
        source.set_rate(pair("EUR", "GBP"), money(0.84, 6));

        let request = ConversionRequest::new("EUR", "GBP", money(90.0, 2));
        let response = engine.convert(&request).await.unwrap();

        assert_eq!(response.rate, money(0.84, 6));
        assert!(response.result.is_positive());
        assert_eq!(engine.stats().cross_hits, 0);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_historical_request_goes_upstream() {
        let (store, source, engine) = setup();
        store.record_base(pair("USD", "EUR"), money(0.90, 6));
        source.set_rate(pair("USD", "EUR"), money(0.88, 6));

        let request = ConversionRequest::new("USD", "EUR", money(10.0, 2))
            .on(Utc::now() - chrono::Duration::days(10));
        let response = engine.convert(&request).await.unwrap();

        assert_eq!(response.rate, money(0.88, 6));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_upstream_error_carries_context() {
        let (_store, source, engine) = setup();
        source.fail_pair(pair("USD", "JPY"));

        let request = ConversionRequest::new("USD", "JPY", money(10.0, 2));
        let err = engine.convert(&request).await.unwrap_err();

        match err {
            FxError::Upstream { pair: p, stage, .. } => {
                assert_eq!(p, pair("USD", "JPY"));
                assert_eq!(stage, "fallback quote");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(engine.response_cache().size(), 0);
    }

    #[tokio::test]
    async fn test_validation_happens_before_io() {
        let (_store, source, engine) = setup();

        let request = ConversionRequest::new("USD", "USD", money(10.0, 2));
        let err = assert_err!(engine.convert(&request).await);

        assert!(matches!(err, FxError::Validation(ValidationError::SameCurrency)));
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_precision_rate_lookup() {
        let (store, _source, engine) = setup();
        assert!(matches!(
            engine.precision_rate(&pair("USD", "EUR")),
            Err(FxError::RateNotAvailable(_))
        ));

        store.record_base(pair("USD", "EUR"), money(0.90, 6));
        let rate = assert_ok!(engine.precision_rate(&pair("USD", "EUR")));
        assert_eq!(rate, money(0.90, 6));

        store.record_base(pair("USD", "JPY"), FixedPointMoney::zero(6));
        assert!(engine.precision_rate(&pair("USD", "JPY")).is_err());
    }

    #[tokio::test]
    async fn test_exchange_rate_is_direct() {
        let (store, source, engine) = setup();
        store.record_base(pair("USD", "EUR"), money(0.90, 6));
        source.set_rate(pair("USD", "EUR"), money(0.91, 6));

        let rate = engine.exchange_rate(&pair("USD", "EUR"), None).await.unwrap();

        assert_eq!(rate, money(0.91, 6));
        assert_eq!(source.calls(), 1);
    }
}
