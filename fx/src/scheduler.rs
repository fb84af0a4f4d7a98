//! Background refresh of the base and adjustment tiers.

use std::sync::Arc;

use chrono::Utc;
use ratekeeper_common::{now, Currency, CurrencyPair, FixedPointMoney};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::SchedulerConfig;
use crate::provider::{unit_amount, UpstreamRateSource};
use crate::store::{log_validation_report, RateStore, RateValidationReport};

/// Outcome of one refresh cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    /// Quotes fetched and stored.
    pub fetched: usize,
    /// Pairs whose fetch failed.
    pub failed: usize,
    /// Cross rates derived (base refresh) or adjustments stored (adjustment refresh).
    pub derived: usize,
    /// Quotes within threshold that re-confirmed their base rate.
    pub confirmed: usize,
    /// Stop was requested mid-cycle and the remaining results were discarded.
    pub cancelled: bool,
}

/// Keeps the rate store fresh.
///
/// Owns two timers (base and adjustment refresh) and the cancellation token it
/// was constructed with. Both refreshes run once when the loop starts.
pub struct RateScheduler {
    store: Arc<RateStore>,
    source: Arc<dyn UpstreamRateSource>,
    config: SchedulerConfig,
    cancel: CancellationToken,
}

impl RateScheduler {
    pub fn new(
        store: Arc<RateStore>,
        source: Arc<dyn UpstreamRateSource>,
        config: SchedulerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            source,
            config,
            cancel,
        }
    }

    /// Spawn the refresh loop.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move { scheduler.run().await })
    }

    /// Stop future cycles. A fetch already in flight finishes, but its result is dropped.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Warm up both tiers, then refresh on each timer until stopped.
    #[instrument(skip(self), fields(source = self.source.name()))]
    pub async fn run(&self) {
        info!(
            reference = %self.config.reference_currency,
            currencies = self.config.currencies.len(),
            "Rate scheduler starting"
        );

        self.refresh_base().await;
        self.refresh_adjustments().await;

        let base_period = self.config.base_refresh_interval;
        let adjustment_period = self.config.adjustment_refresh_interval;
        let mut base_timer = interval_at(Instant::now() + base_period, base_period);
        let mut adjustment_timer = interval_at(Instant::now() + adjustment_period, adjustment_period);
        base_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        adjustment_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = base_timer.tick() => {
                    self.refresh_base().await;
                }
                _ = adjustment_timer.tick() => {
                    self.refresh_adjustments().await;
                }
            }
        }

        info!("Rate scheduler stopped");
    }

    /// Fetch every reference→target base rate, then derive the cross matrix.
    ///
    /// A failed pair is logged and skipped. Cross rates are derived only from
    /// the rates fetched in this cycle.
    pub async fn refresh_base(&self) -> RefreshSummary {
        let reference = &self.config.reference_currency;
        let mut summary = RefreshSummary::default();
        let mut fetched: Vec<(Currency, FixedPointMoney)> = Vec::new();

        for target in self.config.targets() {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let pair = CurrencyPair::new(reference.clone(), target.clone());
            let result = self.source.unit_rate(&pair, Some(Utc::now().date_naive())).await;

            if self.cancel.is_cancelled() {
                debug!(pair = %pair, "Discarding quote received after stop");
                summary.cancelled = true;
                break;
            }

            match result {
                Ok(rate) => {
                    self.store.record_base(pair, rate);
                    fetched.push((target.clone(), rate));
                    summary.fetched += 1;
                }
                Err(e) => {
                    warn!(pair = %pair, error = %e, "Failed to fetch base rate");
                    summary.failed += 1;
                }
            }
        }

        if summary.cancelled {
            info!(fetched = summary.fetched, "Base refresh interrupted by stop");
            return summary;
        }

        summary.derived = self.derive_cross_rates(reference, &fetched);
        if summary.fetched > 0 {
            self.store.mark_base_refresh(now());
        }

        info!(
            fetched = summary.fetched,
            failed = summary.failed,
            cross_rates = summary.derived,
            "Base rates refreshed"
        );
        summary
    }

    /// Cross rate for every ordered pair of fetched targets, plus each target
    /// back to the reference currency. Non-positive rates take no part.
    fn derive_cross_rates(&self, reference: &Currency, fetched: &[(Currency, FixedPointMoney)]) -> usize {
        let one = unit_amount();
        let mut derived = 0;

        let usable: Vec<_> = fetched.iter().filter(|(_, rate)| rate.is_positive()).collect();

        for (from, from_rate) in usable.iter().copied() {
            for (to, to_rate) in usable.iter().copied() {
                if from == to {
                    continue;
                }
                let cross = to_rate.divide(from_rate);
                if !cross.is_positive() {
                    continue;
                }
                self.store
                    .record_cross(CurrencyPair::new(from.clone(), to.clone()), cross);
                derived += 1;
            }

            let inverse = one.divide(from_rate);
            if inverse.is_positive() {
                self.store
                    .record_cross(CurrencyPair::new(from.clone(), reference.clone()), inverse);
                derived += 1;
            }
        }

        derived
    }

    /// Re-quote every target and keep the significant deltas as adjustments.
    ///
    /// A quote within the threshold is not stored; it re-confirms the base rate
    /// instead. Pairs without a base rate are skipped.
    pub async fn refresh_adjustments(&self) -> RefreshSummary {
        let reference = &self.config.reference_currency;
        let mut summary = RefreshSummary::default();

        for target in self.config.targets() {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let pair = CurrencyPair::new(reference.clone(), target.clone());
            let result = self.source.unit_rate(&pair, Some(Utc::now().date_naive())).await;

            if self.cancel.is_cancelled() {
                debug!(pair = %pair, "Discarding quote received after stop");
                summary.cancelled = true;
                break;
            }

            let quote = match result {
                Ok(quote) => quote,
                Err(e) => {
                    warn!(pair = %pair, error = %e, "Failed to fetch adjustment quote");
                    summary.failed += 1;
                    continue;
                }
            };
            summary.fetched += 1;

            let Some(base) = self.store.base_rate(&pair) else {
                debug!(pair = %pair, "No base rate to adjust");
                continue;
            };

            let delta = quote.subtract(&base.value);
            if self.store.record_adjustment(pair.clone(), delta) {
                summary.derived += 1;
            } else if self.store.reaffirm_base(&pair, now()) {
                summary.confirmed += 1;
            }
        }

        info!(
            fetched = summary.fetched,
            failed = summary.failed,
            adjustments = summary.derived,
            confirmed = summary.confirmed,
            "Adjustments refreshed"
        );
        summary
    }

    /// Count zero and negative base rates. Reports only; nothing is removed.
    pub fn validate_rates(&self) -> RateValidationReport {
        let report = self.store.audit_base_rates();
        log_validation_report(&report);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockRateSource;
    use crate::store::RateTier;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn money(value: f64) -> FixedPointMoney {
        FixedPointMoney::from_decimal(value, 6).unwrap()
    }

    fn usd(to: Currency) -> CurrencyPair {
        CurrencyPair::new(Currency::usd(), to)
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            currencies: vec![Currency::usd(), Currency::eur(), Currency::gbp(), Currency::jpy()],
            ..Default::default()
        }
    }

    fn setup() -> (Arc<RateStore>, Arc<MockRateSource>, RateScheduler) {
        let store = Arc::new(RateStore::new());
        let source = Arc::new(MockRateSource::new("test"));
        source.set_rate(usd(Currency::eur()), money(0.90));
        source.set_rate(usd(Currency::gbp()), money(0.75));
        source.set_rate(usd(Currency::jpy()), money(150.0));

        let scheduler = RateScheduler::new(
            store.clone(),
            source.clone(),
            config(),
            CancellationToken::new(),
        );
        (store, source, scheduler)
    }

    #[tokio::test]
    async fn test_refresh_base_stores_rates_and_cross_matrix() {
        let (store, _source, scheduler) = setup();

        let summary = scheduler.refresh_base().await;

        assert_eq!(summary.fetched, 3);
        assert_eq!(summary.failed, 0);
        // 3 * 2 ordered pairs + 3 inverses
        assert_eq!(summary.derived, 9);
        assert!(!store.is_stale(chrono::Duration::minutes(5)));

        let eur_gbp = store
            .stored_cross_rate(&CurrencyPair::new(Currency::eur(), Currency::gbp()))
            .unwrap();
        assert_eq!(eur_gbp.value.to_decimal(), dec!(0.833333));

        let jpy_usd = store
            .stored_cross_rate(&CurrencyPair::new(Currency::jpy(), Currency::usd()))
            .unwrap();
        assert_eq!(jpy_usd.value.to_decimal(), dec!(0.006666));
    }

    #[tokio::test]
    async fn test_refresh_base_tolerates_partial_failure() {
        let (store, source, scheduler) = setup();
        source.fail_pair(usd(Currency::gbp()));

        let summary = scheduler.refresh_base().await;

        assert_eq!(summary.fetched, 2);
        assert_eq!(summary.failed, 1);
        assert!(store.base_rate(&usd(Currency::gbp())).is_none());
        assert!(store.base_rate(&usd(Currency::eur())).is_some());
        assert!(store
            .stored_cross_rate(&CurrencyPair::new(Currency::eur(), Currency::gbp()))
            .is_none());
        assert!(store
            .stored_cross_rate(&CurrencyPair::new(Currency::eur(), Currency::jpy()))
            .is_some());
    }

    #[tokio::test]
    async fn test_total_failure_leaves_store_stale() {
        let (store, source, scheduler) = setup();
        for c in [Currency::eur(), Currency::gbp(), Currency::jpy()] {
            source.fail_pair(usd(c));
        }

        let summary = scheduler.refresh_base().await;

        assert_eq!(summary.failed, 3);
        assert!(store.is_stale(chrono::Duration::hours(1)));
    }

    #[tokio::test]
    async fn test_refresh_adjustments_applies_threshold() {
        let (store, source, scheduler) = setup();
        scheduler.refresh_base().await;

        // EUR drifts by 0.5%, GBP by less than 0.01%, JPY unchanged.
        source.set_rate(usd(Currency::eur()), money(0.9045));
        source.set_rate(usd(Currency::gbp()), money(0.750050));

        let summary = scheduler.refresh_adjustments().await;

        assert_eq!(summary.fetched, 3);
        assert_eq!(summary.derived, 1);
        assert_eq!(summary.confirmed, 2);

        let eur = store.adjustment(&usd(Currency::eur())).unwrap();
        assert_eq!(eur.value.to_decimal(), dec!(0.004500));
        assert!(store.adjustment(&usd(Currency::gbp())).is_none());

        let precision = store.precision_rate(&usd(Currency::eur())).unwrap();
        assert_eq!(precision.value, money(0.9045));
    }

    #[tokio::test]
    async fn test_base_refresh_supersedes_adjustment() {
        let (store, source, scheduler) = setup();
        let usd_eur = usd(Currency::eur());
        scheduler.refresh_base().await;

        source.set_rate(usd_eur.clone(), money(0.905));
        scheduler.refresh_adjustments().await;
        assert_eq!(store.adjustment(&usd_eur).unwrap().value, money(0.005));

        scheduler.refresh_base().await;

        let precision = store.precision_rate(&usd_eur).unwrap();
        assert_eq!(precision.value, money(0.905));
        assert_eq!(precision.tier, RateTier::Base);
        assert!(store.adjustment(&usd_eur).is_none());
    }

    #[tokio::test]
    async fn test_non_positive_base_rates_are_not_crossed() {
        let (store, source, scheduler) = setup();
        source.set_rate(usd(Currency::eur()), money(-0.90));

        let summary = scheduler.refresh_base().await;

        assert_eq!(summary.fetched, 3);
        // GBP and JPY only: 2 ordered pairs + 2 inverses
        assert_eq!(summary.derived, 4);
        assert!(store
            .stored_cross_rate(&CurrencyPair::new(Currency::eur(), Currency::gbp()))
            .is_none());
        assert!(store
            .stored_cross_rate(&CurrencyPair::new(Currency::eur(), Currency::usd()))
            .is_none());
        assert!(store
            .stored_cross_rate(&CurrencyPair::new(Currency::gbp(), Currency::jpy()))
            .is_some());
    }

    #[tokio::test]
    async fn test_refresh_adjustments_without_base() {
        let (store, _source, scheduler) = setup();

        let summary = scheduler.refresh_adjustments().await;

        assert_eq!(summary.fetched, 3);
        assert_eq!(summary.derived, 0);
        assert_eq!(store.tier_sizes().adjustments, 0);
    }

    #[tokio::test]
    async fn test_validate_rates_reports_without_repair() {
        let (store, source, scheduler) = setup();
        source.set_rate(usd(Currency::jpy()), FixedPointMoney::zero(6));
        scheduler.refresh_base().await;

        let report = scheduler.validate_rates();

        assert_eq!(report.checked, 3);
        assert_eq!(report.zero, 1);
        assert_eq!(report.negative, 0);
        assert!(store.base_rate(&usd(Currency::jpy())).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_warms_up_and_refreshes_periodically() {
        let (_store, source, scheduler) = setup();
        let scheduler = Arc::new(scheduler);
        let handle = scheduler.start();

        // Warm-up: one base and one adjustment quote per target.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.calls_for(&usd(Currency::eur())), 2);

        // One adjustment cycle at 5 minutes.
        tokio::time::sleep(Duration::from_secs(5 * 60)).await;
        assert_eq!(source.calls_for(&usd(Currency::eur())), 3);

        scheduler.stop();
        handle.await.unwrap();
        assert!(scheduler.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_in_flight_results() {
        let (store, source, scheduler) = setup();
        source.set_latency(Duration::from_secs(10));
        let scheduler = Arc::new(scheduler);
        let handle = scheduler.start();

        // First fetch is in flight.
        tokio::time::sleep(Duration::from_secs(5)).await;
        scheduler.stop();
        handle.await.unwrap();

        assert_eq!(store.tier_sizes().base, 0);
        assert!(store.last_base_refresh().is_none());
        assert_eq!(source.calls(), 1);
    }
}
