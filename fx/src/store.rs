//! Tiered rate store: base rates, adjustments and derived cross rates.
//!
//! Each tier is its own typed [`TtlCache`] keyed by [`CurrencyPair`]:
//!
//! - **base**: reference-currency rates refreshed hourly;
//! - **adjustment**: short-lived deltas on top of a base rate, only kept when
//!   they are at least the configured number of basis points of that base;
//! - **cross**: rates between two non-reference currencies, derived from two
//!   base rates and never fetched directly.
//!
//! Writes are last-write-wins per key. Records are never mutated in place.

use std::sync::Arc;

use chrono::Duration;
use parking_lot::RwLock;
use ratekeeper_common::{
    age_at, now, Currency, CurrencyPair, FixedPointMoney, Timestamp, DEFAULT_SCALE,
};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::TtlCache;
use crate::config::RateStoreConfig;
use crate::provider::unit_amount;

/// Which tier a rate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RateTier {
    Base,
    Adjustment,
    Cross,
}

/// A captured rate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateRecord {
    pub pair: CurrencyPair,
    pub value: FixedPointMoney,
    pub captured_at: Timestamp,
    pub tier: RateTier,
}

impl RateRecord {
    /// Create a record captured now.
    pub fn new(pair: CurrencyPair, value: FixedPointMoney, tier: RateTier) -> Self {
        Self::captured(pair, value, tier, now())
    }

    /// Create a record with an explicit capture time.
    pub fn captured(
        pair: CurrencyPair,
        value: FixedPointMoney,
        tier: RateTier,
        captured_at: Timestamp,
    ) -> Self {
        Self {
            pair,
            value,
            captured_at,
            tier,
        }
    }

    /// Time since capture.
    pub fn age(&self) -> Duration {
        age_at(self.captured_at, now())
    }
}

/// The best available rate for a pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrecisionRate {
    pub pair: CurrencyPair,
    pub value: FixedPointMoney,
    /// Capture time of the newest record that went into `value`.
    pub captured_at: Timestamp,
    /// `Adjustment` when base and adjustment were combined.
    pub tier: RateTier,
}

impl PrecisionRate {
    pub fn age(&self) -> Duration {
        age_at(self.captured_at, now())
    }
}

/// Result of auditing the stored base rates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RateValidationReport {
    pub checked: usize,
    pub zero: usize,
    pub negative: usize,
}

impl RateValidationReport {
    pub fn is_clean(&self) -> bool {
        self.zero == 0 && self.negative == 0
    }
}

/// Live entry counts per tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TierSizes {
    pub base: usize,
    pub adjustments: usize,
    pub cross: usize,
}

/// In-memory rate store shared by the scheduler (writer) and the engine (reader).
pub struct RateStore {
    base: TtlCache<CurrencyPair, RateRecord>,
    adjustments: TtlCache<CurrencyPair, RateRecord>,
    cross: TtlCache<CurrencyPair, RateRecord>,
    last_base_refresh: RwLock<Option<Timestamp>>,
    config: RateStoreConfig,
}

impl RateStore {
    /// Create a store with default configuration.
    pub fn new() -> Self {
        Self::with_config(RateStoreConfig::default())
    }

    /// Create a store with custom configuration.
    pub fn with_config(config: RateStoreConfig) -> Self {
        Self {
            base: TtlCache::with_default_ttl(config.base_ttl),
            adjustments: TtlCache::with_default_ttl(config.adjustment_ttl),
            cross: TtlCache::with_default_ttl(config.cross_ttl),
            last_base_refresh: RwLock::new(None),
            config,
        }
    }

    pub fn config(&self) -> &RateStoreConfig {
        &self.config
    }

    /// Store a base rate captured now.
    pub fn record_base(&self, pair: CurrencyPair, rate: FixedPointMoney) -> RateRecord {
        let record = RateRecord::new(pair, rate, RateTier::Base);
        self.insert_base(record.clone());
        record
    }

    /// Store a base record as-is (capture time included).
    ///
    /// Any adjustment of the pair is dropped: it was a delta from the replaced base.
    pub fn insert_base(&self, record: RateRecord) {
        debug!(pair = %record.pair, rate = %record.value, "Recorded base rate");
        self.adjustments.delete(&record.pair);
        self.base.set(record.pair.clone(), record);
    }

    /// Store an adjustment (`quote - base`) captured now.
    ///
    /// Dropped unless a base rate exists and `|delta|` is at least the
    /// configured threshold relative to it. Returns whether it was stored.
    pub fn record_adjustment(&self, pair: CurrencyPair, delta: FixedPointMoney) -> bool {
        self.insert_adjustment(RateRecord::new(pair, delta, RateTier::Adjustment))
    }

    /// Threshold-gated insert of an adjustment record.
    pub fn insert_adjustment(&self, record: RateRecord) -> bool {
        let Some(base) = self.base.get(&record.pair) else {
            debug!(pair = %record.pair, "Dropping adjustment without base rate");
            return false;
        };

        if !record
            .value
            .is_significant_relative_to(&base.value, self.config.adjustment_threshold_bps)
        {
            debug!(
                pair = %record.pair,
                delta = %record.value,
                base = %base.value,
                "Dropping adjustment below threshold"
            );
            return false;
        }

        debug!(pair = %record.pair, delta = %record.value, "Recorded adjustment");
        self.adjustments.set(record.pair.clone(), record);
        true
    }

    /// Re-capture the current base rate of `pair` at `at`, keeping its value.
    ///
    /// Used when a fresh quote lands within the adjustment threshold: the base
    /// is confirmed current and any earlier adjustment no longer applies.
    /// Returns false when there is no base rate to confirm.
    pub fn reaffirm_base(&self, pair: &CurrencyPair, at: Timestamp) -> bool {
        let Some(base) = self.base.get(pair) else {
            return false;
        };
        self.adjustments.delete(pair);
        self.base.set(
            pair.clone(),
            RateRecord::captured(pair.clone(), base.value, RateTier::Base, at),
        );
        true
    }

    /// Store a derived cross rate captured now.
    pub fn record_cross(&self, pair: CurrencyPair, rate: FixedPointMoney) -> RateRecord {
        let record = RateRecord::new(pair, rate, RateTier::Cross);
        self.cross.set(record.pair.clone(), record.clone());
        record
    }

    pub fn base_rate(&self, pair: &CurrencyPair) -> Option<RateRecord> {
        self.base.get(pair)
    }

    pub fn adjustment(&self, pair: &CurrencyPair) -> Option<RateRecord> {
        self.adjustments.get(pair)
    }

    pub fn stored_cross_rate(&self, pair: &CurrencyPair) -> Option<RateRecord> {
        self.cross.get(pair)
    }

    /// Best available rate: base + adjustment, base alone, or the stored cross rate.
    pub fn precision_rate(&self, pair: &CurrencyPair) -> Option<PrecisionRate> {
        if let Some(base) = self.base.get(pair) {
            return Some(match self.adjustments.get(pair) {
                Some(adjustment) => PrecisionRate {
                    pair: pair.clone(),
                    value: base.value.add(&adjustment.value),
                    captured_at: base.captured_at.max(adjustment.captured_at),
                    tier: RateTier::Adjustment,
                },
                None => PrecisionRate {
                    pair: pair.clone(),
                    value: base.value,
                    captured_at: base.captured_at,
                    tier: RateTier::Base,
                },
            });
        }

        self.cross.get(pair).map(|cross| PrecisionRate {
            pair: pair.clone(),
            value: cross.value,
            captured_at: cross.captured_at,
            tier: RateTier::Cross,
        })
    }

    /// `rate(base, to) / rate(base, from)` from the base tier.
    ///
    /// A leg where the currency is `base` itself counts as 1. Zero when either
    /// leg is missing or not positive; callers read zero as "unavailable".
    pub fn cross_rate(&self, from: &Currency, to: &Currency, base: &Currency) -> FixedPointMoney {
        self.cross_legs(from, to, base)
            .map(|(rate, _)| rate)
            .unwrap_or_else(|| FixedPointMoney::zero(DEFAULT_SCALE))
    }

    /// Like [`RateStore::cross_rate`], but only from legs captured within `max_age`.
    pub fn fresh_cross_rate(
        &self,
        pair: &CurrencyPair,
        base: &Currency,
        max_age: Duration,
    ) -> Option<PrecisionRate> {
        let (value, captured_at) = self.cross_legs(&pair.from, &pair.to, base)?;
        if age_at(captured_at, now()) > max_age {
            return None;
        }
        Some(PrecisionRate {
            pair: pair.clone(),
            value,
            captured_at,
            tier: RateTier::Cross,
        })
    }

    /// Cross value and the capture time of its older leg.
    fn cross_legs(
        &self,
        from: &Currency,
        to: &Currency,
        base: &Currency,
    ) -> Option<(FixedPointMoney, Timestamp)> {
        let to_leg = self.leg(base, to)?;
        let from_leg = self.leg(base, from)?;
        if !to_leg.0.is_positive() || !from_leg.0.is_positive() {
            return None;
        }

        let rate = to_leg.0.divide(&from_leg.0);
        if !rate.is_positive() {
            return None;
        }
        Some((rate, to_leg.1.min(from_leg.1)))
    }

    fn leg(&self, base: &Currency, target: &Currency) -> Option<(FixedPointMoney, Timestamp)> {
        if base == target {
            return Some((unit_amount(), now()));
        }
        self.base
            .get(&CurrencyPair::new(base.clone(), target.clone()))
            .map(|record| (record.value, record.captured_at))
    }

    /// Note the completion of a full base refresh.
    pub fn mark_base_refresh(&self, at: Timestamp) {
        *self.last_base_refresh.write() = Some(at);
    }

    pub fn last_base_refresh(&self) -> Option<Timestamp> {
        *self.last_base_refresh.read()
    }

    /// Whether the last full base refresh is older than `max_age` (or never happened).
    pub fn is_stale(&self, max_age: Duration) -> bool {
        match self.last_base_refresh() {
            Some(at) => age_at(at, now()) > max_age,
            None => true,
        }
    }

    /// Snapshot of live base records.
    pub fn base_rates(&self) -> Vec<RateRecord> {
        self.base.values()
    }

    /// Count zero and negative base rates. Nothing is repaired or removed.
    pub fn audit_base_rates(&self) -> RateValidationReport {
        self.base
            .values()
            .iter()
            .fold(RateValidationReport::default(), |mut report, record| {
                report.checked += 1;
                if record.value.is_zero() {
                    report.zero += 1;
                } else if record.value.is_negative() {
                    report.negative += 1;
                }
                report
            })
    }

    pub fn tier_sizes(&self) -> TierSizes {
        TierSizes {
            base: self.base.size(),
            adjustments: self.adjustments.size(),
            cross: self.cross.size(),
        }
    }

    /// Drop expired records from every tier.
    pub fn purge_expired(&self) -> usize {
        self.base.purge_expired() + self.adjustments.purge_expired() + self.cross.purge_expired()
    }

    /// Remove every record and forget the last refresh.
    pub fn clear(&self) {
        self.base.clear();
        self.adjustments.clear();
        self.cross.clear();
        *self.last_base_refresh.write() = None;
    }

    /// Spawn the periodic sweep over all tiers. It stops when `cancel` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let store = Arc::clone(self);
        let period = self.config.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = store.purge_expired();
                        if removed > 0 {
                            debug!(removed, "Swept expired rate records");
                        }
                    }
                }
            }
        })
    }
}

impl Default for RateStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Log a validation report at the right level.
pub(crate) fn log_validation_report(report: &RateValidationReport) {
    if report.is_clean() {
        debug!(checked = report.checked, "Base rates validated");
    } else {
        warn!(
            checked = report.checked,
            zero = report.zero,
            negative = report.negative,
            "Invalid base rates detected"
        );
    }
}
