//! Ratekeeper FX Engine
//!
//! Precision currency-rate engine: a tiered rate store fed by a background
//! scheduler, and a conversion engine that answers from it.
//!
//! # Features
//!
//! - Generic TTL cache with a background sweeper
//! - Base, adjustment and cross rate tiers
//! - Periodic base and adjustment refresh from an upstream source
//! - Conversion with response caching and upstream fallback
//!
//! # Example
//!
//! ```rust,ignore
//! use ratekeeper_fx::{ConversionEngine, ConversionRequest, EngineConfig, RateStore};
//! use ratekeeper_common::FixedPointMoney;
//!
//! let store = Arc::new(RateStore::new());
//! let engine = ConversionEngine::new(store, source, EngineConfig::default());
//!
//! let amount = FixedPointMoney::parse("1000.00", 2)?;
//! let response = engine.convert(&ConversionRequest::new("USD", "EUR", amount)).await?;
//! ```

pub mod cache;
pub mod config;
pub mod conversion;
pub mod engine;
pub mod error;
pub mod provider;
pub mod scheduler;
pub mod store;

pub use cache::{CacheStats, TtlCache};
pub use config::{EngineConfig, RateStoreConfig, SchedulerConfig, TtlCacheConfig};
pub use conversion::{validate_request, ConversionKey, ConversionRequest, ConversionResponse};
pub use engine::{ConversionEngine, EngineStats};
pub use error::{FxError, FxResult, ValidationError};
pub use provider::{Quote, QuoteRequest, UpstreamRateSource};
pub use scheduler::{RateScheduler, RefreshSummary};
pub use store::{PrecisionRate, RateRecord, RateStore, RateTier, RateValidationReport};

#[cfg(any(test, feature = "test-utils"))]
pub use provider::MockRateSource;
