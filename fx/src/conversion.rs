//! Conversion request/response types and request validation.

use chrono::{DateTime, NaiveDate, Utc};
use ratekeeper_common::{Currency, CurrencyPair, FixedPointMoney};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::ValidationError;

/// Request to convert an amount between two currencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionRequest {
    pub from: String,
    pub to: String,
    pub amount: FixedPointMoney,
    /// Rate date. Absent means today.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
}

impl ConversionRequest {
    /// Create a request for today's rate.
    pub fn new(from: impl Into<String>, to: impl Into<String>, amount: FixedPointMoney) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            amount,
            date: None,
        }
    }

    /// Use a specific rate date.
    pub fn on(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }
}

/// Result of a conversion. Cached and returned unchanged on repeat requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionResponse {
    pub success: bool,
    pub result: FixedPointMoney,
    pub rate: FixedPointMoney,
}

/// A request that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    pub pair: CurrencyPair,
    pub amount: FixedPointMoney,
    pub date: NaiveDate,
    /// Whether the request asks for today's rate.
    pub is_current: bool,
}

/// Response cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversionKey {
    pub pair: CurrencyPair,
    pub amount: FixedPointMoney,
    pub date: NaiveDate,
}

impl From<&ValidatedRequest> for ConversionKey {
    fn from(request: &ValidatedRequest) -> Self {
        Self {
            pair: request.pair.clone(),
            amount: request.amount,
            date: request.date,
        }
    }
}

/// Validate a request as of `now`.
///
/// The future check is exact; the history window is checked by calendar day
/// (UTC), so any time on the oldest allowed day is accepted.
pub fn validate_request(
    request: &ConversionRequest,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> Result<ValidatedRequest, ValidationError> {
    if request.from.trim().is_empty() {
        return Err(ValidationError::MissingFromCurrency);
    }
    if request.to.trim().is_empty() {
        return Err(ValidationError::MissingToCurrency);
    }

    let from = Currency::new(request.from.as_str());
    let to = Currency::new(request.to.as_str());
    for currency in [&from, &to] {
        if !config.supports(currency) {
            return Err(ValidationError::UnsupportedCurrency(currency.code().to_string()));
        }
    }
    if from == to {
        return Err(ValidationError::SameCurrency);
    }

    if !request.amount.is_positive() {
        return Err(ValidationError::NonPositiveAmount);
    }

    let date = request.date.unwrap_or(now);
    if date > now {
        return Err(ValidationError::FutureDate);
    }
    let oldest = (now - config.history_window).date_naive();
    if date.date_naive() < oldest {
        return Err(ValidationError::DateTooOld {
            max_days: config.history_window.num_days(),
        });
    }

    Ok(ValidatedRequest {
        pair: CurrencyPair::new(from, to),
        amount: request.amount,
        date: date.date_naive(),
        is_current: date.date_naive() == now.date_naive(),
    })
}
