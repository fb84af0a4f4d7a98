//! FX engine error types.

use ratekeeper_common::CurrencyPair;
use thiserror::Error;

/// Input rejected before any I/O takes place.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("from currency is required")]
    MissingFromCurrency,

    #[error("to currency is required")]
    MissingToCurrency,

    #[error("unsupported currency: {0}")]
    UnsupportedCurrency(String),

    #[error("from and to currencies must differ")]
    SameCurrency,

    #[error("amount must be positive")]
    NonPositiveAmount,

    #[error("date cannot be in the future")]
    FutureDate,

    #[error("date is too old (max {max_days} days)")]
    DateTooOld { max_days: i64 },
}

/// Errors that can occur in the FX engine.
#[derive(Debug, Error)]
pub enum FxError {
    /// Request failed validation.
    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    /// No usable rate for the requested currency pair.
    #[error("Rate not available for {0}")]
    RateNotAvailable(CurrencyPair),

    /// Upstream call failed (network, protocol or decoding).
    #[error("Upstream error for {pair} during {stage}: {message}")]
    Upstream {
        pair: CurrencyPair,
        stage: &'static str,
        message: String,
    },

    /// Upstream answered but reported the quote as unsuccessful.
    #[error("Upstream rejected quote for {0}")]
    UpstreamRejected(CurrencyPair),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl FxError {
    /// Whether the error is an input error the caller can fix.
    pub fn is_validation(&self) -> bool {
        matches!(self, FxError::Validation(_))
    }

    /// Attach the pair and stage to an upstream failure.
    pub fn upstream(pair: &CurrencyPair, stage: &'static str, message: impl Into<String>) -> Self {
        FxError::Upstream {
            pair: pair.clone(),
            stage,
            message: message.into(),
        }
    }

    /// Re-label an upstream failure with the stage it surfaced in.
    pub fn in_stage(self, stage: &'static str) -> Self {
        match self {
            FxError::Upstream { pair, message, .. } => FxError::Upstream {
                pair,
                stage,
                message,
            },
            FxError::UpstreamRejected(pair) => FxError::Upstream {
                pair,
                stage,
                message: "quote reported as unsuccessful".to_string(),
            },
            other => other,
        }
    }

    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            FxError::Validation(_) => "INVALID_REQUEST",
            FxError::RateNotAvailable(_) => "RATE_NOT_AVAILABLE",
            FxError::Upstream { .. } => "UPSTREAM_ERROR",
            FxError::UpstreamRejected(_) => "UPSTREAM_REJECTED",
            FxError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }
}

/// Result type for FX operations.
pub type FxResult<T> = Result<T, FxError>;

#[cfg(test)]
mod tests {
    use super::*;
    use ratekeeper_common::Currency;

    #[test]
    fn test_in_stage_wraps_rejection() {
        let pair = CurrencyPair::new(Currency::usd(), Currency::eur());
        let err = FxError::UpstreamRejected(pair.clone()).in_stage("fallback quote");

        match err {
            FxError::Upstream { pair: p, stage, .. } => {
                assert_eq!(p, pair);
                assert_eq!(stage, "fallback quote");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_validation_conversion() {
        let err: FxError = ValidationError::SameCurrency.into();
        assert!(err.is_validation());
        assert_eq!(err.error_code(), "INVALID_REQUEST");
        assert_eq!(err.to_string(), "Invalid request: from and to currencies must differ");
    }
}
