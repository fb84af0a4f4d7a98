//! Error types for Ratekeeper monetary values.

use thiserror::Error;

/// Errors raised while constructing or rescaling a fixed-point value.
///
/// Arithmetic on already-constructed values never fails; only the
/// boundaries into the fixed-point representation do.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MoneyError {
    /// Scale is outside `0..=MAX_SCALE`.
    #[error("Scale {0} out of range (max {max})", max = crate::monetary::MAX_SCALE)]
    ScaleOutOfRange(u32),

    /// Input was NaN or infinite.
    #[error("Value is not a finite number")]
    NonFinite,

    /// Scaled value does not fit in a signed 64-bit amount.
    #[error("Value overflows a 64-bit amount at scale {scale}")]
    Overflow { scale: u32 },

    /// Input string is not a plain decimal number.
    #[error("Invalid money format: {0}")]
    InvalidFormat(String),
}

impl MoneyError {
    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            MoneyError::ScaleOutOfRange(_) => "SCALE_OUT_OF_RANGE",
            MoneyError::NonFinite => "NON_FINITE",
            MoneyError::Overflow { .. } => "OVERFLOW",
            MoneyError::InvalidFormat(_) => "INVALID_FORMAT",
        }
    }
}
