//! Fixed-point monetary values and currency identifiers.
//!
//! [`FixedPointMoney`] stores `amount / 10^scale` as a signed 64-bit integer
//! and a scale. Floating point is only touched on the way in
//! ([`FixedPointMoney::from_decimal`]) and for display helpers; all
//! arithmetic is integer arithmetic.

use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::MoneyError;

/// Largest supported scale. `10^18` is the largest power of ten below `i64::MAX`.
pub const MAX_SCALE: u32 = 18;

/// Precision used for rates and for the results of multiply/divide.
pub const DEFAULT_SCALE: u32 = 6;

#[inline]
fn pow10(exp: u32) -> i64 {
    10i64.pow(exp)
}

#[inline]
fn pow10_wide(exp: u32) -> i128 {
    10i128.pow(exp)
}

#[inline]
fn clamp_to_i64(value: i128) -> i64 {
    value.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// An exact decimal value `amount / 10^scale`.
///
/// Values are immutable; every operation returns a new value. Operands with
/// different scales are normalized to the larger scale before add/subtract.
///
/// The derived `PartialEq`/`Hash` are structural: `1.50` at scale 2 and
/// `1.500` at scale 3 are different keys. Use [`FixedPointMoney::value_eq`]
/// to compare numerically.
///
/// Add and subtract saturate at the `i64` bounds instead of checking for
/// overflow; amounts in this system stay many orders of magnitude below that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedPointMoney {
    amount: i64,
    scale: u32,
}

impl FixedPointMoney {
    /// Create from a raw amount and scale.
    pub fn new(amount: i64, scale: u32) -> Result<Self, MoneyError> {
        if scale > MAX_SCALE {
            return Err(MoneyError::ScaleOutOfRange(scale));
        }
        Ok(Self { amount, scale })
    }

    /// A zero value at the given scale (capped at [`MAX_SCALE`]).
    pub fn zero(scale: u32) -> Self {
        Self {
            amount: 0,
            scale: scale.min(MAX_SCALE),
        }
    }

    /// Convert a float by rounding `value * 10^scale` half away from zero.
    ///
    /// This is the only place a float enters the representation.
    pub fn from_decimal(value: f64, scale: u32) -> Result<Self, MoneyError> {
        if scale > MAX_SCALE {
            return Err(MoneyError::ScaleOutOfRange(scale));
        }
        if !value.is_finite() {
            return Err(MoneyError::NonFinite);
        }

        let scaled = (value * 10f64.powi(scale as i32)).round();
        if scaled >= i64::MAX as f64 || scaled < i64::MIN as f64 {
            return Err(MoneyError::Overflow { scale });
        }

        Ok(Self {
            amount: scaled as i64,
            scale,
        })
    }

    /// Parse a plain decimal string (`"-12.345"`) exactly at `scale`.
    ///
    /// Extra fractional digits are rounded half away from zero.
    pub fn parse(value: &str, scale: u32) -> Result<Self, MoneyError> {
        if scale > MAX_SCALE {
            return Err(MoneyError::ScaleOutOfRange(scale));
        }

        let invalid = || MoneyError::InvalidFormat(value.to_string());
        let trimmed = value.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };

        let (whole, frac) = match digits.split_once('.') {
            Some((whole, frac)) => (whole, frac),
            None => (digits, ""),
        };

        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let overflow = || MoneyError::Overflow { scale };
        let mut magnitude: i128 = 0;
        for b in whole.bytes() {
            magnitude = magnitude
                .checked_mul(10)
                .and_then(|m| m.checked_add(i128::from(b - b'0')))
                .filter(|m| *m <= i64::MAX as i128)
                .ok_or_else(overflow)?;
        }
        magnitude = magnitude
            .checked_mul(pow10_wide(scale))
            .ok_or_else(overflow)?;

        let frac = frac.as_bytes();
        let kept = frac.len().min(scale as usize);
        let mut frac_value: i128 = 0;
        for b in &frac[..kept] {
            frac_value = frac_value * 10 + i128::from(b - b'0');
        }
        frac_value *= pow10_wide(scale - kept as u32);
        magnitude += frac_value;

        if frac.get(kept).is_some_and(|b| *b >= b'5') {
            magnitude += 1;
        }

        let signed = if negative { -magnitude } else { magnitude };
        if signed > i64::MAX as i128 || signed < i64::MIN as i128 {
            return Err(overflow());
        }

        Ok(Self {
            amount: signed as i64,
            scale,
        })
    }

    /// Raw integer amount.
    #[inline]
    pub fn amount(&self) -> i64 {
        self.amount
    }

    /// Number of fractional digits.
    #[inline]
    pub fn scale(&self) -> u32 {
        self.scale
    }

    /// Lossy float view, for display and assertions only.
    pub fn to_f64(&self) -> f64 {
        self.amount as f64 / 10f64.powi(self.scale as i32)
    }

    /// Exact conversion into a `rust_decimal::Decimal`.
    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.amount, self.scale)
    }

    /// Change the scale. Widening is exact; narrowing truncates toward zero.
    pub fn rescale(&self, target_scale: u32) -> Result<Self, MoneyError> {
        if target_scale > MAX_SCALE {
            return Err(MoneyError::ScaleOutOfRange(target_scale));
        }
        Ok(self.rescale_to(target_scale))
    }

    fn rescale_to(&self, target_scale: u32) -> Self {
        let amount = match target_scale.cmp(&self.scale) {
            std::cmp::Ordering::Equal => self.amount,
            std::cmp::Ordering::Greater => self
                .amount
                .saturating_mul(pow10(target_scale - self.scale)),
            std::cmp::Ordering::Less => self.amount / pow10(self.scale - target_scale),
        };
        Self {
            amount,
            scale: target_scale,
        }
    }

    /// Align two values on the larger of their scales.
    fn normalize(a: &Self, b: &Self) -> (i64, i64, u32) {
        let scale = a.scale.max(b.scale);
        (
            a.rescale_to(scale).amount,
            b.rescale_to(scale).amount,
            scale,
        )
    }

    /// Exact sum at `max(scale_a, scale_b)`.
    pub fn add(&self, other: &Self) -> Self {
        let (a, b, scale) = Self::normalize(self, other);
        Self {
            amount: a.saturating_add(b),
            scale,
        }
    }

    /// Exact difference at `max(scale_a, scale_b)`.
    pub fn subtract(&self, other: &Self) -> Self {
        let (a, b, scale) = Self::normalize(self, other);
        Self {
            amount: a.saturating_sub(b),
            scale,
        }
    }

    /// Multiply by a rate.
    ///
    /// The product carries `scale_a + scale_b` digits; anything beyond
    /// [`DEFAULT_SCALE`] is truncated, not rounded. That loses up to one unit
    /// in the sixth decimal place and is kept for compatibility with totals
    /// already computed this way.
    pub fn multiply(&self, rate: &Self) -> Self {
        let mut product = i128::from(self.amount) * i128::from(rate.amount);
        let mut scale = self.scale + rate.scale;

        if scale > DEFAULT_SCALE {
            product /= pow10_wide(scale - DEFAULT_SCALE);
            scale = DEFAULT_SCALE;
        }

        Self {
            amount: clamp_to_i64(product),
            scale,
        }
    }

    /// Divide, returning a value at [`DEFAULT_SCALE`].
    ///
    /// The numerator is widened by `10^DEFAULT_SCALE` before the integer
    /// division. A zero divisor yields zero at the dividend's scale; callers
    /// read a zero rate as "unavailable".
    pub fn divide(&self, divisor: &Self) -> Self {
        if divisor.amount == 0 {
            return Self::zero(self.scale);
        }

        let (a, b, _) = Self::normalize(self, divisor);
        let numerator = i128::from(a) * pow10_wide(DEFAULT_SCALE);

        Self {
            amount: clamp_to_i64(numerator / i128::from(b)),
            scale: DEFAULT_SCALE,
        }
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.amount > 0
    }

    #[inline]
    pub fn is_negative(&self) -> bool {
        self.amount < 0
    }

    /// Absolute value.
    pub fn abs(&self) -> Self {
        Self {
            amount: self.amount.saturating_abs(),
            scale: self.scale,
        }
    }

    /// Numeric equality across scales.
    pub fn value_eq(&self, other: &Self) -> bool {
        let (a, b, _) = Self::normalize(self, other);
        a == b
    }

    /// Whether `|self| / |reference|` is at least `threshold_bps` basis points.
    ///
    /// Evaluated in integers. Against a zero reference any non-zero value is
    /// significant.
    pub fn is_significant_relative_to(&self, reference: &Self, threshold_bps: u32) -> bool {
        let (delta, reference, _) = Self::normalize(self, reference);
        if reference == 0 {
            return delta != 0;
        }
        let delta = i128::from(delta).abs() * 10_000;
        let floor = i128::from(reference).abs() * i128::from(threshold_bps);
        delta >= floor
    }

    /// Render with exactly `scale` fractional digits.
    pub fn to_decimal_string(&self) -> String {
        if self.scale == 0 {
            return self.amount.to_string();
        }

        let divisor = pow10(self.scale).unsigned_abs();
        let magnitude = self.amount.unsigned_abs();
        let sign = if self.amount < 0 { "-" } else { "" };
        format!(
            "{}{}.{:0>width$}",
            sign,
            magnitude / divisor,
            magnitude % divisor,
            width = self.scale as usize
        )
    }
}

impl Default for FixedPointMoney {
    fn default() -> Self {
        Self::zero(DEFAULT_SCALE)
    }
}

impl fmt::Display for FixedPointMoney {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_decimal_string())
    }
}

impl From<FixedPointMoney> for Decimal {
    fn from(value: FixedPointMoney) -> Self {
        value.to_decimal()
    }
}

impl Add for FixedPointMoney {
    type Output = FixedPointMoney;

    fn add(self, other: FixedPointMoney) -> Self::Output {
        FixedPointMoney::add(&self, &other)
    }
}

impl Sub for FixedPointMoney {
    type Output = FixedPointMoney;

    fn sub(self, other: FixedPointMoney) -> Self::Output {
        self.subtract(&other)
    }
}

impl Mul for FixedPointMoney {
    type Output = FixedPointMoney;

    fn mul(self, rate: FixedPointMoney) -> Self::Output {
        self.multiply(&rate)
    }
}

impl Div for FixedPointMoney {
    type Output = FixedPointMoney;

    fn div(self, divisor: FixedPointMoney) -> Self::Output {
        self.divide(&divisor)
    }
}

#[derive(Serialize)]
struct MoneyRepr {
    amount: i64,
    scale: u32,
    value: String,
}

#[derive(Deserialize)]
struct MoneyInput {
    amount: Option<i64>,
    scale: Option<u32>,
    value: Option<String>,
}

impl Serialize for FixedPointMoney {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        MoneyRepr {
            amount: self.amount,
            scale: self.scale,
            value: self.to_decimal_string(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FixedPointMoney {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;

        let input = MoneyInput::deserialize(deserializer)?;
        match (input.amount, input.scale, input.value) {
            (Some(amount), Some(scale), _) => {
                FixedPointMoney::new(amount, scale).map_err(D::Error::custom)
            }
            (_, _, Some(value)) if !value.is_empty() => {
                FixedPointMoney::parse(&value, DEFAULT_SCALE).map_err(D::Error::custom)
            }
            _ => Err(D::Error::custom("invalid money JSON format")),
        }
    }
}

/// ISO 4217 currency code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Currency(String);

impl Currency {
    /// Create a new currency from code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().trim().to_uppercase())
    }

    /// Get the currency code.
    pub fn code(&self) -> &str {
        &self.0
    }

    /// Whether the code has the ISO shape of three ASCII letters.
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == 3 && self.0.bytes().all(|b| b.is_ascii_uppercase())
    }

    pub fn usd() -> Self {
        Self::new("USD")
    }

    pub fn eur() -> Self {
        Self::new("EUR")
    }

    pub fn gbp() -> Self {
        Self::new("GBP")
    }

    pub fn jpy() -> Self {
        Self::new("JPY")
    }

    pub fn inr() -> Self {
        Self::new("INR")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Currency {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// An ordered `(from, to)` pair. Used directly as a map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CurrencyPair {
    /// Currency being converted from.
    pub from: Currency,
    /// Currency being converted to.
    pub to: Currency,
}

impl CurrencyPair {
    /// Create a new currency pair.
    pub fn new(from: Currency, to: Currency) -> Self {
        Self { from, to }
    }

    /// Get the inverse pair.
    pub fn inverse(&self) -> Self {
        Self {
            from: self.to.clone(),
            to: self.from.clone(),
        }
    }

    /// Whether either side is `currency`.
    pub fn involves(&self, currency: &Currency) -> bool {
        &self.from == currency || &self.to == currency
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.from, self.to)
    }
}
