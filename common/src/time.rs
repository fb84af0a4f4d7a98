//! Time utilities and constants for the rate engine.

use chrono::{DateTime, Duration, Utc};

/// Rate engine timing constants.
pub mod constants {
    use super::Duration;

    /// Base rate lifetime (1 hour).
    pub fn base_rate_ttl() -> Duration {
        Duration::hours(1)
    }

    /// Adjustment lifetime (5 minutes).
    pub fn adjustment_ttl() -> Duration {
        Duration::minutes(5)
    }

    /// Maximum age of a rate the conversion path will trust (5 minutes).
    pub fn max_rate_age() -> Duration {
        Duration::minutes(5)
    }

    /// Oldest conversion date accepted (90 days).
    pub fn history_window() -> Duration {
        Duration::days(90)
    }
}

/// A timestamp with timezone (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Age of `timestamp` relative to `reference`, never negative.
pub fn age_at(timestamp: Timestamp, reference: Timestamp) -> Duration {
    let age = reference - timestamp;
    if age < Duration::zero() {
        Duration::zero()
    } else {
        age
    }
}

/// Whether `timestamp` is older than `max_age` as of now.
pub fn is_older_than(timestamp: Timestamp, max_age: Duration) -> bool {
    age_at(timestamp, now()) > max_age
}

/// Duration extensions for convenient construction.
pub trait DurationExt {
    fn as_std(&self) -> std::time::Duration;
}

impl DurationExt for Duration {
    fn as_std(&self) -> std::time::Duration {
        self.to_std().unwrap_or(std::time::Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_age_at_clamps_future() {
        let reference = now();
        let future = reference + Duration::seconds(10);
        assert_eq!(age_at(future, reference), Duration::zero());
        assert_eq!(
            age_at(reference - Duration::seconds(10), reference),
            Duration::seconds(10)
        );
    }

    #[test]
    fn test_is_older_than() {
        let recent = now() - Duration::seconds(10);
        assert!(!is_older_than(recent, constants::max_rate_age()));

        let old = now() - Duration::minutes(10);
        assert!(is_older_than(old, constants::max_rate_age()));
    }

    #[test]
    fn test_duration_as_std() {
        assert_eq!(Duration::seconds(-5).as_std(), std::time::Duration::ZERO);
        assert_eq!(
            constants::adjustment_ttl().as_std(),
            std::time::Duration::from_secs(300)
        );
    }
}
