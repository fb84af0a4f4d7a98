//! Ratekeeper Common Types
//!
//! Shared types used across the Ratekeeper rate engine: the fixed-point
//! monetary value, currency identifiers and time helpers.

pub mod monetary;
pub mod error;
pub mod time;

pub use monetary::*;
pub use error::*;
pub use time::*;
