//! Engine Utilities
//!
//! Common helpers shared across the engine modules.

pub mod time;

pub use time::{days_since, format_datetime, now_millis, now_utc, parse_datetime};
