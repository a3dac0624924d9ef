use chrono::{DateTime, Utc};

/// Unix timestamp in fractional seconds, used as a sorted-set score.
pub fn epoch_secs(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}
