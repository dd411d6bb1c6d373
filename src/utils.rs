//! Utility functions and helpers

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Get current timestamp in milliseconds
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}
