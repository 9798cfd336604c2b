//! Time-bucket derivation from block timestamps
//!
//! Day buckets are UTC midnight; week buckets are Sunday 00:00:00 UTC. The
//! bucket timestamp is the aggregate row's identity. Week numbers exist for
//! display and sorting only, never identity.

use chrono::{TimeZone, Utc};

pub const SECONDS_PER_DAY: u64 = 86_400;
pub const SECONDS_PER_WEEK: u64 = 604_800;

/// Unix epoch day zero is a Thursday; Sunday alignment needs a 4-day shift
/// before the week modulo and back after.
const EPOCH_TO_SUNDAY_OFFSET: u64 = 4 * SECONDS_PER_DAY;

/// UTC midnight of the day containing `timestamp`.
pub fn day_start(timestamp: u64) -> u64 {
    timestamp - (timestamp % SECONDS_PER_DAY)
}

/// Sunday 00:00:00 UTC of the week containing `timestamp`. The first partial
/// week of 1970 (its Sunday predates the epoch) clamps to zero.
pub fn week_start(timestamp: u64) -> u64 {
    timestamp.saturating_sub((timestamp + EPOCH_TO_SUNDAY_OFFSET) % SECONDS_PER_WEEK)
}

/// Last second of the week (Saturday 23:59:59 UTC).
pub fn week_end(timestamp: u64) -> u64 {
    week_start(timestamp) + SECONDS_PER_WEEK - 1
}

/// Display-only week number. Identity always uses `week_start`.
pub fn week_number(week_start: u64) -> u64 {
    week_start / SECONDS_PER_WEEK + 1
}

/// Stable `YYYY-MM-DD` string for a bucket timestamp, locale-independent.
pub fn date_string(bucket: u64) -> String {
    match Utc.timestamp_opt(bucket as i64, 0) {
        chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%d").to_string(),
        _ => String::from("invalid-date"),
    }
}
