//! UTC minute/hour flooring and hour-range enumeration.
//!
//! A "minute" everywhere in this crate means a UTC instant with seconds and
//! microseconds zeroed; an "hour" means the same with minutes zeroed too.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};

/// Floor `ts` to the start of its UTC minute (seconds and below zeroed).
pub fn floor_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(ts.year(), ts.month(), ts.day(), ts.hour(), ts.minute(), 0)
        .single()
        .expect("flooring to an existing UTC minute")
}

/// Floor `ts` to the start of its UTC hour.
pub fn floor_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(ts.year(), ts.month(), ts.day(), ts.hour(), 0, 0)
        .single()
        .expect("flooring to an existing UTC hour")
}

/// The last minute of the hour that starts at `hour_start`, i.e. `hour_start + 59m`.
pub fn hour_end_minute(hour_start: DateTime<Utc>) -> DateTime<Utc> {
    hour_start + Duration::minutes(59)
}

/// Epoch milliseconds of the minute-floored instant; Binance's `open_time` convention.
pub fn minute_epoch_ms(ts: DateTime<Utc>) -> i64 {
    floor_to_minute(ts).timestamp_millis()
}

/// `true` if `ms` is an exact minute boundary (`ms % 60_000 == 0`).
pub fn is_minute_aligned_ms(ms: i64) -> bool {
    ms.rem_euclid(60_000) == 0
}

/// Inclusive hour-start sequence from `floor_to_hour(start)` to `floor_to_hour(end)`.
///
/// Returns an empty vector if `end < start`.
pub fn iter_hours(start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
    let mut out = Vec::new();
    let mut h = floor_to_hour(start);
    let last = floor_to_hour(end);
    while h <= last {
        out.push(h);
        h += Duration::hours(1);
    }
    out
}

/// Inclusive minute-start sequence from `floor_to_minute(start)` to `floor_to_minute(end)`.
pub fn iter_minutes(start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
    let mut out = Vec::new();
    let mut m = floor_to_minute(start);
    let last = floor_to_minute(end);
    while m <= last {
        out.push(m);
        m += Duration::minutes(1);
    }
    out
}

/// Number of minutes in `[start, end]` inclusive, i.e. `(end - start)/1min + 1`.
///
/// Returns 0 if `end < start`.
pub fn minute_span_len(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    let start = floor_to_minute(start);
    let end = floor_to_minute(end);
    if end < start {
        return 0;
    }
    (end - start).num_minutes() + 1
}

/// `YYYY-MM-DD` for the UTC calendar day containing `ts`.
pub fn day_string(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d").to_string()
}
