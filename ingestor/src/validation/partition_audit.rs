//! Partition audit (C9): proves that a written partition file matches the minute
//! window it is supposed to cover. Audit failures are data, not raised errors
//! (spec §7 — "not raised").

use std::fs::File;
use std::path::Path;

use chrono::{DateTime, Utc};
use polars::prelude::*;

use crate::schema::{canonical_column_names, hard_required_columns};
use crate::time::{is_minute_aligned_ms, minute_epoch_ms, minute_span_len};

/// The outcome of auditing one partition file against an expected minute window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionAuditResult {
    pub is_valid: bool,
    pub reason: String,
}

impl PartitionAuditResult {
    fn ok() -> Self {
        Self { is_valid: true, reason: "ok".to_string() }
    }

    fn fail(reason: impl Into<String>) -> Self {
        Self { is_valid: false, reason: reason.into() }
    }
}

/// Run the ten ordered checks from spec §4.9 against `path`, returning on the first
/// failure. `expected_start`/`expected_end` may describe a sub-window of a larger,
/// already-full partition (the audit accepts a full-hour file when only asked about a
/// slice of it).
pub fn audit_hour_partition_file(path: &Path, expected_start: DateTime<Utc>, expected_end: DateTime<Utc>) -> PartitionAuditResult {
    // 1. invalid_expected_range
    if expected_end < expected_start {
        return PartitionAuditResult::fail("invalid_expected_range");
    }

    // 2. missing_file
    if !path.exists() {
        return PartitionAuditResult::fail("missing_file");
    }

    // 3. unreadable_parquet
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => return PartitionAuditResult::fail(format!("unreadable_parquet:{}", error_class(&e.to_string()))),
    };
    let schema = match ParquetReader::new(file).schema() {
        Ok(s) => s,
        Err(e) => return PartitionAuditResult::fail(format!("unreadable_parquet:{}", error_class(&e.to_string()))),
    };

    // 4. missing_columns (full canonical set, not just HARD_REQUIRED — a schema missing an
    // optional column is still a written-partition defect worth flagging during backfill).
    let present: std::collections::HashSet<&str> = schema.iter_names().map(|s| s.as_str()).collect();
    let mut missing: Vec<&str> = canonical_column_names().into_iter().filter(|c| !present.contains(c)).collect();
    if !missing.is_empty() {
        missing.sort();
        return PartitionAuditResult::fail(format!("missing_columns:{}", missing.join(",")));
    }

    // 5. read_error (required cols only)
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => return PartitionAuditResult::fail(format!("read_error:{}", error_class(&e.to_string()))),
    };
    let columns: Vec<String> = hard_required_columns().into_iter().map(String::from).collect();
    let frame = match ParquetReader::new(file).with_columns(Some(columns)).finish() {
        Ok(f) => f,
        Err(e) => return PartitionAuditResult::fail(format!("read_error:{}", error_class(&e.to_string()))),
    };

    // 6. duplicate_timestamps
    let ts_col = match frame.column("timestamp") {
        Ok(c) => c,
        Err(e) => return PartitionAuditResult::fail(format!("read_error:{}", error_class(&e.to_string()))),
    };
    let row_count = frame.height();
    let unique_count = ts_col.n_unique().unwrap_or(row_count);
    if unique_count != row_count {
        return PartitionAuditResult::fail("duplicate_timestamps");
    }

    // 7. empty_partition
    if row_count == 0 {
        return PartitionAuditResult::fail("empty_partition");
    }

    let ts = match ts_col.datetime() {
        Ok(t) => t,
        Err(e) => return PartitionAuditResult::fail(format!("read_error:{}", error_class(&e.to_string()))),
    };

    let expected_start_ms = minute_epoch_ms(expected_start);
    let expected_end_ms = minute_epoch_ms(expected_end);

    let mut in_window_ms: Vec<i64> = ts.into_no_null_iter().filter(|ms| *ms >= expected_start_ms && *ms <= expected_end_ms).collect();
    in_window_ms.sort_unstable();

    // 8. row_count_mismatch
    let expected_count = minute_span_len(expected_start, expected_end) as usize;
    if in_window_ms.len() != expected_count {
        return PartitionAuditResult::fail(format!(
            "row_count_mismatch:expected={}:actual={}:window={}..{}",
            expected_count,
            in_window_ms.len(),
            expected_start.to_rfc3339(),
            expected_end.to_rfc3339(),
        ));
    }

    // 9. timestamp_gap_or_order_error
    for (i, ms) in in_window_ms.iter().enumerate() {
        let expected_ms = expected_start_ms + (i as i64) * 60_000;
        if *ms != expected_ms || !is_minute_aligned_ms(*ms) {
            return PartitionAuditResult::fail("timestamp_gap_or_order_error");
        }
    }

    // 10. hard_required_nulls (within window)
    let window_mask = ts.into_iter().map(|v| matches!(v, Some(ms) if ms >= expected_start_ms && ms <= expected_end_ms)).collect::<BooleanChunked>();
    let mut null_violations = Vec::new();
    for col_name in hard_required_columns() {
        let Ok(col) = frame.column(col_name) else { continue };
        let windowed = match col.filter(&window_mask) {
            Ok(w) => w,
            Err(_) => continue,
        };
        let nulls = windowed.null_count();
        if nulls > 0 {
            null_violations.push(format!("{col_name}:{nulls}"));
        }
    }
    if !null_violations.is_empty() {
        return PartitionAuditResult::fail(format!("hard_required_nulls:{}", null_violations.join(",")));
    }

    PartitionAuditResult::ok()
}

fn error_class(message: &str) -> String {
    message.split(':').next().unwrap_or("unknown").to_string()
}
