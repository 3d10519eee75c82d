//! DQ validator (C7): column-presence, uniqueness, and HARD_REQUIRED non-null checks.

use chrono::{DateTime, Utc};
use polars::prelude::*;
use snafu::{Backtrace, Snafu};

use crate::errors::{ErrorKind, IngestError};
use crate::schema::{canonical_column_names, hard_required_columns};

/// A failed data-quality check against a canonical frame.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DataQualityError {
    /// The frame's column set did not cover the canonical list.
    #[snafu(display("Missing canonical columns: {missing:?}"))]
    MissingColumns { missing: Vec<String>, backtrace: Backtrace },

    /// More than one row shared a `timestamp` bucket.
    #[snafu(display("Found {count} duplicated timestamp buckets"))]
    DuplicateTimestamps { count: usize, backtrace: Backtrace },

    /// At least one HARD_REQUIRED column contained a null.
    #[snafu(display("HARD_REQUIRED null violations: {violations}"))]
    HardRequiredNulls { violations: String, backtrace: Backtrace },

    /// A polars operation needed to run a check failed.
    #[snafu(display("error inspecting frame: {source}"))]
    Polars { source: PolarsError, backtrace: Backtrace },
}

impl DataQualityError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::DataQualityFailure
    }
}

/// Summary returned on successful validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DqResult {
    pub row_count: usize,
    pub min_ts: DateTime<Utc>,
    pub max_ts: DateTime<Utc>,
}

/// Validate `frame` against the three checks in spec §4.6, in order; each short-circuits
/// via `?`, so the first failing check is the one returned.
pub fn validate(frame: &DataFrame) -> Result<DqResult, DataQualityError> {
    check_columns(frame)?;
    check_unique_timestamps(frame)?;
    check_hard_required_non_null(frame)?;

    let ts_col = frame.column("timestamp").map_err(|e| DataQualityError::Polars { source: e, backtrace: Backtrace::capture() })?;
    let ts = ts_col.datetime().map_err(|e| DataQualityError::Polars { source: e, backtrace: Backtrace::capture() })?;

    let min_ms = ts.min().expect("non-empty frame already checked by caller");
    let max_ms = ts.max().expect("non-empty frame already checked by caller");

    Ok(DqResult {
        row_count: frame.height(),
        min_ts: DateTime::from_timestamp_millis(min_ms).expect("valid epoch ms"),
        max_ts: DateTime::from_timestamp_millis(max_ms).expect("valid epoch ms"),
    })
}

fn check_columns(frame: &DataFrame) -> Result<(), DataQualityError> {
    let present: std::collections::HashSet<&str> = frame.get_column_names().into_iter().map(|s| s.as_str()).collect();
    let mut missing: Vec<String> = canonical_column_names()
        .into_iter()
        .filter(|c| !present.contains(c))
        .map(String::from)
        .collect();
    if !missing.is_empty() {
        missing.sort();
        return Err(DataQualityError::MissingColumns { missing, backtrace: Backtrace::capture() });
    }
    Ok(())
}

fn check_unique_timestamps(frame: &DataFrame) -> Result<(), DataQualityError> {
    let ts = frame.column("timestamp").map_err(|e| DataQualityError::Polars { source: e, backtrace: Backtrace::capture() })?;
    let unique_count = ts.n_unique().map_err(|e| DataQualityError::Polars { source: e, backtrace: Backtrace::capture() })?;
    let dup_buckets = frame.height().saturating_sub(unique_count);
    if dup_buckets > 0 {
        return Err(DataQualityError::DuplicateTimestamps { count: dup_buckets, backtrace: Backtrace::capture() });
    }
    Ok(())
}

fn check_hard_required_non_null(frame: &DataFrame) -> Result<(), DataQualityError> {
    let mut violations = Vec::new();
    for col_name in hard_required_columns() {
        let col = frame.column(col_name).map_err(|e| DataQualityError::Polars { source: e, backtrace: Backtrace::capture() })?;
        let nulls = col.null_count();
        if nulls > 0 {
            violations.push(format!("{col_name}={nulls}"));
        }
    }
    if !violations.is_empty() {
        return Err(DataQualityError::HardRequiredNulls { violations: violations.join(", "), backtrace: Backtrace::capture() });
    }
    Ok(())
}

impl From<DataQualityError> for IngestError {
    fn from(source: DataQualityError) -> Self {
        IngestError::DataQuality { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::transform::minute_builder::{build_canonical_frame, BuildOptions, RawSourceRows};
    use crate::decode::KlineRow;
    use crate::time::minute_epoch_ms;

    fn valid_frame() -> DataFrame {
        let minute = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        let raw = RawSourceRows {
            klines: vec![KlineRow {
                open_time_ms: minute_epoch_ms(minute),
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.5,
                volume_btc: 2.0,
                volume_usdt: 200_000.0,
                trade_count: 20,
                taker_buy_vol_btc: 1.0,
                taker_buy_vol_usdt: 100_000.0,
            }],
            ..Default::default()
        };
        build_canonical_frame(minute, minute, &raw, &BuildOptions::default()).unwrap()
    }

    #[test]
    fn accepts_a_well_formed_single_minute_frame() {
        let frame = valid_frame();
        let result = validate(&frame).unwrap();
        assert_eq!(result.row_count, 1);
    }

    #[test]
    fn rejects_a_frame_missing_a_canonical_column() {
        let frame = valid_frame().drop("index_price_close").unwrap();
        let err = validate(&frame).unwrap_err();
        assert!(matches!(err, DataQualityError::MissingColumns { .. }));
    }
}
