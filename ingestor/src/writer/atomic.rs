//! Atomic partition writer (C8): merge-on-conflict, stage-rename, hash, ledger upsert
//! as a single transactional unit from the filesystem's perspective.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};
use ledger::models::{NewPartition, PartitionStatus};
use ledger::store::StateStore;
use polars::prelude::*;
use sha2::{Digest, Sha256};
use snafu::{Backtrace, Snafu};

use crate::errors::{ErrorKind, IngestError};
use crate::schema::{canonical_column_names, schema_hash_input};
use crate::time::day_string;
use crate::validation::dq::{self, DataQualityError};

const HASH_CHUNK_BYTES: usize = 1024 * 1024;

/// Errors raised by the atomic partition writer.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WriterError {
    /// The frame to write (after any merge with an existing partition) failed DQ.
    #[snafu(display("partition failed data quality validation: {source}"))]
    DataQuality {
        #[snafu(backtrace)]
        source: DataQualityError,
    },

    /// Reading or writing a parquet file failed.
    #[snafu(display("parquet i/o error on {path}: {source}"))]
    Parquet {
        path: String,
        source: PolarsError,
        backtrace: Backtrace,
    },

    /// Generic filesystem failure (directory creation, rename, hashing read).
    #[snafu(display("i/o error on {path}: {source}"))]
    Io {
        path: String,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// The ledger upsert failed after the file was already committed to disk.
    #[snafu(display("ledger upsert failed for {symbol}/{day}/{hour}: {message}"))]
    Ledger {
        symbol: String,
        day: String,
        hour: i32,
        message: String,
        backtrace: Backtrace,
    },
}

impl WriterError {
    /// A writer failure is always fatal per spec §7 (state DB or filesystem trouble, not
    /// a retryable per-hour condition).
    pub fn kind(&self) -> ErrorKind {
        match self {
            WriterError::DataQuality { .. } => ErrorKind::DataQualityFailure,
            _ => ErrorKind::Fatal,
        }
    }
}

impl From<WriterError> for IngestError {
    fn from(source: WriterError) -> Self {
        IngestError::Writer { source }
    }
}

/// Writes canonical hour frames into the partitioned parquet tree and upserts the
/// corresponding ledger row, per spec §4.7.
pub struct AtomicPartitionWriter {
    root_dir: PathBuf,
    symbol: String,
}

impl AtomicPartitionWriter {
    pub fn new(root_dir: impl Into<PathBuf>, symbol: impl Into<String>) -> Self {
        Self { root_dir: root_dir.into(), symbol: symbol.into() }
    }

    /// Deterministic path for the hour starting at `hour_start`, per spec §3.
    pub fn partition_path(&self, hour_start: DateTime<Utc>) -> PathBuf {
        self.root_dir
            .join("futures")
            .join("um")
            .join("minute")
            .join(format!("symbol={}", self.symbol))
            .join(format!("year={:04}", hour_start.year()))
            .join(format!("month={:02}", hour_start.month()))
            .join(format!("day={:02}", hour_start.day()))
            .join(format!("hour={:02}", hour_start.hour()))
            .join("part.parquet")
    }

    fn tmp_dir(&self) -> PathBuf {
        self.root_dir.join(".tmp")
    }

    /// Write `frame` (one hour's worth of canonical rows) for `hour_start`, merging with
    /// any existing partition at the same path, validating, staging, renaming, hashing,
    /// and upserting the ledger row. Returns the final path on success.
    pub fn write_hour_partition(
        &self,
        store: &mut StateStore,
        hour_start: DateTime<Utc>,
        frame: DataFrame,
    ) -> Result<PathBuf, WriterError> {
        use chrono::Timelike;

        let final_path = self.partition_path(hour_start);
        let mut effective = self.merge_on_conflict(&final_path, frame)?;

        let dq_result = dq::validate(&effective).map_err(|e| WriterError::DataQuality { source: e })?;

        std::fs::create_dir_all(self.tmp_dir()).map_err(|e| WriterError::Io {
            path: self.tmp_dir().display().to_string(),
            source: e,
            backtrace: Backtrace::capture(),
        })?;
        std::fs::create_dir_all(final_path.parent().expect("partition path always has a parent")).map_err(|e| WriterError::Io {
            path: final_path.display().to_string(),
            source: e,
            backtrace: Backtrace::capture(),
        })?;

        let staging_path = self.tmp_dir().join(format!("{:x}.parquet", rand_suffix()));
        write_parquet_file(&mut effective, &staging_path)?;

        std::fs::rename(&staging_path, &final_path).map_err(|e| WriterError::Io {
            path: final_path.display().to_string(),
            source: e,
            backtrace: Backtrace::capture(),
        })?;

        let schema_hash = sha256_hex(schema_hash_input().as_bytes());
        let content_hash = sha256_file(&final_path)?;

        let entry = NewPartition {
            symbol: self.symbol.clone(),
            day: day_string(hour_start),
            hour: hour_start.hour() as i32,
            path: final_path.display().to_string(),
            row_count: dq_result.row_count as i64,
            min_ts: dq_result.min_ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            max_ts: dq_result.max_ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            schema_hash,
            content_hash,
            status: PartitionStatus::Committed,
            committed_at_utc: Some(Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
        };

        store.upsert_partition(&entry).map_err(|e| WriterError::Ledger {
            symbol: self.symbol.clone(),
            day: day_string(hour_start),
            hour: hour_start.hour() as i32,
            message: e.to_string(),
            backtrace: Backtrace::capture(),
        })?;

        tracing::info!(
            symbol = %self.symbol,
            day = %entry.day,
            hour = entry.hour,
            row_count = entry.row_count,
            path = %final_path.display(),
            "partition committed"
        );

        Ok(final_path)
    }

    fn merge_on_conflict(&self, final_path: &Path, incoming: DataFrame) -> Result<DataFrame, WriterError> {
        if !final_path.exists() {
            return reproject(incoming);
        }

        let file = File::open(final_path).map_err(|e| WriterError::Io {
            path: final_path.display().to_string(),
            source: e,
            backtrace: Backtrace::capture(),
        })?;
        let existing = ParquetReader::new(file).finish().map_err(|e| WriterError::Parquet {
            path: final_path.display().to_string(),
            source: e,
            backtrace: Backtrace::capture(),
        })?;

        let combined = existing.vstack(&incoming).map_err(|e| WriterError::Parquet {
            path: final_path.display().to_string(),
            source: e,
            backtrace: Backtrace::capture(),
        })?;

        // Sort ascending by timestamp, then keep="last" on dedup so rows from `incoming`
        // (appended after `existing`) win any overlap.
        let sorted = combined
            .sort(["timestamp"], SortMultipleOptions::default())
            .map_err(|e| WriterError::Parquet { path: final_path.display().to_string(), source: e, backtrace: Backtrace::capture() })?;

        let deduped = sorted
            .unique_stable(Some(&["timestamp".to_string()]), UniqueKeepStrategy::Last, None)
            .map_err(|e| WriterError::Parquet { path: final_path.display().to_string(), source: e, backtrace: Backtrace::capture() })?;

        let reprojected = reproject(deduped)?;
        reprojected
            .sort(["timestamp"], SortMultipleOptions::default())
            .map_err(|e| WriterError::Parquet { path: final_path.display().to_string(), source: e, backtrace: Backtrace::capture() })
    }
}

fn reproject(frame: DataFrame) -> Result<DataFrame, WriterError> {
    frame
        .select(canonical_column_names())
        .map_err(|e| WriterError::Parquet { path: "<in-memory merge>".to_string(), source: e, backtrace: Backtrace::capture() })
}

/// Write `frame` to `path` as parquet with zstd compression and full column statistics,
/// per spec §4.7 step 4. Shared between the writer and test fixtures that need a real
/// parquet file on disk without going through the full commit sequence.
pub fn write_parquet_file(frame: &mut DataFrame, path: &Path) -> Result<(), WriterError> {
    let file = File::create(path).map_err(|e| WriterError::Io {
        path: path.display().to_string(),
        source: e,
        backtrace: Backtrace::capture(),
    })?;
    ParquetWriter::new(file)
        .with_compression(ParquetCompression::Zstd(None))
        .with_statistics(StatisticsOptions::full())
        .finish(frame)
        .map_err(|e| WriterError::Parquet { path: path.display().to_string(), source: e, backtrace: Backtrace::capture() })?;
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

fn sha256_file(path: &Path) -> Result<String, WriterError> {
    let mut file = File::open(path).map_err(|e| WriterError::Io {
        path: path.display().to_string(),
        source: e,
        backtrace: Backtrace::capture(),
    })?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_BYTES];
    loop {
        let n = file.read(&mut buf).map_err(|e| WriterError::Io {
            path: path.display().to_string(),
            source: e,
            backtrace: Backtrace::capture(),
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex_encode(&hasher.finalize()))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn rand_suffix() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.subsec_nanos() as u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    use crate::decode::KlineRow;
    use crate::time::{iter_minutes, minute_epoch_ms};
    use crate::transform::minute_builder::{build_canonical_frame, BuildOptions, RawSourceRows};

    fn open_store(dir: &TempDir) -> StateStore {
        StateStore::initialize(dir.path().join("ledger.db").to_str().unwrap()).unwrap()
    }

    fn hour_frame(start: DateTime<Utc>, end: DateTime<Utc>, value: f64) -> DataFrame {
        let klines = iter_minutes(start, end)
            .into_iter()
            .map(|m| KlineRow {
                open_time_ms: minute_epoch_ms(m),
                open: value,
                high: value,
                low: value,
                close: value,
                volume_btc: 1.0,
                volume_usdt: value,
                trade_count: 1,
                taker_buy_vol_btc: 1.0,
                taker_buy_vol_usdt: value,
            })
            .collect();
        let raw = RawSourceRows { klines, ..Default::default() };
        build_canonical_frame(start, end, &raw, &BuildOptions::default()).unwrap()
    }

    #[test]
    fn writes_a_fresh_partition_and_commits_ledger_entry() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);
        let writer = AtomicPartitionWriter::new(dir.path().join("lake"), "BTCUSDT");

        let start = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 1, 15, 10, 59, 0).unwrap();
        let frame = hour_frame(start, end, 100.0);

        let path = writer.write_hour_partition(&mut store, start, frame).unwrap();
        assert!(path.exists());

        let latest = store.latest_partition("BTCUSDT").unwrap().unwrap();
        assert_eq!(latest.row_count, 60);
    }

    #[test]
    fn write_is_idempotent_on_identical_frame() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);
        let writer = AtomicPartitionWriter::new(dir.path().join("lake"), "BTCUSDT");

        let start = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 1, 15, 10, 59, 0).unwrap();

        writer.write_hour_partition(&mut store, start, hour_frame(start, end, 100.0)).unwrap();
        let first = store.latest_partition("BTCUSDT").unwrap().unwrap();

        writer.write_hour_partition(&mut store, start, hour_frame(start, end, 100.0)).unwrap();
        let second = store.latest_partition("BTCUSDT").unwrap().unwrap();

        assert_eq!(first.row_count, second.row_count);
        assert_eq!(first.min_ts, second.min_ts);
        assert_eq!(first.max_ts, second.max_ts);
        assert_eq!(first.schema_hash, second.schema_hash);
    }

    #[test]
    fn merge_on_conflict_prefers_the_newer_frame_for_overlapping_minutes() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);
        let writer = AtomicPartitionWriter::new(dir.path().join("lake"), "BTCUSDT");

        let start = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 1, 15, 10, 59, 0).unwrap();

        writer.write_hour_partition(&mut store, start, hour_frame(start, end, 100.0)).unwrap();
        writer.write_hour_partition(&mut store, start, hour_frame(start, end, 200.0)).unwrap();

        let path = writer.partition_path(start);
        let file = File::open(&path).unwrap();
        let frame = ParquetReader::new(file).finish().unwrap();
        let open = frame.column("open").unwrap().f64().unwrap();
        assert!(open.into_no_null_iter().all(|v| v == 200.0));
        assert_eq!(frame.height(), 60);
    }
}
