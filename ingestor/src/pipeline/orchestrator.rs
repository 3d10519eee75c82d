//! `MinuteIngestionPipeline`: the band-aware incremental loop (spec §4.8) and the
//! consistency-backfill loop (spec §4.10).

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use ledger::store::StateStore;
use snafu::Backtrace;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::Settings;
use crate::errors::IngestError;
use crate::live::LiveCollector;
use crate::sources::MinuteSource;
use crate::time::{floor_to_hour, floor_to_minute, hour_end_minute, iter_hours};
use crate::transform::minute_builder::{build_canonical_frame, BuildOptions};
use crate::validation::partition_audit::audit_hour_partition_file;
use crate::writer::atomic::AtomicPartitionWriter;

/// Which upstream family an hour should be sourced from, per spec §4.8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionBand {
    /// The hour containing the target horizon, and the current forming hour if open.
    Hot,
    /// Closed hours within `warm_days` of the horizon but not HOT.
    Warm,
    /// Everything older than `warm_days`.
    Cold,
}

/// Pure band classifier: `hour_start` is the floored hour under consideration, `now` is
/// the wall clock, `warm_days` the configured WARM window.
pub fn classify_band(hour_start: DateTime<Utc>, now: DateTime<Utc>, warm_days: i64) -> IngestionBand {
    let current_hour = floor_to_hour(now);
    if hour_start >= current_hour {
        return IngestionBand::Hot;
    }
    let warm_cutoff = current_hour - Duration::days(warm_days);
    if hour_start >= warm_cutoff {
        IngestionBand::Warm
    } else {
        IngestionBand::Cold
    }
}

/// Outcome of one `run_once` invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub symbol: String,
    pub partitions_committed: u32,
    pub watermark_before: Option<DateTime<Utc>>,
    pub watermark_after: Option<DateTime<Utc>>,
    pub target_horizon: DateTime<Utc>,
}

/// Outcome of one `run_consistency_backfill` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillSummary {
    pub hours_scanned: u32,
    pub issues_found: u32,
    pub issues_targeted: u32,
    pub hours_repaired: u32,
    pub hours_failed: u32,
    pub issues_remaining: u32,
}

/// Drives the fetch → decode → transform → validate → write → watermark-advance
/// pipeline for one symbol, end to end, one hour at a time (spec §5).
pub struct MinuteIngestionPipeline {
    settings: Settings,
    store: Arc<Mutex<StateStore>>,
    vision: Arc<dyn MinuteSource>,
    rest: Arc<dyn MinuteSource>,
    writer: AtomicPartitionWriter,
    live: Arc<dyn LiveCollector>,
}

impl MinuteIngestionPipeline {
    pub fn new(
        settings: Settings,
        store: StateStore,
        vision: Arc<dyn MinuteSource>,
        rest: Arc<dyn MinuteSource>,
        live: Arc<dyn LiveCollector>,
    ) -> Self {
        let writer = AtomicPartitionWriter::new(settings.root_dir.clone(), settings.symbol.clone());
        Self { settings, store: Arc::new(Mutex::new(store)), vision, rest, writer, live }
    }

    fn source_for(&self, band: IngestionBand) -> Arc<dyn MinuteSource> {
        match band {
            IngestionBand::Cold | IngestionBand::Warm => self.vision.clone(),
            IngestionBand::Hot => self.rest.clone(),
        }
    }

    /// Run once: process every hour from the watermark up to the target horizon, writing
    /// a committed partition for each hour that succeeds and leaving the watermark
    /// untouched past the first failing hour (spec §4.8).
    pub async fn run_once(&self, now: Option<DateTime<Utc>>, max_hours: Option<usize>) -> Result<RunSummary, IngestError> {
        let now = now.unwrap_or_else(Utc::now);
        let target_horizon = floor_to_minute(now - Duration::minutes(self.settings.safety_lag_minutes));

        let watermark_before = self.get_watermark().await?;
        let bootstrap_start = target_horizon - Duration::minutes(self.settings.bootstrap_lookback_minutes);
        let window_floor = watermark_before.unwrap_or(bootstrap_start);

        let mut hours = iter_hours(window_floor, target_horizon);
        if let Some(cap) = max_hours {
            hours.truncate(cap);
        }

        let mut partitions_committed = 0u32;
        let mut last_failed_hour: Option<DateTime<Utc>> = None;

        for hour_start in hours {
            let fetch_start = std::cmp::max(hour_start, window_floor + Duration::minutes(1));
            let fetch_end = std::cmp::min(hour_end_minute(hour_start), target_horizon);
            if fetch_end < fetch_start {
                continue;
            }

            let band = classify_band(hour_start, now, self.settings.warm_days);
            match self.process_hour(band, hour_start, fetch_start, fetch_end, target_horizon).await {
                Ok(()) => partitions_committed += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(hour = %hour_start, error = %e, "hour-level ingestion failure, watermark held");
                    last_failed_hour = Some(hour_start);
                    break;
                }
            }
        }

        let advance_horizon = last_failed_hour.map(|h| h - Duration::minutes(1)).unwrap_or(target_horizon);
        let watermark_after = self.advance_watermark(advance_horizon).await?;

        Ok(RunSummary {
            symbol: self.settings.symbol.clone(),
            partitions_committed,
            watermark_before,
            watermark_after,
            target_horizon,
        })
    }

    async fn process_hour(
        &self,
        band: IngestionBand,
        hour_start: DateTime<Utc>,
        fetch_start: DateTime<Utc>,
        fetch_end: DateTime<Utc>,
        target_horizon: DateTime<Utc>,
    ) -> Result<(), IngestError> {
        let source = self.source_for(band);
        let mut raw = source.fetch_window(&self.settings.symbol, fetch_start, fetch_end).await?;

        if band == IngestionBand::Hot {
            let mut snapshots = std::collections::HashMap::new();
            for minute in crate::time::iter_minutes(fetch_start, fetch_end) {
                if let Some(s) = self.live.snapshot(minute).await {
                    snapshots.insert(minute, s);
                }
            }
            raw.live_snapshots = snapshots;
        }

        let allow_trailing_truncation = hour_end_minute(hour_start) > target_horizon;
        let opts = BuildOptions { max_ffill_minutes: self.settings.max_ffill_minutes, allow_trailing_truncation };
        let frame = build_canonical_frame(fetch_start, fetch_end, &raw, &opts)?;

        tracing::debug!(hour = %hour_start, rows = frame.height(), "canonical frame built");

        let store = self.store.clone();
        let writer_root = self.writer_root();
        let symbol = self.settings.symbol.clone();

        tokio::task::spawn_blocking(move || {
            let writer = AtomicPartitionWriter::new(writer_root, symbol);
            let mut store = store.blocking_lock();
            writer.write_hour_partition(&mut store, hour_start, frame)
        })
        .await
        .map_err(|e| IngestError::Fatal { message: e.to_string(), backtrace: Backtrace::capture() })??;

        Ok(())
    }

    fn writer_root(&self) -> String {
        self.settings.root_dir.clone()
    }

    async fn get_watermark(&self) -> Result<Option<DateTime<Utc>>, IngestError> {
        let store = self.store.clone();
        let symbol = self.settings.symbol.clone();
        tokio::task::spawn_blocking(move || store.blocking_lock().get_watermark(&symbol))
            .await
            .map_err(|e| IngestError::Fatal { message: e.to_string(), backtrace: Backtrace::capture() })?
            .map_err(|e| IngestError::Fatal { message: e.to_string(), backtrace: Backtrace::capture() })
    }

    async fn advance_watermark(&self, horizon: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, IngestError> {
        let store = self.store.clone();
        let symbol = self.settings.symbol.clone();
        let latest = tokio::task::spawn_blocking({
            let store = store.clone();
            let symbol = symbol.clone();
            move || store.blocking_lock().latest_committed_at_or_before(&symbol, horizon)
        })
        .await
        .map_err(|e| IngestError::Fatal { message: e.to_string(), backtrace: Backtrace::capture() })?
        .map_err(|e| IngestError::Fatal { message: e.to_string(), backtrace: Backtrace::capture() })?;

        if let Some(minute) = latest {
            tokio::task::spawn_blocking(move || store.blocking_lock().upsert_watermark(&symbol, minute))
                .await
                .map_err(|e| IngestError::Fatal { message: e.to_string(), backtrace: Backtrace::capture() })?
                .map_err(|e| IngestError::Fatal { message: e.to_string(), backtrace: Backtrace::capture() })?;
        }
        Ok(latest)
    }

    /// Loop `run_once` on a polling interval. Typed errors are logged and the loop
    /// continues; anything else is treated as fatal and exits the loop.
    pub async fn run_daemon(&self, poll_seconds: u64) -> Result<(), IngestError> {
        loop {
            match self.run_once(None, None).await {
                Ok(summary) => info!(?summary, "run_once completed"),
                Err(e) if !e.is_fatal() => warn!(error = %e, "run_once hour-level failure, continuing"),
                Err(e) => return Err(e),
            }
            tokio::time::sleep(std::time::Duration::from_secs(poll_seconds)).await;
        }
    }

    /// Scan `[start, end]` for audit failures and repair up to `max_missing_hours` of
    /// them, per spec §4.10.
    pub async fn run_consistency_backfill(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        now_for_band: DateTime<Utc>,
        sleep_seconds: u64,
        max_missing_hours: Option<u32>,
    ) -> Result<BackfillSummary, IngestError> {
        let hours = iter_hours(start, end);
        let mut hours_scanned = 0u32;
        let mut failing_hours = Vec::new();

        for hour_start in &hours {
            hours_scanned += 1;
            let expected_start = std::cmp::max(*hour_start, start);
            let expected_end = std::cmp::min(hour_end_minute(*hour_start), end);
            let path = self.writer.partition_path(*hour_start);

            let result = audit_hour_partition_file(&path, expected_start, expected_end);
            if !result.is_valid {
                failing_hours.push(*hour_start);
            }
        }

        let issues_found = failing_hours.len() as u32;
        let cap = max_missing_hours.unwrap_or(issues_found) as usize;
        let (targeted, remaining) = failing_hours.split_at(cap.min(failing_hours.len()));
        let issues_targeted = targeted.len() as u32;

        let mut hours_repaired = 0u32;
        let mut hours_failed = 0u32;

        for (i, hour_start) in targeted.iter().enumerate() {
            let fetch_start = *hour_start;
            let fetch_end = hour_end_minute(*hour_start);
            let band = classify_band(*hour_start, now_for_band, self.settings.warm_days);

            match self.process_hour(band, *hour_start, fetch_start, fetch_end, fetch_end).await {
                Ok(()) => hours_repaired += 1,
                Err(_) => hours_failed += 1,
            }

            if i + 1 < targeted.len() {
                tokio::time::sleep(std::time::Duration::from_secs(sleep_seconds)).await;
            }
        }

        Ok(BackfillSummary {
            hours_scanned,
            issues_found,
            issues_targeted,
            hours_repaired,
            hours_failed,
            issues_remaining: remaining.len() as u32,
        })
    }

    /// Release the underlying ledger connection. A no-op beyond dropping the handle,
    /// since `StateStore` opens and closes connections per call already.
    pub async fn close(&self) {}
}
