//! End-to-end exercise of `MinuteIngestionPipeline::run_once` against a real, temp-dir
//! backed `StateStore` and a scripted `MinuteSource`, mirroring the ledger crate's own
//! `tests/sqlite_migrations.rs`: construct through public APIs only, assert on observable
//! state (files on disk, ledger rows, watermark), no internals.

use std::sync::Mutex;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use ledger::store::StateStore;
use snafu::Backtrace;
use tempfile::TempDir;

use ingestor::config::Settings;
use ingestor::decode::KlineRow;
use ingestor::errors::IngestError;
use ingestor::live::NoopLiveCollector;
use ingestor::pipeline::orchestrator::MinuteIngestionPipeline;
use ingestor::sources::rest::RestError;
use ingestor::sources::MinuteSource;
use ingestor::time::{floor_to_hour, iter_minutes, minute_epoch_ms};
use ingestor::transform::minute_builder::RawSourceRows;

/// A `MinuteSource` that hands back a flat kline for every requested minute, except for
/// one configured hour it fails outright (simulating an upstream outage).
struct ScriptedSource {
    fail_hour: Option<DateTime<Utc>>,
    fatal_hour: Option<DateTime<Utc>>,
    calls: Mutex<Vec<DateTime<Utc>>>,
}

impl ScriptedSource {
    fn new(fail_hour: Option<DateTime<Utc>>) -> Self {
        Self { fail_hour, fatal_hour: None, calls: Mutex::new(Vec::new()) }
    }

    fn with_fatal_hour(fatal_hour: DateTime<Utc>) -> Self {
        Self { fail_hour: None, fatal_hour: Some(fatal_hour), calls: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl MinuteSource for ScriptedSource {
    async fn fetch_window(
        &self,
        _symbol: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<RawSourceRows, IngestError> {
        self.calls.lock().unwrap().push(window_start);

        if self.fatal_hour == Some(floor_to_hour(window_start)) {
            return Err(IngestError::Fatal {
                message: "state database unreachable".to_string(),
                backtrace: Backtrace::capture(),
            });
        }

        if self.fail_hour == Some(floor_to_hour(window_start)) {
            return Err(IngestError::Rest {
                source: RestError::ClientError {
                    url: "https://fapi.example/fapi/v1/premiumIndex".to_string(),
                    status: 418,
                    body: "teapot".to_string(),
                    backtrace: Backtrace::capture(),
                },
            });
        }

        let klines = iter_minutes(window_start, window_end)
            .into_iter()
            .map(|m| KlineRow {
                open_time_ms: minute_epoch_ms(m),
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.5,
                volume_btc: 1.0,
                volume_usdt: 100.0,
                trade_count: 1,
                taker_buy_vol_btc: 0.5,
                taker_buy_vol_usdt: 50.0,
            })
            .collect();
        Ok(RawSourceRows { klines, ..Default::default() })
    }
}

fn settings(root_dir: &TempDir, state_db: &TempDir) -> Settings {
    Settings {
        symbol: "BTCUSDT".to_string(),
        root_dir: root_dir.path().to_string_lossy().to_string(),
        state_db: state_db.path().join("ledger.db").to_string_lossy().to_string(),
        vision_base_url: "https://data.binance.vision".to_string(),
        rest_base_url: "https://fapi.binance.com".to_string(),
        safety_lag_minutes: 0,
        bootstrap_lookback_minutes: 120,
        warm_days: 5,
        max_ffill_minutes: 60,
        rest_retries: 3,
        log_level: "info".to_string(),
    }
}

fn pipeline(settings: Settings, store: StateStore, source: Arc<dyn MinuteSource>) -> MinuteIngestionPipeline {
    MinuteIngestionPipeline::new(settings, store, source.clone(), source, Arc::new(NoopLiveCollector))
}

#[tokio::test]
async fn run_once_bootstraps_from_scratch_and_is_idempotent_at_the_horizon() {
    let lake = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let settings = settings(&lake, &state);
    let store = StateStore::initialize(&settings.state_db).unwrap();
    let source: Arc<dyn MinuteSource> = Arc::new(ScriptedSource::new(None));
    let pipeline = pipeline(settings, store, source);

    let now = Utc.with_ymd_and_hms(2026, 1, 15, 10, 5, 0).unwrap();

    let first = pipeline.run_once(Some(now), None).await.unwrap();
    assert!(first.watermark_before.is_none());
    assert!(first.partitions_committed >= 1);
    let watermark_after = first.watermark_after.expect("watermark should advance");
    assert!(watermark_after <= first.target_horizon);

    // Running again at the same horizon with nothing new upstream should commit nothing
    // further and leave the watermark exactly where it was.
    let second = pipeline.run_once(Some(now), None).await.unwrap();
    assert_eq!(second.partitions_committed, 0);
    assert_eq!(second.watermark_after, Some(watermark_after));
}

#[tokio::test]
async fn run_once_holds_the_watermark_at_the_last_hour_before_a_failure() {
    let lake = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let settings = settings(&lake, &state);
    let store = StateStore::initialize(&settings.state_db).unwrap();

    let fail_hour = Utc.with_ymd_and_hms(2026, 1, 15, 8, 0, 0).unwrap();
    let source: Arc<dyn MinuteSource> = Arc::new(ScriptedSource::new(Some(fail_hour)));
    let pipeline = pipeline(settings, store, source);

    let now = Utc.with_ymd_and_hms(2026, 1, 15, 9, 5, 0).unwrap();
    let summary = pipeline.run_once(Some(now), None).await.unwrap();

    // Only the 07:00 hour (ahead of the 08:00 failure) should have committed.
    assert_eq!(summary.partitions_committed, 1);
    assert_eq!(summary.watermark_after, Some(Utc.with_ymd_and_hms(2026, 1, 15, 7, 59, 0).unwrap()));
}

#[tokio::test]
async fn run_once_aborts_the_whole_run_on_a_fatal_error_instead_of_holding_the_watermark() {
    let lake = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let settings = settings(&lake, &state);
    let store = StateStore::initialize(&settings.state_db).unwrap();

    let fatal_hour = Utc.with_ymd_and_hms(2026, 1, 15, 8, 0, 0).unwrap();
    let source: Arc<dyn MinuteSource> = Arc::new(ScriptedSource::with_fatal_hour(fatal_hour));
    let pipeline = pipeline(settings, store, source);

    let now = Utc.with_ymd_and_hms(2026, 1, 15, 9, 5, 0).unwrap();
    let err = pipeline.run_once(Some(now), None).await.unwrap_err();
    assert!(err.is_fatal());
}
