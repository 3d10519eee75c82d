//! Exercises the HOT band with a real `RestClient` (not a `MinuteSource` test double),
//! verifying the pipeline actually assembles a non-empty canonical frame from the REST
//! klines + premium-index endpoints and never falls back to the Vision source.

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use ledger::store::StateStore;
use tempfile::TempDir;

use ingestor::config::Settings;
use ingestor::errors::IngestError;
use ingestor::live::NoopLiveCollector;
use ingestor::pipeline::orchestrator::MinuteIngestionPipeline;
use ingestor::sources::rest::{RawResponse, RestClient, Transport};
use ingestor::sources::MinuteSource;
use ingestor::transform::minute_builder::RawSourceRows;

/// Synthesizes Binance-shaped JSON keyed off the query string of the requested URL, so
/// the client under test drives real URL construction rather than a canned response.
struct FakeBinanceTransport {
    urls_seen: Mutex<Vec<String>>,
}

impl FakeBinanceTransport {
    fn new() -> Self {
        Self { urls_seen: Mutex::new(Vec::new()) }
    }

    fn call_count(&self) -> usize {
        self.urls_seen.lock().unwrap().len()
    }
}

fn query_param(url: &str, name: &str) -> Option<i64> {
    let query = url.split('?').nth(1)?;
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == name).then(|| v.parse().ok()).flatten()
    })
}

#[async_trait]
impl Transport for FakeBinanceTransport {
    async fn get(&self, url: &str) -> Result<RawResponse, String> {
        self.urls_seen.lock().unwrap().push(url.to_string());

        if url.contains("/fapi/v1/klines") {
            let start = query_param(url, "startTime").expect("startTime present");
            let end = query_param(url, "endTime").expect("endTime present");
            let mut entries = Vec::new();
            let mut ms = start;
            while ms <= end {
                entries.push(format!(
                    r#"[{ms},"100.0","101.0","99.0","100.5","2.0",{close_ms},"200000.0",20,"1.0","100000.0","0"]"#,
                    ms = ms,
                    close_ms = ms + 59_999,
                ));
                ms += 60_000;
            }
            let body = format!("[{}]", entries.join(","));
            return Ok(RawResponse { status: 200, retry_after_secs: None, body });
        }

        if url.contains("/fapi/v1/premiumIndex") {
            let body = r#"{"markPrice":"100.4","indexPrice":"100.3","predictedFundingRate":"0.0001"}"#.to_string();
            return Ok(RawResponse { status: 200, retry_after_secs: None, body });
        }

        Err(format!("unexpected url in HOT-band test: {url}"))
    }
}

/// A `MinuteSource` that panics if the HOT band ever falls back to it, proving the
/// orchestrator routed entirely through the REST client.
struct PanicIfCalledSource;

#[async_trait]
impl MinuteSource for PanicIfCalledSource {
    async fn fetch_window(
        &self,
        _symbol: &str,
        _window_start: chrono::DateTime<Utc>,
        _window_end: chrono::DateTime<Utc>,
    ) -> Result<RawSourceRows, IngestError> {
        panic!("HOT band must not fall back to the Vision source");
    }
}

fn settings(root_dir: &TempDir, state_db: &TempDir) -> Settings {
    Settings {
        symbol: "BTCUSDT".to_string(),
        root_dir: root_dir.path().to_string_lossy().to_string(),
        state_db: state_db.path().join("ledger.db").to_string_lossy().to_string(),
        vision_base_url: "https://data.binance.vision".to_string(),
        rest_base_url: "https://fapi.example".to_string(),
        safety_lag_minutes: 0,
        bootstrap_lookback_minutes: 2,
        warm_days: 5,
        max_ffill_minutes: 60,
        rest_retries: 3,
        log_level: "info".to_string(),
    }
}

#[tokio::test]
async fn hot_band_commits_a_partition_built_from_real_rest_klines_and_premium_index() {
    let lake = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let settings = settings(&lake, &state);
    let store = StateStore::initialize(&settings.state_db).unwrap();

    let transport = Arc::new(FakeBinanceTransport::new());
    let rest: Arc<dyn MinuteSource> = Arc::new(RestClient::with_transport(
        transport.clone(),
        settings.rest_base_url.clone(),
        settings.rest_retries,
    ));
    let vision: Arc<dyn MinuteSource> = Arc::new(PanicIfCalledSource);

    let pipeline = MinuteIngestionPipeline::new(settings, store, vision, rest, Arc::new(NoopLiveCollector));

    // now=10:05, safety_lag=0 -> horizon=10:05; bootstrap_lookback=2 -> window floor 10:03,
    // both of which floor to the 10:00 hour, which is >= the current hour so it's HOT.
    let now = Utc.with_ymd_and_hms(2026, 1, 15, 10, 5, 0).unwrap();
    let summary = pipeline.run_once(Some(now), None).await.unwrap();

    assert_eq!(summary.partitions_committed, 1);
    assert!(summary.watermark_after.is_some());
    assert!(summary.watermark_after.unwrap() <= summary.target_horizon);

    // One klines call and one premium-index call; the window never touched vision.
    assert_eq!(transport.call_count(), 2);
    let urls = transport.urls_seen.lock().unwrap();
    assert!(urls.iter().any(|u| u.contains("/fapi/v1/klines")));
    assert!(urls.iter().any(|u| u.contains("/fapi/v1/premiumIndex")));
}
