//! Daily-archive object store client (C3): resolve per-stream URLs, probe existence,
//! stream a ZIP to a temp file, then hand it to the matching decoder.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use snafu::{Backtrace, Snafu};
use tokio::io::AsyncWriteExt;

use crate::decode::{decode_agg_trades, decode_funding_rates, decode_index_price_klines, decode_klines, decode_mark_price_klines};
use crate::errors::{ErrorKind, IngestError};
use crate::sources::MinuteSource;
use crate::time::day_string;
use crate::transform::minute_builder::RawSourceRows;

/// Errors raised while resolving or fetching a Vision archive.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum VisionError {
    /// `stream` is not one of the closed set this client understands.
    #[snafu(display("unknown vision stream '{stream}', supported: {supported}"))]
    UnknownStream {
        stream: String,
        supported: String,
        backtrace: Backtrace,
    },

    /// The daily archive does not exist on the object store for this stream/day.
    #[snafu(display("no archive for stream '{stream}' symbol '{symbol}' day '{day}'"))]
    MissingArchive {
        stream: String,
        symbol: String,
        day: String,
        backtrace: Backtrace,
    },

    /// The HTTP request itself failed (timeout, connection reset, non-2xx other than 404).
    #[snafu(display("http error fetching {url}: {source}"))]
    Http {
        url: String,
        source: reqwest::Error,
        backtrace: Backtrace,
    },

    /// Writing the downloaded bytes to the temp file failed.
    #[snafu(display("i/o error writing archive to {path}: {source}"))]
    Io {
        path: String,
        source: std::io::Error,
        backtrace: Backtrace,
    },
}

impl VisionError {
    /// Classify per spec §7: a missing archive is permanent-upstream, everything else
    /// network-shaped is transient.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VisionError::UnknownStream { .. } | VisionError::MissingArchive { .. } => ErrorKind::PermanentUpstream,
            VisionError::Http { .. } | VisionError::Io { .. } => ErrorKind::TransientIo,
        }
    }
}

/// One entry in the closed stream registry: stream name, folder template, file template.
/// `{sym}`, `{interval}`, `{date}` are the only substitution tokens.
struct StreamPattern {
    name: &'static str,
    folder: &'static str,
    file: &'static str,
    requires_interval: bool,
}

const STREAM_PATTERNS: &[StreamPattern] = &[
    StreamPattern { name: "klines", folder: "klines/{sym}/{interval}/", file: "{sym}-{interval}-{date}.zip", requires_interval: true },
    StreamPattern { name: "markPriceKlines", folder: "markPriceKlines/{sym}/{interval}/", file: "{sym}-markPriceKlines-{interval}-{date}.zip", requires_interval: true },
    StreamPattern { name: "indexPriceKlines", folder: "indexPriceKlines/{sym}/{interval}/", file: "{sym}-indexPriceKlines-{interval}-{date}.zip", requires_interval: true },
    StreamPattern { name: "premiumIndexKlines", folder: "premiumIndexKlines/{sym}/{interval}/", file: "{sym}-premiumIndexKlines-{interval}-{date}.zip", requires_interval: true },
    StreamPattern { name: "aggTrades", folder: "aggTrades/{sym}/", file: "{sym}-aggTrades-{date}.zip", requires_interval: false },
    StreamPattern { name: "bookTicker", folder: "bookTicker/{sym}/", file: "{sym}-bookTicker-{date}.zip", requires_interval: false },
    StreamPattern { name: "bookDepth", folder: "bookDepth/{sym}/", file: "{sym}-bookDepth-{date}.zip", requires_interval: false },
    StreamPattern { name: "metrics", folder: "metrics/{sym}/", file: "{sym}-metrics-{date}.zip", requires_interval: false },
    StreamPattern { name: "trades", folder: "trades/{sym}/", file: "{sym}-trades-{date}.zip", requires_interval: false },
];

fn lookup_stream(stream: &str) -> Result<&'static StreamPattern, VisionError> {
    STREAM_PATTERNS.iter().find(|p| p.name == stream).ok_or_else(|| {
        let supported = STREAM_PATTERNS.iter().map(|p| p.name).collect::<Vec<_>>().join(", ");
        VisionError::UnknownStream {
            stream: stream.to_string(),
            supported,
            backtrace: Backtrace::capture(),
        }
    })
}

/// Build the archive URL for `stream`/`symbol`/`day`, defaulting `interval` to `"1m"`.
fn build_url(base_url: &str, stream: &str, symbol: &str, day: DateTime<Utc>, interval: Option<&str>) -> Result<String, VisionError> {
    let pattern = lookup_stream(stream)?;
    let interval = if pattern.requires_interval { interval.unwrap_or("1m") } else { "" };
    let date = day_string(day);

    let folder = pattern.folder.replace("{sym}", symbol).replace("{interval}", interval);
    let file = pattern.file.replace("{sym}", symbol).replace("{interval}", interval).replace("{date}", &date);

    Ok(format!("{}/{}{}", base_url.trim_end_matches('/'), folder, file))
}

/// Client for the Binance Vision daily-archive object store.
pub struct VisionClient {
    client: reqwest::Client,
    base_url: String,
    tmp_dir: PathBuf,
}

impl VisionClient {
    pub fn new(client: reqwest::Client, base_url: String, tmp_dir: PathBuf) -> Self {
        Self { client, base_url, tmp_dir }
    }

    /// Probe whether a daily archive exists: HEAD first, falling back to a 1-byte ranged
    /// GET only when the front rejects HEAD outright (403/405), which some object-store
    /// fronts do.
    pub async fn exists(&self, stream: &str, symbol: &str, day: DateTime<Utc>) -> Result<bool, VisionError> {
        let url = build_url(&self.base_url, stream, symbol, day, None)?;

        let head_resp = self
            .client
            .head(&url)
            .send()
            .await
            .map_err(|e| VisionError::Http { url: url.clone(), source: e, backtrace: Backtrace::capture() })?;

        let head_status = head_resp.status().as_u16();
        if head_status == 200 {
            return Ok(true);
        }
        if head_status != 403 && head_status != 405 {
            return Ok(false);
        }

        let fallback_resp = self
            .client
            .get(&url)
            .header("Range", "bytes=0-0")
            .send()
            .await
            .map_err(|e| VisionError::Http { url: url.clone(), source: e, backtrace: Backtrace::capture() })?;
        Ok(fallback_resp.status().is_success() || fallback_resp.status().as_u16() == 206)
    }

    /// Download the daily archive for `stream` to a temp file under `tmp_dir`, returning its
    /// path once the rename from the staging name has completed.
    pub async fn download(&self, stream: &str, symbol: &str, day: DateTime<Utc>) -> Result<PathBuf, VisionError> {
        let url = build_url(&self.base_url, stream, symbol, day, None)?;
        tracing::debug!(url = %url, stream, symbol, "fetching vision archive");
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| VisionError::Http { url: url.clone(), source: e, backtrace: Backtrace::capture() })?;

        if resp.status().as_u16() == 404 {
            tracing::warn!(stream, symbol, day = %day_string(day), "no vision archive for stream/day");
            return Err(VisionError::MissingArchive {
                stream: stream.to_string(),
                symbol: symbol.to_string(),
                day: day_string(day),
                backtrace: Backtrace::capture(),
            });
        }
        let resp = resp.error_for_status().map_err(|e| VisionError::Http { url: url.clone(), source: e, backtrace: Backtrace::capture() })?;

        let staging_name = format!(".{}-{}-{}-{:x}.part", symbol, stream, day_string(day), rand_suffix());
        let staging_path = self.tmp_dir.join(&staging_name);
        write_stream_to_file(resp, &staging_path).await?;

        let final_path = self.tmp_dir.join(format!("{}-{}-{}.zip", symbol, stream, day_string(day)));
        tokio::fs::rename(&staging_path, &final_path).await.map_err(|e| VisionError::Io {
            path: final_path.display().to_string(),
            source: e,
            backtrace: Backtrace::capture(),
        })?;
        tracing::debug!(path = %final_path.display(), "vision archive staged");
        Ok(final_path)
    }
}

async fn write_stream_to_file(resp: reqwest::Response, path: &Path) -> Result<(), VisionError> {
    let mut file = tokio::fs::File::create(path).await.map_err(|e| VisionError::Io {
        path: path.display().to_string(),
        source: e,
        backtrace: Backtrace::capture(),
    })?;
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| VisionError::Http {
            url: path.display().to_string(),
            source: e,
            backtrace: Backtrace::capture(),
        })?;
        file.write_all(&chunk).await.map_err(|e| VisionError::Io {
            path: path.display().to_string(),
            source: e,
            backtrace: Backtrace::capture(),
        })?;
    }
    Ok(())
}

fn rand_suffix() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.subsec_nanos() as u64).unwrap_or(0)
}

#[async_trait]
impl MinuteSource for VisionClient {
    async fn fetch_window(
        &self,
        symbol: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<RawSourceRows, IngestError> {
        let day = window_start;
        let klines_path = self.download("klines", symbol, day).await?;
        let mark_path = self.download("markPriceKlines", symbol, day).await?;
        let index_path = self.download("indexPriceKlines", symbol, day).await?;
        let funding_path = self.download("premiumIndexKlines", symbol, day).await?;
        let agg_path = self.download("aggTrades", symbol, day).await?;

        let klines = decode_klines(&klines_path)?;
        let mark_price_klines = decode_mark_price_klines(&mark_path)?;
        let index_price_klines = decode_index_price_klines(&index_path)?;
        let funding_rates = decode_funding_rates(&funding_path)?;
        let agg_trades = decode_agg_trades(&agg_path)?;

        let window_start_ms = crate::time::minute_epoch_ms(window_start);
        let window_end_ms = crate::time::minute_epoch_ms(window_end);

        Ok(RawSourceRows {
            klines: klines.into_iter().filter(|r| r.open_time_ms >= window_start_ms && r.open_time_ms <= window_end_ms).collect(),
            mark_price_klines,
            index_price_klines,
            agg_trades,
            funding_rates,
            live_snapshots: Default::default(),
        })
    }
}

impl From<VisionError> for IngestError {
    fn from(source: VisionError) -> Self {
        IngestError::Vision { source }
    }
}
