//! Retry-aware REST client (C4): live premium-index / open-interest fetches.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use serde::Deserialize;
use snafu::{Backtrace, Snafu};

use crate::decode::{FundingRow, KlineRow, PriceKlineRow};
use crate::errors::{ErrorKind, IngestError};
use crate::sources::MinuteSource;
use crate::time::minute_epoch_ms;
use crate::transform::minute_builder::RawSourceRows;

/// Errors raised by [`RestClient`] calls.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RestError {
    /// The transport itself failed (timeout, connection reset).
    #[snafu(display("transport error calling {url}: {source}"))]
    Transport {
        url: String,
        source: String,
        backtrace: Backtrace,
    },

    /// Retries were exhausted against a 429/5xx response.
    #[snafu(display("http {status} from {url} after {attempts} attempts, body: {body}"))]
    RetriesExhausted {
        url: String,
        status: u16,
        attempts: u32,
        body: String,
        backtrace: Backtrace,
    },

    /// A non-429 4xx was returned; per policy this is never retried.
    #[snafu(display("http {status} from {url}, body: {body}"))]
    ClientError {
        url: String,
        status: u16,
        body: String,
        backtrace: Backtrace,
    },

    /// The response body did not match the expected shape.
    #[snafu(display("could not parse response from {url}: {source}"))]
    Decode {
        url: String,
        source: serde_json::Error,
        backtrace: Backtrace,
    },
}

impl RestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RestError::Transport { .. } | RestError::RetriesExhausted { .. } => ErrorKind::TransientIo,
            RestError::ClientError { .. } | RestError::Decode { .. } => ErrorKind::PermanentUpstream,
        }
    }
}

/// A single HTTP response as seen by the retry loop, abstracted away from `reqwest` so
/// tests can inject a scripted sequence of responses (spec §4.3: "transport injection is
/// supported to allow deterministic tests").
pub struct RawResponse {
    pub status: u16,
    pub retry_after_secs: Option<u64>,
    pub body: String,
}

/// The transport seam `RestClient` calls through. `ReqwestTransport` is the production
/// implementation; tests provide a scripted in-memory one.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str) -> Result<RawResponse, String>;
}

/// Production transport backed by `reqwest`.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<RawResponse, String> {
        let resp = self.client.get(url).send().await.map_err(|e| e.to_string())?;
        let status = resp.status().as_u16();
        let retry_after_secs = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let body = resp.text().await.map_err(|e| e.to_string())?;
        Ok(RawResponse { status, retry_after_secs, body })
    }
}

/// Normalized premium-index snapshot (`markPrice`, `indexPrice`, `predictedFundingRate`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PremiumIndex {
    pub mark_price: f64,
    pub index_price: f64,
    pub predicted_funding: f64,
}

#[derive(Deserialize)]
struct RawPremiumIndex {
    #[serde(rename = "markPrice")]
    mark_price: String,
    #[serde(rename = "indexPrice")]
    index_price: String,
    #[serde(rename = "predictedFundingRate")]
    predicted_funding_rate: String,
}

/// Normalized open-interest snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpenInterest {
    pub open_interest: f64,
    pub timestamp_ms: i64,
}

#[derive(Deserialize)]
struct RawOpenInterest {
    #[serde(rename = "openInterest")]
    open_interest: String,
    time: i64,
}

/// One element of `/fapi/v1/klines`'s response array, in wire order: `[openTime, open,
/// high, low, close, volume, closeTime, quoteAssetVolume, numTrades, takerBuyBaseVol,
/// takerBuyQuoteVol, ignore]`. Deserialized positionally since the array mixes numbers
/// and stringified decimals.
type RawKlineEntry = (i64, String, String, String, String, String, i64, String, i64, String, String, String);

fn kline_entry_to_row(e: RawKlineEntry) -> KlineRow {
    KlineRow {
        open_time_ms: e.0,
        open: e.1.parse().unwrap_or(f64::NAN),
        high: e.2.parse().unwrap_or(f64::NAN),
        low: e.3.parse().unwrap_or(f64::NAN),
        close: e.4.parse().unwrap_or(f64::NAN),
        volume_btc: e.5.parse().unwrap_or(f64::NAN),
        volume_usdt: e.7.parse().unwrap_or(f64::NAN),
        trade_count: e.8,
        taker_buy_vol_btc: e.9.parse().unwrap_or(f64::NAN),
        taker_buy_vol_usdt: e.10.parse().unwrap_or(f64::NAN),
    }
}

/// REST client for Binance futures' live endpoints, with bounded 429/5xx retry honoring
/// `Retry-After` and no retry on other 4xx, per spec §4.3.
pub struct RestClient {
    transport: Arc<dyn Transport>,
    base_url: String,
    max_retries: u32,
    limiter: Arc<RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>>,
}

impl RestClient {
    pub fn new(client: reqwest::Client, base_url: String, max_retries: u32) -> Self {
        Self::with_transport(Arc::new(ReqwestTransport::new(client)), base_url, max_retries)
    }

    /// Construct with an injected [`Transport`] for deterministic tests.
    pub fn with_transport(transport: Arc<dyn Transport>, base_url: String, max_retries: u32) -> Self {
        Self {
            transport,
            base_url,
            max_retries,
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(nonzero!(10u32)))),
        }
    }

    async fn get_with_retry(&self, url: &str) -> Result<String, RestError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            self.limiter.until_ready().await;

            let resp = self
                .transport
                .get(url)
                .await
                .map_err(|e| RestError::Transport { url: url.to_string(), source: e, backtrace: Backtrace::capture() })?;

            if (200..300).contains(&resp.status) {
                return Ok(resp.body);
            }

            let retryable = resp.status == 429 || (500..600).contains(&resp.status);
            if !retryable {
                return Err(RestError::ClientError {
                    url: url.to_string(),
                    status: resp.status,
                    body: resp.body,
                    backtrace: Backtrace::capture(),
                });
            }

            if attempts >= self.max_retries {
                return Err(RestError::RetriesExhausted {
                    url: url.to_string(),
                    status: resp.status,
                    attempts,
                    body: resp.body,
                    backtrace: Backtrace::capture(),
                });
            }

            let backoff = resp
                .retry_after_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| Duration::from_millis(200 * 2u64.pow(attempts.min(5))));
            tracing::warn!(url, status = resp.status, attempt = attempts, backoff_ms = backoff.as_millis() as u64, "retrying rest call");
            tokio::time::sleep(backoff).await;
        }
    }

    pub async fn fetch_premium_index(&self, symbol: &str) -> Result<PremiumIndex, RestError> {
        let url = format!("{}/fapi/v1/premiumIndex?symbol={}", self.base_url.trim_end_matches('/'), symbol);
        let body = self.get_with_retry(&url).await?;
        let raw: RawPremiumIndex = serde_json::from_str(&body).map_err(|e| RestError::Decode {
            url: url.clone(),
            source: e,
            backtrace: Backtrace::capture(),
        })?;

        Ok(PremiumIndex {
            mark_price: raw.mark_price.parse().unwrap_or(f64::NAN),
            index_price: raw.index_price.parse().unwrap_or(f64::NAN),
            predicted_funding: raw.predicted_funding_rate.parse().unwrap_or(f64::NAN),
        })
    }

    pub async fn fetch_open_interest(&self, symbol: &str) -> Result<OpenInterest, RestError> {
        let url = format!("{}/fapi/v1/openInterest?symbol={}", self.base_url.trim_end_matches('/'), symbol);
        let body = self.get_with_retry(&url).await?;
        let raw: RawOpenInterest = serde_json::from_str(&body).map_err(|e| RestError::Decode {
            url: url.clone(),
            source: e,
            backtrace: Backtrace::capture(),
        })?;

        Ok(OpenInterest {
            open_interest: raw.open_interest.parse().unwrap_or(f64::NAN),
            timestamp_ms: raw.time,
        })
    }

    /// Fetch the latest available 1-minute klines covering `[window_start, window_end]`
    /// from the live futures klines endpoint (the HOT-band counterpart to Vision's daily
    /// archives, which lag by up to a day).
    pub async fn fetch_klines(
        &self,
        symbol: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<KlineRow>, RestError> {
        let start_ms = minute_epoch_ms(window_start);
        let end_ms = minute_epoch_ms(window_end);
        let url = format!(
            "{}/fapi/v1/klines?symbol={}&interval=1m&startTime={}&endTime={}&limit=1000",
            self.base_url.trim_end_matches('/'),
            symbol,
            start_ms,
            end_ms,
        );
        let body = self.get_with_retry(&url).await?;
        let raw: Vec<RawKlineEntry> = serde_json::from_str(&body).map_err(|e| RestError::Decode {
            url: url.clone(),
            source: e,
            backtrace: Backtrace::capture(),
        })?;
        Ok(raw.into_iter().map(kline_entry_to_row).collect())
    }
}

#[async_trait]
impl MinuteSource for RestClient {
    /// HOT band per spec §4.8: the live REST path combines the latest available klines
    /// with a single premium-index snapshot, stamped at the window's last minute and
    /// left for the canonical frame's bounded forward-fill to cover the rest of the
    /// window.
    async fn fetch_window(
        &self,
        symbol: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<RawSourceRows, IngestError> {
        let klines = self.fetch_klines(symbol, window_start, window_end).await?;
        let premium = self.fetch_premium_index(symbol).await?;

        let snapshot_minute_ms = minute_epoch_ms(window_end);
        let mark_price_klines = vec![PriceKlineRow {
            open_time_ms: snapshot_minute_ms,
            open: premium.mark_price,
            high: premium.mark_price,
            low: premium.mark_price,
            close: premium.mark_price,
        }];
        let index_price_klines = vec![PriceKlineRow {
            open_time_ms: snapshot_minute_ms,
            open: premium.index_price,
            high: premium.index_price,
            low: premium.index_price,
            close: premium.index_price,
        }];
        let funding_rates = vec![FundingRow {
            funding_time_ms: snapshot_minute_ms,
            last_funding_rate: premium.predicted_funding,
        }];

        Ok(RawSourceRows {
            klines,
            mark_price_klines,
            index_price_klines,
            funding_rates,
            ..Default::default()
        })
    }
}

impl From<RestError> for IngestError {
    fn from(source: RestError) -> Self {
        IngestError::Rest { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::TimeZone;

    struct ScriptedTransport {
        responses: Mutex<Vec<RawResponse>>,
        calls: Mutex<u32>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<RawResponse>) -> Self {
            Self { responses: Mutex::new(responses), calls: Mutex::new(0) }
        }

        fn call_count(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(&self, _url: &str) -> Result<RawResponse, String> {
            *self.calls.lock().unwrap() += 1;
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err("no more scripted responses".to_string());
            }
            let r = responses.remove(0);
            Ok(RawResponse { status: r.status, retry_after_secs: r.retry_after_secs, body: r.body.clone() })
        }
    }

    fn resp(status: u16, body: &str) -> RawResponse {
        RawResponse { status, retry_after_secs: Some(0), body: body.to_string() }
    }

    #[tokio::test]
    async fn retries_429_then_succeeds() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            resp(429, ""),
            resp(429, ""),
            resp(200, r#"{"markPrice":"100.0","indexPrice":"99.0","predictedFundingRate":"0.0002"}"#),
        ]));
        let client = RestClient::with_transport(transport.clone(), "https://fapi.example".to_string(), 3);

        let result = client.fetch_premium_index("BTCUSDT").await.unwrap();
        assert_eq!(result, PremiumIndex { mark_price: 100.0, index_price: 99.0, predicted_funding: 0.0002 });
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test]
    async fn does_not_retry_on_400() {
        let transport = Arc::new(ScriptedTransport::new(vec![resp(400, "bad request")]));
        let client = RestClient::with_transport(transport.clone(), "https://fapi.example".to_string(), 5);

        let err = client.fetch_open_interest("BTCUSDT").await.unwrap_err();
        assert!(matches!(err, RestError::ClientError { status: 400, .. }));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn exhausts_retries_on_persistent_5xx() {
        let transport = Arc::new(ScriptedTransport::new(vec![resp(503, ""), resp(503, ""), resp(503, "")]));
        let client = RestClient::with_transport(transport.clone(), "https://fapi.example".to_string(), 3);

        let err = client.fetch_premium_index("BTCUSDT").await.unwrap_err();
        assert!(matches!(err, RestError::RetriesExhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn fetch_klines_decodes_the_binance_positional_array_shape() {
        let body = r#"[[1700000000000,"100.0","101.0","99.0","100.5","2.0",1700000059999,"200000.0",20,"1.0","100000.0","0"]]"#;
        let transport = Arc::new(ScriptedTransport::new(vec![resp(200, body)]));
        let client = RestClient::with_transport(transport, "https://fapi.example".to_string(), 3);

        let rows = client
            .fetch_klines("BTCUSDT", Utc.timestamp_millis_opt(1700000000000).unwrap(), Utc.timestamp_millis_opt(1700000000000).unwrap())
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].open_time_ms, 1700000000000);
        assert_eq!(rows[0].close, 100.5);
        assert_eq!(rows[0].volume_usdt, 200_000.0);
        assert_eq!(rows[0].trade_count, 20);
    }

    #[tokio::test]
    async fn fetch_window_combines_klines_with_a_premium_index_snapshot() {
        let klines_body = r#"[[1700000000000,"100.0","101.0","99.0","100.5","2.0",1700000059999,"200000.0",20,"1.0","100000.0","0"]]"#;
        let premium_body = r#"{"markPrice":"100.4","indexPrice":"100.3","predictedFundingRate":"0.0001"}"#;
        let transport = Arc::new(ScriptedTransport::new(vec![resp(200, klines_body), resp(200, premium_body)]));
        let client = RestClient::with_transport(transport, "https://fapi.example".to_string(), 3);

        let minute = Utc.timestamp_millis_opt(1700000000000).unwrap();
        let raw = client.fetch_window("BTCUSDT", minute, minute).await.unwrap();

        assert_eq!(raw.klines.len(), 1);
        assert_eq!(raw.mark_price_klines.len(), 1);
        assert_eq!(raw.mark_price_klines[0].close, 100.4);
        assert_eq!(raw.index_price_klines[0].close, 100.3);
        assert_eq!(raw.funding_rates[0].last_funding_rate, 0.0001);
    }
}
