//! Archive decoders (C5): parse a downloaded Vision ZIP into raw per-minute rows for one
//! stream. Every decoder shares the same positional-CSV, header-row-may-be-absent,
//! empty-archive-is-not-an-error contract.

use std::io::Read;
use std::path::Path;

use snafu::{Backtrace, Snafu};

use crate::errors::ErrorKind;
use crate::time::is_minute_aligned_ms;

/// Errors raised while decoding a downloaded archive.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DecodeError {
    /// The ZIP archive could not be opened or contains no CSV member.
    #[snafu(display("could not read zip archive {path}: {source}"))]
    Zip {
        path: String,
        source: zip::result::ZipError,
        backtrace: Backtrace,
    },

    /// The archive opened but contained no file at all (treated as empty, not an error,
    /// only when the archive itself is legitimately empty; a corrupt archive is a `Zip` error).
    #[snafu(display("zip archive {path} contains no members"))]
    EmptyArchive { path: String, backtrace: Backtrace },

    /// A CSV row could not be parsed against the stream's fixed positional schema.
    #[snafu(display("malformed row {row_index} in {path}: {message}"))]
    MalformedRow {
        path: String,
        row_index: usize,
        message: String,
        backtrace: Backtrace,
    },

    /// `open_time` was not a multiple of 60_000 ms.
    #[snafu(display("row {row_index} in {path} is not minute-aligned: open_time={open_time_ms}"))]
    NotMinuteAligned {
        path: String,
        row_index: usize,
        open_time_ms: i64,
        backtrace: Backtrace,
    },

    /// Generic I/O failure reading the archive from disk.
    #[snafu(display("i/o error reading {path}: {source}"))]
    Io {
        path: String,
        source: std::io::Error,
        backtrace: Backtrace,
    },
}

impl DecodeError {
    /// All decode failures are hour-level, non-retryable (spec §7).
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::DecodeFailure
    }
}

impl From<DecodeError> for crate::errors::IngestError {
    fn from(source: DecodeError) -> Self {
        crate::errors::IngestError::Decode { source }
    }
}

/// One decoded `klines` row.
#[derive(Debug, Clone, Copy)]
pub struct KlineRow {
    pub open_time_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume_btc: f64,
    pub volume_usdt: f64,
    pub trade_count: i64,
    pub taker_buy_vol_btc: f64,
    pub taker_buy_vol_usdt: f64,
}

/// One decoded `markPriceKlines` or `indexPriceKlines` row (same shape as a kline, OHLC only).
#[derive(Debug, Clone, Copy)]
pub struct PriceKlineRow {
    pub open_time_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// One decoded `aggTrades` row.
#[derive(Debug, Clone, Copy)]
pub struct AggTradeRow {
    pub timestamp_ms: i64,
    pub price: f64,
    pub quantity: f64,
    pub is_buyer_maker: bool,
}

/// One decoded `premiumIndexKlines` row, used as the funding-rate proxy (see DESIGN.md).
#[derive(Debug, Clone, Copy)]
pub struct FundingRow {
    pub funding_time_ms: i64,
    pub last_funding_rate: f64,
}

/// Open the first CSV member of a ZIP archive at `path` and return its raw bytes.
/// Returns `Ok(None)` for a legitimately empty archive (zero members).
fn read_first_csv_member(path: &Path) -> Result<Option<Vec<u8>>, DecodeError> {
    let path_s = path.display().to_string();
    let file = std::fs::File::open(path).map_err(|e| DecodeError::Io {
        path: path_s.clone(),
        source: e,
        backtrace: Backtrace::capture(),
    })?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| DecodeError::Zip {
        path: path_s.clone(),
        source: e,
        backtrace: Backtrace::capture(),
    })?;

    if archive.is_empty() {
        return Ok(None);
    }

    let mut entry = archive.by_index(0).map_err(|e| DecodeError::Zip {
        path: path_s.clone(),
        source: e,
        backtrace: Backtrace::capture(),
    })?;
    let mut buf = Vec::new();
    entry.read_to_end(&mut buf).map_err(|e| DecodeError::Io {
        path: path_s.clone(),
        source: e,
        backtrace: Backtrace::capture(),
    })?;
    Ok(Some(buf))
}

fn build_csv_reader(bytes: &[u8]) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new().has_headers(false).flexible(true).from_reader(bytes)
}

/// Binance Vision daily CSVs sometimes carry a literal header row (`open_time,open,...`)
/// instead of data; detect it by checking whether the first field parses as an integer.
fn looks_like_header(first_field: &str) -> bool {
    first_field.parse::<i64>().is_err()
}

fn parse_field<T: std::str::FromStr>(
    record: &csv::StringRecord,
    idx: usize,
    path: &str,
    row_index: usize,
    field_name: &str,
) -> Result<T, DecodeError> {
    record
        .get(idx)
        .ok_or_else(|| DecodeError::MalformedRow {
            path: path.to_string(),
            row_index,
            message: format!("missing field {field_name}"),
            backtrace: Backtrace::capture(),
        })?
        .parse::<T>()
        .map_err(|_| DecodeError::MalformedRow {
            path: path.to_string(),
            row_index,
            message: format!("could not parse field {field_name}"),
            backtrace: Backtrace::capture(),
        })
}

fn check_minute_aligned(path: &str, row_index: usize, open_time_ms: i64) -> Result<(), DecodeError> {
    if !is_minute_aligned_ms(open_time_ms) {
        return Err(DecodeError::NotMinuteAligned {
            path: path.to_string(),
            row_index,
            open_time_ms,
            backtrace: Backtrace::capture(),
        });
    }
    Ok(())
}

/// Decode a `klines` daily ZIP into raw rows. Empty archives yield an empty vector.
pub fn decode_klines(path: &Path) -> Result<Vec<KlineRow>, DecodeError> {
    let path_s = path.display().to_string();
    let Some(bytes) = read_first_csv_member(path)? else {
        return Ok(Vec::new());
    };

    let mut reader = build_csv_reader(&bytes);
    let mut out = Vec::new();
    for (row_index, record) in reader.records().enumerate() {
        let record = record.map_err(|e| DecodeError::MalformedRow {
            path: path_s.clone(),
            row_index,
            message: e.to_string(),
            backtrace: Backtrace::capture(),
        })?;
        if row_index == 0 {
            if let Some(first) = record.get(0) {
                if looks_like_header(first) {
                    continue;
                }
            }
        }

        let open_time_ms: i64 = parse_field(&record, 0, &path_s, row_index, "open_time")?;
        check_minute_aligned(&path_s, row_index, open_time_ms)?;

        out.push(KlineRow {
            open_time_ms,
            open: parse_field(&record, 1, &path_s, row_index, "open")?,
            high: parse_field(&record, 2, &path_s, row_index, "high")?,
            low: parse_field(&record, 3, &path_s, row_index, "low")?,
            close: parse_field(&record, 4, &path_s, row_index, "close")?,
            volume_btc: parse_field(&record, 5, &path_s, row_index, "volume")?,
            trade_count: parse_field(&record, 8, &path_s, row_index, "trade_count")?,
            taker_buy_vol_btc: parse_field(&record, 9, &path_s, row_index, "taker_buy_base_vol")?,
            taker_buy_vol_usdt: parse_field(&record, 10, &path_s, row_index, "taker_buy_quote_vol")?,
            volume_usdt: parse_field(&record, 7, &path_s, row_index, "quote_asset_volume")?,
        });
    }
    Ok(out)
}

fn decode_price_klines(path: &Path) -> Result<Vec<PriceKlineRow>, DecodeError> {
    let path_s = path.display().to_string();
    let Some(bytes) = read_first_csv_member(path)? else {
        return Ok(Vec::new());
    };

    let mut reader = build_csv_reader(&bytes);
    let mut out = Vec::new();
    for (row_index, record) in reader.records().enumerate() {
        let record = record.map_err(|e| DecodeError::MalformedRow {
            path: path_s.clone(),
            row_index,
            message: e.to_string(),
            backtrace: Backtrace::capture(),
        })?;
        if row_index == 0 {
            if let Some(first) = record.get(0) {
                if looks_like_header(first) {
                    continue;
                }
            }
        }

        let open_time_ms: i64 = parse_field(&record, 0, &path_s, row_index, "open_time")?;
        check_minute_aligned(&path_s, row_index, open_time_ms)?;

        out.push(PriceKlineRow {
            open_time_ms,
            open: parse_field(&record, 1, &path_s, row_index, "open")?,
            high: parse_field(&record, 2, &path_s, row_index, "high")?,
            low: parse_field(&record, 3, &path_s, row_index, "low")?,
            close: parse_field(&record, 4, &path_s, row_index, "close")?,
        });
    }
    Ok(out)
}

/// Decode a `markPriceKlines` daily ZIP into raw rows.
pub fn decode_mark_price_klines(path: &Path) -> Result<Vec<PriceKlineRow>, DecodeError> {
    decode_price_klines(path)
}

/// Decode an `indexPriceKlines` daily ZIP into raw rows.
pub fn decode_index_price_klines(path: &Path) -> Result<Vec<PriceKlineRow>, DecodeError> {
    decode_price_klines(path)
}

/// Decode a `premiumIndexKlines` daily ZIP, used as the historical funding-rate proxy.
pub fn decode_funding_rates(path: &Path) -> Result<Vec<FundingRow>, DecodeError> {
    Ok(decode_price_klines(path)?
        .into_iter()
        .map(|r| FundingRow {
            funding_time_ms: r.open_time_ms,
            last_funding_rate: r.close,
        })
        .collect())
}

/// Decode an `aggTrades` daily ZIP into raw rows. Not minute-aligned by construction;
/// aggregation to the minute grid happens in the transform engine.
pub fn decode_agg_trades(path: &Path) -> Result<Vec<AggTradeRow>, DecodeError> {
    let path_s = path.display().to_string();
    let Some(bytes) = read_first_csv_member(path)? else {
        return Ok(Vec::new());
    };

    let mut reader = build_csv_reader(&bytes);
    let mut out = Vec::new();
    for (row_index, record) in reader.records().enumerate() {
        let record = record.map_err(|e| DecodeError::MalformedRow {
            path: path_s.clone(),
            row_index,
            message: e.to_string(),
            backtrace: Backtrace::capture(),
        })?;
        if row_index == 0 {
            if let Some(first) = record.get(0) {
                if looks_like_header(first) {
                    continue;
                }
            }
        }

        out.push(AggTradeRow {
            price: parse_field(&record, 1, &path_s, row_index, "price")?,
            quantity: parse_field(&record, 2, &path_s, row_index, "quantity")?,
            timestamp_ms: parse_field(&record, 5, &path_s, row_index, "timestamp")?,
            is_buyer_maker: parse_field::<u8>(&record, 6, &path_s, row_index, "is_buyer_maker")? != 0,
        });
    }
    Ok(out)
}
