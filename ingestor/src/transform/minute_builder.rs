//! `build_canonical_frame` (C6): align heterogeneous source streams onto a dense minute
//! grid with bounded forward-fill, and emit the canonical polars frame.

use std::collections::HashMap;
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use polars::prelude::*;
use snafu::{Backtrace, Snafu};

use crate::decode::{AggTradeRow, FundingRow, KlineRow, PriceKlineRow};
use crate::live::LiveMinuteFeatures;
use crate::schema::canonical_column_names;
use crate::time::{iter_minutes, minute_epoch_ms};

/// Errors raised while building a canonical frame.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TransformError {
    /// A grid minute had no kline row and the window was not a trailing-partial-hour case.
    #[snafu(display("missing kline for minute {minute} (ingestion error, not partial-hour truncation)"))]
    MissingKline { minute: DateTime<Utc>, backtrace: Backtrace },

    /// Building the output polars frame failed.
    #[snafu(display("failed to assemble canonical frame: {source}"))]
    Polars {
        source: PolarsError,
        backtrace: Backtrace,
    },
}

impl From<TransformError> for crate::errors::IngestError {
    fn from(source: TransformError) -> Self {
        crate::errors::IngestError::Transform { source }
    }
}

/// All raw decoded rows available for one fetch window, keyed by source family. Any field
/// may be empty when that source had nothing for the window (e.g. WARM band with no REST
/// augmentation).
#[derive(Debug, Clone, Default)]
pub struct RawSourceRows {
    pub klines: Vec<KlineRow>,
    pub mark_price_klines: Vec<PriceKlineRow>,
    pub index_price_klines: Vec<PriceKlineRow>,
    pub agg_trades: Vec<AggTradeRow>,
    pub funding_rates: Vec<FundingRow>,
    pub live_snapshots: HashMap<DateTime<Utc>, LiveMinuteFeatures>,
}

/// `true` when the frame being built covers the currently-forming hour and is allowed to
/// truncate trailing minutes that have no kline yet, rather than erroring.
pub struct BuildOptions {
    pub max_ffill_minutes: i64,
    pub allow_trailing_truncation: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            max_ffill_minutes: 60,
            allow_trailing_truncation: false,
        }
    }
}

fn polars_err(source: PolarsError) -> TransformError {
    TransformError::Polars { source, backtrace: Backtrace::capture() }
}

fn floor_to_minute_ms(ms: i64) -> i64 {
    ms - ms.rem_euclid(60_000)
}

/// Build the canonical minute frame for `[start_minute, end_minute]` inclusive.
///
/// The grid is joined against every source family with a left `join` on `timestamp`;
/// mark/index price and funding columns are then bounded-forward-filled in place with
/// polars' `forward_fill(limit)`, and aggregated-trade volumes are produced with a
/// `group_by("timestamp")` over the raw trade rows before their own left join.
pub fn build_canonical_frame(
    start_minute: DateTime<Utc>,
    end_minute: DateTime<Utc>,
    raw: &RawSourceRows,
    opts: &BuildOptions,
) -> Result<DataFrame, TransformError> {
    let grid = iter_minutes(start_minute, end_minute);

    // Trim trailing grid minutes with no kline when truncation is allowed; otherwise any
    // gap (leading, interior, or trailing) is a hard error, caught below via the left join.
    let mut effective_grid = grid;
    if opts.allow_trailing_truncation {
        let kline_minutes: HashSet<i64> = raw.klines.iter().map(|r| r.open_time_ms).collect();
        while let Some(last) = effective_grid.last() {
            if kline_minutes.contains(&minute_epoch_ms(*last)) {
                break;
            }
            effective_grid.pop();
        }
    }

    let grid_df = grid_frame(&effective_grid).map_err(polars_err)?;
    let klines_df = klines_frame(&raw.klines).map_err(polars_err)?;

    let mut frame = grid_df
        .lazy()
        .join(klines_df.lazy(), [col("timestamp")], [col("timestamp")], JoinArgs::new(JoinType::Left))
        .collect()
        .map_err(polars_err)?;

    if let Some(idx) = first_null_row(&frame, "open").map_err(polars_err)? {
        return Err(TransformError::MissingKline {
            minute: effective_grid[idx],
            backtrace: Backtrace::capture(),
        });
    }

    let ffill_limit: Option<IdxSize> = Some(opts.max_ffill_minutes.max(0) as IdxSize);

    frame = frame
        .lazy()
        .join(
            price_frame(&raw.mark_price_klines, "mark_price").map_err(polars_err)?.lazy(),
            [col("timestamp")],
            [col("timestamp")],
            JoinArgs::new(JoinType::Left),
        )
        .with_columns([
            col("mark_price_open").forward_fill(ffill_limit),
            col("mark_price_high").forward_fill(ffill_limit),
            col("mark_price_low").forward_fill(ffill_limit),
            col("mark_price_close").forward_fill(ffill_limit),
        ])
        .collect()
        .map_err(polars_err)?;

    frame = frame
        .lazy()
        .join(
            price_frame(&raw.index_price_klines, "index_price").map_err(polars_err)?.lazy(),
            [col("timestamp")],
            [col("timestamp")],
            JoinArgs::new(JoinType::Left),
        )
        .with_columns([
            col("index_price_open").forward_fill(ffill_limit),
            col("index_price_high").forward_fill(ffill_limit),
            col("index_price_low").forward_fill(ffill_limit),
            col("index_price_close").forward_fill(ffill_limit),
        ])
        .collect()
        .map_err(polars_err)?;

    frame = frame
        .lazy()
        .join(
            funding_frame(&raw.funding_rates).map_err(polars_err)?.lazy(),
            [col("timestamp")],
            [col("timestamp")],
            JoinArgs::new(JoinType::Left),
        )
        .with_columns([
            col("last_funding_rate").forward_fill(ffill_limit),
            lit(NULL).cast(DataType::Int64).alias("next_funding_time_ms"),
        ])
        .collect()
        .map_err(polars_err)?;

    let agg_df = agg_trades_frame(&raw.agg_trades)
        .map_err(polars_err)?
        .lazy()
        .group_by([col("timestamp")])
        .agg([
            col("quantity").sum().alias("agg_trade_volume_btc"),
            col("buy_quantity").sum().alias("agg_trade_buy_volume_btc"),
        ])
        .collect()
        .map_err(polars_err)?;

    frame = frame
        .lazy()
        .join(agg_df.lazy(), [col("timestamp")], [col("timestamp")], JoinArgs::new(JoinType::Left))
        .join(
            live_frame(&raw.live_snapshots).map_err(polars_err)?.lazy(),
            [col("timestamp")],
            [col("timestamp")],
            JoinArgs::new(JoinType::Left),
        )
        .with_column(
            when(col("volume_btc").gt(lit(0.0)))
                .then(col("volume_usdt") / col("volume_btc"))
                .otherwise(col("close"))
                .alias("vwap_1m"),
        )
        .with_column(col("timestamp").cast(DataType::Datetime(TimeUnit::Milliseconds, None)))
        .select(canonical_column_names().into_iter().map(col).collect::<Vec<_>>())
        .collect()
        .map_err(polars_err)?;

    debug_assert_eq!(frame.get_column_names().len(), canonical_column_names().len());
    Ok(frame)
}

/// The index of the first null in `column`, if any.
fn first_null_row(frame: &DataFrame, column: &str) -> PolarsResult<Option<usize>> {
    let ca = frame.column(column)?.f64()?;
    Ok(ca.into_iter().position(|v| v.is_none()))
}

fn grid_frame(grid: &[DateTime<Utc>]) -> PolarsResult<DataFrame> {
    let timestamps: Vec<i64> = grid.iter().map(|m| minute_epoch_ms(*m)).collect();
    DataFrame::new(vec![Series::new("timestamp".into(), timestamps)])
}

fn klines_frame(rows: &[KlineRow]) -> PolarsResult<DataFrame> {
    DataFrame::new(vec![
        Series::new("timestamp".into(), rows.iter().map(|r| r.open_time_ms).collect::<Vec<_>>()),
        Series::new("open".into(), rows.iter().map(|r| r.open).collect::<Vec<_>>()),
        Series::new("high".into(), rows.iter().map(|r| r.high).collect::<Vec<_>>()),
        Series::new("low".into(), rows.iter().map(|r| r.low).collect::<Vec<_>>()),
        Series::new("close".into(), rows.iter().map(|r| r.close).collect::<Vec<_>>()),
        Series::new("volume_btc".into(), rows.iter().map(|r| r.volume_btc).collect::<Vec<_>>()),
        Series::new("volume_usdt".into(), rows.iter().map(|r| r.volume_usdt).collect::<Vec<_>>()),
        Series::new("trade_count".into(), rows.iter().map(|r| r.trade_count).collect::<Vec<_>>()),
        Series::new("taker_buy_vol_btc".into(), rows.iter().map(|r| r.taker_buy_vol_btc).collect::<Vec<_>>()),
        Series::new("taker_buy_vol_usdt".into(), rows.iter().map(|r| r.taker_buy_vol_usdt).collect::<Vec<_>>()),
    ])
}

fn price_frame(rows: &[PriceKlineRow], prefix: &str) -> PolarsResult<DataFrame> {
    DataFrame::new(vec![
        Series::new("timestamp".into(), rows.iter().map(|r| r.open_time_ms).collect::<Vec<_>>()),
        Series::new(format!("{prefix}_open").into(), rows.iter().map(|r| r.open).collect::<Vec<_>>()),
        Series::new(format!("{prefix}_high").into(), rows.iter().map(|r| r.high).collect::<Vec<_>>()),
        Series::new(format!("{prefix}_low").into(), rows.iter().map(|r| r.low).collect::<Vec<_>>()),
        Series::new(format!("{prefix}_close").into(), rows.iter().map(|r| r.close).collect::<Vec<_>>()),
    ])
}

fn funding_frame(rows: &[FundingRow]) -> PolarsResult<DataFrame> {
    DataFrame::new(vec![
        Series::new(
            "timestamp".into(),
            rows.iter().map(|r| floor_to_minute_ms(r.funding_time_ms)).collect::<Vec<_>>(),
        ),
        Series::new("last_funding_rate".into(), rows.iter().map(|r| r.last_funding_rate).collect::<Vec<_>>()),
    ])
}

fn agg_trades_frame(rows: &[AggTradeRow]) -> PolarsResult<DataFrame> {
    DataFrame::new(vec![
        Series::new(
            "timestamp".into(),
            rows.iter().map(|r| floor_to_minute_ms(r.timestamp_ms)).collect::<Vec<_>>(),
        ),
        Series::new("quantity".into(), rows.iter().map(|r| r.quantity).collect::<Vec<_>>()),
        Series::new(
            "buy_quantity".into(),
            rows.iter().map(|r| if r.is_buyer_maker { 0.0 } else { r.quantity }).collect::<Vec<_>>(),
        ),
    ])
}

fn live_frame(snapshots: &HashMap<DateTime<Utc>, LiveMinuteFeatures>) -> PolarsResult<DataFrame> {
    let minutes: Vec<&DateTime<Utc>> = snapshots.keys().collect();
    let timestamps: Vec<i64> = minutes.iter().map(|m| minute_epoch_ms(**m)).collect();
    let features: Vec<&LiveMinuteFeatures> = minutes.iter().map(|m| &snapshots[*m]).collect();

    DataFrame::new(vec![
        Series::new("timestamp".into(), timestamps),
        Series::new("event_time_ms".into(), features.iter().map(|f| f.event_time_ms).collect::<Vec<_>>()),
        Series::new("arrival_time_ms".into(), features.iter().map(|f| f.arrival_time_ms).collect::<Vec<_>>()),
        Series::new("latency_engine_ms".into(), features.iter().map(|f| f.latency_engine_ms).collect::<Vec<_>>()),
        Series::new("latency_network_ms".into(), features.iter().map(|f| f.latency_network_ms).collect::<Vec<_>>()),
        Series::new("update_id_start".into(), features.iter().map(|f| f.update_id_start).collect::<Vec<_>>()),
        Series::new("update_id_end".into(), features.iter().map(|f| f.update_id_end).collect::<Vec<_>>()),
        Series::new("price_impact_100k".into(), features.iter().map(|f| f.price_impact_100k).collect::<Vec<_>>()),
        Series::new("predicted_funding".into(), features.iter().map(|f| f.predicted_funding).collect::<Vec<_>>()),
        Series::new("agg_trade_count".into(), features.iter().map(|f| f.agg_trade_count).collect::<Vec<_>>()),
    ])
}
