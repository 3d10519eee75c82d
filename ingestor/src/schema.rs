//! The canonical minute-row column list and its support-class partition.
//!
//! The list below is a closed, ordered registry queried through pure functions —
//! never mutated at runtime, unlike a module-global dict keyed by string.

/// A column's tolerance for nulls, per the canonical frame contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportClass {
    /// Must never be null in a committed row.
    HardRequired,
    /// Sourced from Vision/REST backfill; may be forward-filled or null outside coverage.
    BackfillAvailable,
    /// Only populated when a live collector is attached; otherwise always null.
    LiveOnly,
    /// Best-effort; may be null regardless of band.
    Optional,
}

/// One entry in the canonical column registry.
#[derive(Debug, Clone, Copy)]
pub struct CanonicalColumn {
    /// Column name, as it appears in a written partition.
    pub name: &'static str,
    /// Null tolerance for this column.
    pub class: SupportClass,
}

const fn col(name: &'static str, class: SupportClass) -> CanonicalColumn {
    CanonicalColumn { name, class }
}

/// The canonical column list, in canonical order. `timestamp` is always first.
pub const CANONICAL_COLUMNS: &[CanonicalColumn] = &[
    col("timestamp", SupportClass::HardRequired),
    col("open", SupportClass::HardRequired),
    col("high", SupportClass::HardRequired),
    col("low", SupportClass::HardRequired),
    col("close", SupportClass::HardRequired),
    col("volume_btc", SupportClass::HardRequired),
    col("volume_usdt", SupportClass::HardRequired),
    col("trade_count", SupportClass::HardRequired),
    col("taker_buy_vol_btc", SupportClass::HardRequired),
    col("taker_buy_vol_usdt", SupportClass::HardRequired),
    col("vwap_1m", SupportClass::HardRequired),
    col("mark_price_open", SupportClass::BackfillAvailable),
    col("mark_price_high", SupportClass::BackfillAvailable),
    col("mark_price_low", SupportClass::BackfillAvailable),
    col("mark_price_close", SupportClass::BackfillAvailable),
    col("index_price_open", SupportClass::BackfillAvailable),
    col("index_price_high", SupportClass::BackfillAvailable),
    col("index_price_low", SupportClass::BackfillAvailable),
    col("index_price_close", SupportClass::BackfillAvailable),
    col("last_funding_rate", SupportClass::BackfillAvailable),
    col("next_funding_time_ms", SupportClass::BackfillAvailable),
    col("event_time_ms", SupportClass::LiveOnly),
    col("arrival_time_ms", SupportClass::LiveOnly),
    col("latency_engine_ms", SupportClass::LiveOnly),
    col("latency_network_ms", SupportClass::LiveOnly),
    col("update_id_start", SupportClass::LiveOnly),
    col("update_id_end", SupportClass::LiveOnly),
    col("price_impact_100k", SupportClass::LiveOnly),
    col("predicted_funding", SupportClass::LiveOnly),
    col("agg_trade_count", SupportClass::LiveOnly),
    col("agg_trade_volume_btc", SupportClass::Optional),
    col("agg_trade_buy_volume_btc", SupportClass::Optional),
];

/// Column names in canonical order.
pub fn canonical_column_names() -> Vec<&'static str> {
    CANONICAL_COLUMNS.iter().map(|c| c.name).collect()
}

/// Column names whose [`SupportClass`] is [`SupportClass::HardRequired`], in canonical order.
pub fn hard_required_columns() -> Vec<&'static str> {
    CANONICAL_COLUMNS
        .iter()
        .filter(|c| c.class == SupportClass::HardRequired)
        .map(|c| c.name)
        .collect()
}

/// Look up the support class of a canonical column by name.
pub fn support_class_of(name: &str) -> Option<SupportClass> {
    CANONICAL_COLUMNS.iter().find(|c| c.name == name).map(|c| c.class)
}

/// A deterministic descriptor string of the canonical schema, hashed by the writer to
/// produce `schema_hash`. Stable across process restarts as long as the column list and
/// order are unchanged.
pub fn schema_hash_input() -> String {
    canonical_column_names().join(",")
}
