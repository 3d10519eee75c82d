//! The durable state ledger: watermark per symbol, partition manifest with hashes and status.
//!
//! [`StateStore`] wraps a single SQLite connection. Every mutating method opens its own
//! `IMMEDIATE` transaction so a single call is the unit of atomicity and durability; the
//! store never holds a connection open across a network call or across two public calls.

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::db::connection::connect_sqlite;
use crate::db::migrate;
use crate::errors::LedgerError;
use crate::models::{NewPartition, PartitionEntry, PartitionRow, PartitionStatus, WatermarkEntry, WatermarkRow};
use crate::schema::{partitions, watermark};

/// Handle to the ledger's SQLite-backed state database.
pub struct StateStore {
    conn: SqliteConnection,
}

impl StateStore {
    /// Open (creating if absent) the state database at `database_url` and apply all
    /// pending migrations. This is the only entry point that may create the file.
    pub fn initialize(database_url: &str) -> anyhow::Result<Self> {
        migrate::run_sqlite(database_url)?;
        let conn = connect_sqlite(database_url)?;
        Ok(Self { conn })
    }

    /// Return the latest fully-committed minute for `symbol`, or `None` if no watermark
    /// has ever been recorded.
    pub fn get_watermark(&mut self, symbol: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
        use watermark::dsl;

        let row: Option<WatermarkEntry> = dsl::watermark
            .filter(dsl::symbol.eq(symbol))
            .select((dsl::symbol, dsl::last_complete_minute_utc, dsl::updated_at_utc))
            .first(&mut self.conn)
            .optional()?;

        row.map(|r| parse_rfc3339(&r.last_complete_minute_utc)).transpose()
    }

    /// Upsert the watermark for `symbol` to `minute`. Callers are responsible for only
    /// ever advancing it except via an explicit repair path; this method does not enforce
    /// monotonicity itself.
    pub fn upsert_watermark(&mut self, symbol: &str, minute: DateTime<Utc>) -> anyhow::Result<()> {
        use watermark::dsl;

        let minute_s = to_rfc3339(minute);
        let now_s = to_rfc3339(Utc::now());
        let row = WatermarkRow {
            symbol,
            last_complete_minute_utc: &minute_s,
            updated_at_utc: &now_s,
        };

        self.conn.immediate_transaction::<_, anyhow::Error, _>(|tx| {
            diesel::insert_into(dsl::watermark)
                .values(&row)
                .on_conflict(dsl::symbol)
                .do_update()
                .set(&row)
                .execute(tx)?;
            Ok(())
        })
    }

    /// Upsert a partition's ledger row (primary key `(symbol, day, hour)`), as the final
    /// step of the atomic write in the partition writer.
    pub fn upsert_partition(&mut self, entry: &NewPartition) -> anyhow::Result<()> {
        use partitions::dsl;

        let row = PartitionRow {
            symbol: &entry.symbol,
            day: &entry.day,
            hour: entry.hour,
            path: &entry.path,
            row_count: entry.row_count,
            min_ts: &entry.min_ts,
            max_ts: &entry.max_ts,
            schema_hash: &entry.schema_hash,
            content_hash: &entry.content_hash,
            status: entry.status.as_str(),
            committed_at_utc: entry.committed_at_utc.as_deref(),
        };

        self.conn.immediate_transaction::<_, anyhow::Error, _>(|tx| {
            diesel::insert_into(dsl::partitions)
                .values(&row)
                .on_conflict((dsl::symbol, dsl::day, dsl::hour))
                .do_update()
                .set(&row)
                .execute(tx)?;
            Ok(())
        })
    }

    /// Return the most recently committed `(day, hour)` partition for `symbol`, ordered by
    /// `(day, hour)` descending, or `None` if no partition has ever been committed.
    pub fn latest_partition(&mut self, symbol: &str) -> anyhow::Result<Option<PartitionEntry>> {
        use partitions::dsl;

        let row: Option<PartitionEntry> = dsl::partitions
            .filter(dsl::symbol.eq(symbol))
            .filter(dsl::status.eq(PartitionStatus::Committed.as_str()))
            .order((dsl::day.desc(), dsl::hour.desc()))
            .select((
                dsl::symbol,
                dsl::day,
                dsl::hour,
                dsl::path,
                dsl::row_count,
                dsl::min_ts,
                dsl::max_ts,
                dsl::schema_hash,
                dsl::content_hash,
                dsl::status,
                dsl::committed_at_utc,
            ))
            .first(&mut self.conn)
            .optional()?;

        if let Some(r) = &row {
            if PartitionStatus::parse(&r.status).is_none() {
                return Err(LedgerError::UnknownStatus {
                    symbol: r.symbol.clone(),
                    day: r.day.clone(),
                    hour: r.hour,
                    status: r.status.clone(),
                }
                .into());
            }
        }
        Ok(row)
    }

    /// Among committed partitions for `symbol` whose `max_ts` is `<= horizon`, return the
    /// one with the greatest `max_ts`. Used by the orchestrator to recompute the watermark
    /// after a run (spec §4.8 step 4, §9 open question): the watermark tracks the most
    /// advanced commit at or before the run's target horizon, not simply the latest row
    /// ever committed (which could be ahead of `horizon` from a prior backfill).
    pub fn latest_committed_at_or_before(
        &mut self,
        symbol: &str,
        horizon: DateTime<Utc>,
    ) -> anyhow::Result<Option<DateTime<Utc>>> {
        use partitions::dsl;

        let horizon_s = to_rfc3339(horizon);
        let max_ts: Option<String> = dsl::partitions
            .filter(dsl::symbol.eq(symbol))
            .filter(dsl::status.eq(PartitionStatus::Committed.as_str()))
            .filter(dsl::max_ts.le(&horizon_s))
            .order(dsl::max_ts.desc())
            .select(dsl::max_ts)
            .first(&mut self.conn)
            .optional()?;

        max_ts.map(|s| parse_rfc3339(&s)).transpose()
    }
}

fn to_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

fn parse_rfc3339(s: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, StateStore) {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("ledger.db");
        let store = StateStore::initialize(path.to_str().unwrap()).expect("initialize");
        (dir, store)
    }

    #[test]
    fn watermark_roundtrip() {
        let (_dir, mut store) = open_tmp();
        assert!(store.get_watermark("BTCUSDT").unwrap().is_none());

        let minute = Utc.with_ymd_and_hms(2026, 1, 15, 10, 2, 0).unwrap();
        store.upsert_watermark("BTCUSDT", minute).unwrap();

        let got = store.get_watermark("BTCUSDT").unwrap().unwrap();
        assert_eq!(got, minute);
    }

    #[test]
    fn watermark_upsert_overwrites() {
        let (_dir, mut store) = open_tmp();
        let first = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2026, 1, 15, 11, 0, 0).unwrap();

        store.upsert_watermark("BTCUSDT", first).unwrap();
        store.upsert_watermark("BTCUSDT", second).unwrap();

        assert_eq!(store.get_watermark("BTCUSDT").unwrap().unwrap(), second);
    }

    #[test]
    fn partition_upsert_and_latest() {
        let (_dir, mut store) = open_tmp();
        assert!(store.latest_partition("BTCUSDT").unwrap().is_none());

        let entry = NewPartition {
            symbol: "BTCUSDT".into(),
            day: "2026-01-15".into(),
            hour: 10,
            path: "/lake/part.parquet".into(),
            row_count: 60,
            min_ts: "2026-01-15T10:00:00Z".into(),
            max_ts: "2026-01-15T10:59:00Z".into(),
            schema_hash: "abc".into(),
            content_hash: "def".into(),
            status: PartitionStatus::Committed,
            committed_at_utc: Some("2026-01-15T11:00:00Z".into()),
        };
        store.upsert_partition(&entry).unwrap();

        let latest = store.latest_partition("BTCUSDT").unwrap().unwrap();
        assert_eq!(latest.hour, 10);
        assert_eq!(latest.row_count, 60);

        // Re-upsert the same key with a revised row_count; the primary key enforces
        // one row per (symbol, day, hour).
        let mut revised = entry.clone();
        revised.row_count = 61;
        store.upsert_partition(&revised).unwrap();
        let latest = store.latest_partition("BTCUSDT").unwrap().unwrap();
        assert_eq!(latest.row_count, 61);
    }

    #[test]
    fn latest_committed_at_or_before_respects_horizon() {
        let (_dir, mut store) = open_tmp();

        for (day, hour, max_ts) in [
            ("2026-01-15", 9, "2026-01-15T09:59:00Z"),
            ("2026-01-15", 10, "2026-01-15T10:59:00Z"),
            ("2026-01-15", 11, "2026-01-15T11:59:00Z"),
        ] {
            store
                .upsert_partition(&NewPartition {
                    symbol: "BTCUSDT".into(),
                    day: day.into(),
                    hour,
                    path: format!("/lake/{hour}.parquet"),
                    row_count: 60,
                    min_ts: format!("2026-01-15T{hour:02}:00:00Z"),
                    max_ts: max_ts.into(),
                    schema_hash: "abc".into(),
                    content_hash: "def".into(),
                    status: PartitionStatus::Committed,
                    committed_at_utc: Some("2026-01-15T12:00:00Z".into()),
                })
                .unwrap();
        }

        let horizon = Utc.with_ymd_and_hms(2026, 1, 15, 10, 30, 0).unwrap();
        let got = store
            .latest_committed_at_or_before("BTCUSDT", horizon)
            .unwrap()
            .unwrap();
        assert_eq!(got, Utc.with_ymd_and_hms(2026, 1, 15, 10, 59, 0).unwrap());
    }
}
