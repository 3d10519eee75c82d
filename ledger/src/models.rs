//! Diesel models mapping to the database schema.
//!
//! These types mirror the tables defined in the embedded migrations and in
//! [`crate::schema`]:
//! - [`crate::schema::watermark`] — one row per symbol, the latest fully-committed minute
//! - [`crate::schema::partitions`] — one row per (symbol, day, hour), the ledger of record

use diesel::prelude::*;

use crate::schema::{partitions, watermark};

/// Status of a ledger partition entry, mirrored as a plain string column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionStatus {
    /// File has been written to a temp path but not yet committed.
    Staged,
    /// File has been atomically renamed into place and the ledger row upserted.
    Committed,
    /// Writer aborted after staging; no ledger row should be visible for this state.
    Failed,
}

impl PartitionStatus {
    /// Stable string form stored in the `status` column.
    pub fn as_str(self) -> &'static str {
        match self {
            PartitionStatus::Staged => "STAGED",
            PartitionStatus::Committed => "COMMITTED",
            PartitionStatus::Failed => "FAILED",
        }
    }

    /// Parse the stored string form back into a status.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "STAGED" => Some(PartitionStatus::Staged),
            "COMMITTED" => Some(PartitionStatus::Committed),
            "FAILED" => Some(PartitionStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Insertable, AsChangeset, Debug)]
#[diesel(table_name = watermark)]
pub(crate) struct WatermarkRow<'a> {
    pub(crate) symbol: &'a str,
    pub(crate) last_complete_minute_utc: &'a str,
    pub(crate) updated_at_utc: &'a str,
}

/// A watermark row as read back from the ledger.
#[derive(Queryable, Debug, Clone)]
pub struct WatermarkEntry {
    /// Trading symbol this watermark tracks.
    pub symbol: String,
    /// RFC-3339 UTC instant of the latest fully-committed minute.
    pub last_complete_minute_utc: String,
    /// RFC-3339 UTC instant this row was last written.
    pub updated_at_utc: String,
}

#[derive(Insertable, AsChangeset, Debug)]
#[diesel(table_name = partitions)]
pub(crate) struct PartitionRow<'a> {
    pub(crate) symbol: &'a str,
    pub(crate) day: &'a str,
    pub(crate) hour: i32,
    pub(crate) path: &'a str,
    pub(crate) row_count: i64,
    pub(crate) min_ts: &'a str,
    pub(crate) max_ts: &'a str,
    pub(crate) schema_hash: &'a str,
    pub(crate) content_hash: &'a str,
    pub(crate) status: &'a str,
    pub(crate) committed_at_utc: Option<&'a str>,
}

/// A partition row as read back from the ledger.
#[derive(Queryable, Debug, Clone)]
pub struct PartitionEntry {
    /// Trading symbol this partition belongs to.
    pub symbol: String,
    /// UTC calendar day, `YYYY-MM-DD`.
    pub day: String,
    /// UTC hour of day, `0..=23`.
    pub hour: i32,
    /// Filesystem path of the committed parquet file.
    pub path: String,
    /// Number of canonical minute rows in the partition.
    pub row_count: i64,
    /// RFC-3339 UTC timestamp of the earliest row.
    pub min_ts: String,
    /// RFC-3339 UTC timestamp of the latest row.
    pub max_ts: String,
    /// sha-256 of the canonical schema descriptor string.
    pub schema_hash: String,
    /// sha-256 of the final file bytes.
    pub content_hash: String,
    /// One of STAGED / COMMITTED / FAILED.
    pub status: String,
    /// RFC-3339 UTC instant the commit happened, if committed.
    pub committed_at_utc: Option<String>,
}

/// Input to [`crate::store::StateStore::upsert_partition`].
#[derive(Debug, Clone)]
pub struct NewPartition {
    /// Trading symbol this partition belongs to.
    pub symbol: String,
    /// UTC calendar day, `YYYY-MM-DD`.
    pub day: String,
    /// UTC hour of day, `0..=23`.
    pub hour: i32,
    /// Filesystem path of the committed parquet file.
    pub path: String,
    /// Number of canonical minute rows in the partition.
    pub row_count: i64,
    /// RFC-3339 UTC timestamp of the earliest row.
    pub min_ts: String,
    /// RFC-3339 UTC timestamp of the latest row.
    pub max_ts: String,
    /// sha-256 of the canonical schema descriptor string.
    pub schema_hash: String,
    /// sha-256 of the final file bytes.
    pub content_hash: String,
    /// Status to record; callers writing a commit always pass `Committed`.
    pub status: PartitionStatus,
    /// RFC-3339 UTC instant the commit happened, if committed.
    pub committed_at_utc: Option<String>,
}
