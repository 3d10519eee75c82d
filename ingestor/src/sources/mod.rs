//! Source-family clients: the daily-archive object store (C3) and the REST API (C4),
//! unified behind [`MinuteSource`] so the orchestrator can dispatch by band without
//! caring which concrete source backs a given hour.

pub mod rest;
pub mod vision;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::IngestError;
use crate::transform::minute_builder::RawSourceRows;

/// A source capable of producing raw rows for one UTC hour of one symbol.
///
/// A single async method behind `async_trait`, implemented by each concrete source and
/// invoked through `dyn MinuteSource` by the orchestrator so HOT/WARM/COLD dispatch is a
/// simple `match` producing a trait object.
#[async_trait]
pub trait MinuteSource: Send + Sync {
    /// Fetch and decode raw rows covering `[window_start, window_end]` inclusive.
    async fn fetch_window(
        &self,
        symbol: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<RawSourceRows, IngestError>;
}
