//! Optional live-collector contract (supplemented from the original system's websocket
//! collector; out of scope per spec §1 beyond this interface — no implementation is wired
//! into the orchestrator by default).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// LIVE_ONLY features for a single minute, as produced by an external streaming collector.
#[derive(Debug, Clone, Default)]
pub struct LiveMinuteFeatures {
    pub event_time_ms: Option<i64>,
    pub arrival_time_ms: Option<i64>,
    pub latency_engine_ms: Option<i64>,
    pub latency_network_ms: Option<i64>,
    pub update_id_start: Option<i64>,
    pub update_id_end: Option<i64>,
    pub price_impact_100k: Option<f64>,
    pub predicted_funding: Option<f64>,
    pub agg_trade_count: Option<i64>,
}

/// A collaborator that can supply LIVE_ONLY features for a minute it observed directly
/// (e.g. over a websocket), independent of the REST/Vision archive sources.
#[async_trait]
pub trait LiveCollector: Send + Sync {
    /// Return this collector's snapshot for `minute`, or `None` if it never observed it.
    async fn snapshot(&self, minute: DateTime<Utc>) -> Option<LiveMinuteFeatures>;
}

/// A [`LiveCollector`] that never has anything to contribute; the default when no live
/// collector is configured, per spec §3 ("LIVE_ONLY columns are permitted null").
pub struct NoopLiveCollector;

#[async_trait]
impl LiveCollector for NoopLiveCollector {
    async fn snapshot(&self, _minute: DateTime<Utc>) -> Option<LiveMinuteFeatures> {
        None
    }
}
