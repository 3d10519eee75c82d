//! Ingestion orchestrator (C10): band selection, the incremental loop, and the
//! consistency-backfill loop.

pub mod orchestrator;
