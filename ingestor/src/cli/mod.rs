//! Thin CLI shell over [`crate::pipeline::orchestrator::MinuteIngestionPipeline`]'s public
//! API (ambient surface, not part of the ingestion core itself). Gated behind the `cli`
//! feature so embedders that drive the pipeline programmatically don't pay for `clap`.

pub mod commands;
