use clap::{Parser, Subcommand};

/// Minute lake ingestion CLI: a thin shell over [`crate::MinuteIngestionPipeline`].
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Process every hour from the current watermark up to now minus the safety lag.
    RunOnce {
        /// Optional UTC ISO datetime to use as "now" instead of the wall clock.
        #[arg(long)]
        at: Option<String>,

        /// Optional cap on hours processed in this invocation.
        #[arg(long)]
        max_hours: Option<usize>,
    },

    /// Run `run-once` on a fixed polling interval, forever.
    RunDaemon {
        /// Polling interval in seconds.
        #[arg(long, default_value_t = 60)]
        poll_seconds: u64,
    },

    /// Audit a historical range and repair hours that fail the partition audit.
    BackfillRange {
        /// Start datetime in ISO format (UTC if no timezone given).
        #[arg(long)]
        start: String,

        /// End datetime in ISO format; defaults to now minus the safety lag.
        #[arg(long)]
        end: Option<String>,

        /// Sleep between repaired hours, in seconds.
        #[arg(long, default_value_t = 0.0)]
        sleep_seconds: f64,

        /// Cap on the number of hours repaired in this invocation.
        #[arg(long)]
        max_missing_hours: Option<u32>,
    },
}
