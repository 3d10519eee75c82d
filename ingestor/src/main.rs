use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::Parser;
use ingestor::cli::commands::{Cli, Commands};
use ingestor::live::NoopLiveCollector;
use ingestor::pipeline::orchestrator::MinuteIngestionPipeline;
use ingestor::sources::rest::RestClient;
use ingestor::sources::vision::VisionClient;
use ingestor::time::floor_to_minute;
use ingestor::Settings;
use ledger::store::StateStore;

fn parse_utc(value: &str) -> Result<DateTime<Utc>, Box<dyn std::error::Error>> {
    Ok(value.parse::<DateTime<Utc>>()?)
}

fn build_pipeline(settings: Settings) -> Result<MinuteIngestionPipeline, Box<dyn std::error::Error>> {
    let http = reqwest::Client::builder().timeout(Duration::from_secs(20)).build()?;
    let store = StateStore::initialize(&settings.state_db)?;
    let vision = Arc::new(VisionClient::new(http.clone(), settings.vision_base_url.clone(), std::env::temp_dir()));
    let rest = Arc::new(RestClient::new(http, settings.rest_base_url.clone(), settings.rest_retries));
    Ok(MinuteIngestionPipeline::new(settings, store, vision, rest, Arc::new(NoopLiveCollector)))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let settings = Settings::from_env()?;

    match cli.command {
        Commands::RunOnce { at, max_hours } => {
            let now = at.as_deref().map(parse_utc).transpose()?;
            let pipeline = build_pipeline(settings)?;
            let summary = pipeline.run_once(now, max_hours).await?;
            pipeline.close().await;
            println!(
                "run complete: symbol={} partitions={} watermark_before={:?} watermark_after={:?} target={}",
                summary.symbol, summary.partitions_committed, summary.watermark_before, summary.watermark_after, summary.target_horizon
            );
        }

        Commands::RunDaemon { poll_seconds } => {
            let pipeline = build_pipeline(settings)?;
            pipeline.run_daemon(poll_seconds).await?;
            pipeline.close().await;
        }

        Commands::BackfillRange { start, end, sleep_seconds, max_missing_hours } => {
            let start_utc = floor_to_minute(parse_utc(&start)?);
            let now = Utc::now();
            let end_utc = match end {
                Some(e) => floor_to_minute(parse_utc(&e)?),
                None => floor_to_minute(now - chrono::Duration::minutes(settings.safety_lag_minutes)),
            };
            if end_utc < start_utc {
                return Err("end must be >= start".into());
            }

            let pipeline = build_pipeline(settings)?;
            let summary = pipeline
                .run_consistency_backfill(start_utc, end_utc, now, sleep_seconds as u64, max_missing_hours)
                .await?;
            pipeline.close().await;

            println!(
                "backfill: hours_scanned={} issues_found={} issues_targeted={} hours_repaired={} hours_failed={} issues_remaining={}",
                summary.hours_scanned,
                summary.issues_found,
                summary.issues_targeted,
                summary.hours_repaired,
                summary.hours_failed,
                summary.issues_remaining
            );

            if max_missing_hours.is_none() && summary.issues_remaining > 0 {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
