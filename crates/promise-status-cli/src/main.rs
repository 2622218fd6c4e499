//! promise-status
//!
//! Simulates one operation with a chosen outcome and latency, tracks it under
//! the given options, and prints every snapshot an owner would render as one
//! JSON line on stdout. Logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use promise_status::{
    snapshot_to_json, PromiseStatusTracker, Snapshot, StatusMap, TrackedOperation, TrackerMetrics, TrackerOptions,
};

#[derive(Parser, Debug)]
#[command(name = "promise-status")]
#[command(about = "Print the status snapshots derived for a simulated operation")]
struct Args {
    /// How the simulated operation settles
    #[arg(long, value_enum, default_value = "fulfilled")]
    outcome: Outcome,

    /// Fulfilled value or rejection reason
    #[arg(long, default_value = "done")]
    value: String,

    /// Latency of the simulated operation
    #[arg(long, default_value = "0")]
    settle_after_ms: u64,

    /// Hide pending until the operation has been in flight this long
    #[arg(long, allow_negative_numbers = true)]
    delay_ms: Option<i64>,

    /// Clear a fulfilled status after this long
    #[arg(long, allow_negative_numbers = true)]
    reset_fulfilled_ms: Option<i64>,

    /// Clear a rejected status after this long
    #[arg(long, allow_negative_numbers = true)]
    reset_rejected_ms: Option<i64>,

    /// Status labels as JSON, e.g. '{"pending": "loading"}'
    #[arg(long)]
    status_map: Option<String>,

    /// Full options document as JSON; individual flags take precedence
    #[arg(long)]
    options: Option<String>,

    /// Dispose the tracker after this long
    #[arg(long)]
    dispose_after_ms: Option<u64>,

    /// Print tracker metrics when done
    #[arg(long)]
    metrics: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Outcome {
    Fulfilled,
    Rejected,
}

impl Args {
    /// Environment, then `--options`, then individual flags.
    fn tracker_options(&self) -> Result<TrackerOptions> {
        let mut options = TrackerOptions::from_env();

        if let Some(document) = &self.options {
            options = options.merge(TrackerOptions::from_json(document).context("Invalid --options")?);
        }

        let status_map = match &self.status_map {
            Some(document) => serde_json::from_str::<StatusMap>(document).context("Invalid --status-map")?,
            None => StatusMap::default(),
        };

        Ok(options.merge(TrackerOptions {
            delay_ms: self.delay_ms,
            reset_fulfilled_delay_ms: self.reset_fulfilled_ms,
            reset_rejected_delay_ms: self.reset_rejected_ms,
            status_map,
        }))
    }

    fn operation(&self) -> TrackedOperation<String, String> {
        let latency = Duration::from_millis(self.settle_after_ms);
        let outcome = self.outcome;
        let value = self.value.clone();
        TrackedOperation::new(async move {
            sleep(latency).await;
            match outcome {
                Outcome::Fulfilled => Ok(value),
                Outcome::Rejected => Err(value),
            }
        })
    }
}

fn emit(start: Instant, snapshot: &Snapshot<String, String>) -> Result<()> {
    let line = serde_json::json!({
        "elapsedMs": start.elapsed().as_millis() as u64,
        "snapshot": snapshot_to_json(snapshot)?,
    });
    println!("{}", serde_json::to_string(&line)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("promise_status=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = args.tracker_options()?.into_config()?;
    debug!(?config, "Resolved tracker configuration");

    let metrics = Arc::new(TrackerMetrics::new()?);
    let mut tracker = PromiseStatusTracker::with_metrics(config.clone(), Arc::clone(&metrics));
    let operation = args.operation();

    let start = Instant::now();
    let dispose_at = args.dispose_after_ms.map(|ms| start + Duration::from_millis(ms));

    emit(start, &tracker.evaluate(Some(&operation), &config)?)?;

    loop {
        tokio::select! {
            change = tracker.next_change() => match change {
                Some(snapshot) => emit(start, &snapshot)?,
                None => break,
            },
            _ = tokio::time::sleep_until(dispose_at.unwrap_or(start)), if dispose_at.is_some() => {
                tracker.dispose()?;
                info!(elapsed_ms = start.elapsed().as_millis() as u64, "Tracker disposed");
                break;
            }
        }
    }

    if args.metrics {
        println!("{}", serde_json::to_string_pretty(&metrics.gather_json())?);
    }

    Ok(())
}
