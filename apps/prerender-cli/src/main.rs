//! Speculative-load measurement CLI
//!
//! Loads a TOML campaign configuration, launches a browser, and runs the
//! full condition × destination × trial sweep, appending one CSV row per
//! trial.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use prerender_harness::campaign::CampaignRunner;
use prerender_harness::orchestrator::TrialOrchestrator;
use prerender_harness::reporter::CsvSink;
use prerender_harness::{cdp, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "prerender-cli")]
#[command(
    version,
    about = "Measure speculative page loading under impaired network/CPU conditions"
)]
struct Args {
    /// Path to the campaign configuration file
    #[arg(short, long, default_value = "campaign.toml")]
    config: PathBuf,

    /// Override the configured output file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Measure only these destinations (comma-separated names)
    #[arg(short, long, value_delimiter = ',')]
    targets: Vec<String>,

    /// Run with a visible browser window
    #[arg(long)]
    headful: bool,

    /// Path to a specific Chrome/Chromium executable
    #[arg(long)]
    chrome: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting prerender-cli v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load campaign config {}", args.config.display()))?;
    if let Some(output) = &args.output {
        config.campaign.output_file = output.display().to_string();
    }
    let config = Arc::new(config);

    tracing::info!(
        campaign = %config.campaign.name,
        hub = %config.campaign.hub_url,
        trials = config.campaign.trials,
        dwell_ms = config.campaign.dwell_ms,
        output = %config.campaign.output_file,
        "campaign loaded"
    );

    let (browser, browser_handle) = cdp::launch_browser(!args.headful, args.chrome).await?;

    let candidate_slots = config.destinations.len() - 1;
    let mut sink = CsvSink::create(&config.campaign.output_file, candidate_slots)?;

    let orchestrator = TrialOrchestrator::new(browser, Arc::clone(&config)).await?;
    let mut runner = CampaignRunner::new(orchestrator, Arc::clone(&config))
        .with_destination_filter(args.targets);

    let summary = runner.run(&mut sink).await?;

    tracing::info!(
        rows = summary.rows_written,
        executed = summary.trials_executed,
        skipped = summary.trials_skipped,
        failed = summary.trials_failed,
        "all measurements complete"
    );

    browser_handle.abort();
    Ok(())
}
