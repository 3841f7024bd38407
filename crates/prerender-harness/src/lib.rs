//! Speculative-load measurement harness
//!
//! This crate drives a browser through a fixed user journey (land on a hub
//! page, dwell, navigate to one of several destinations) under a
//! controlled network/CPU impairment condition, measures paint timing on
//! the destination document, and classifies whether each destination was
//! speculatively loaded ahead of the navigation.
//!
//! The heart of the crate is the [`correlate`] module: it attaches to the
//! debugging sessions involved in a trial (the visible page plus any
//! speculative sub-targets), consumes their asynchronous network and
//! lifecycle events, and reduces them into a single per-trial verdict.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use prerender_harness::{
//!     campaign::CampaignRunner, cdp, config::Config, orchestrator::TrialOrchestrator,
//!     reporter::CsvSink,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Arc::new(Config::from_file("campaign.toml")?);
//! let (browser, _handler) = cdp::launch_browser(true, None).await?;
//!
//! let orchestrator = TrialOrchestrator::new(browser, Arc::clone(&config)).await?;
//! let mut sink = CsvSink::create(
//!     &config.campaign.output_file,
//!     config.destinations.len() - 1,
//! )?;
//!
//! let summary = CampaignRunner::new(orchestrator, config).run(&mut sink).await?;
//! println!("{} rows written", summary.rows_written);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! Campaigns are configured using TOML files:
//!
//! ```toml
//! [campaign]
//! name = "dwell-2s"
//! hub_url = "https://home.lab-ish.com/index.html"
//! trials = 30
//! dwell_ms = 2000
//!
//! [[conditions]]
//! label = "Fast 3G"
//! network_profile = "Fast3G"
//!
//! [[destinations]]
//! name = "Light"
//! url = "https://victim.lab-ish.com/"
//! selector = "#link-light"
//!
//! [[destinations]]
//! name = "Heavy"
//! url = "https://attack.lab-ish.com/"
//! selector = "#link-heavy"
//! ```

pub mod campaign;
pub mod cdp;
pub mod config;
pub mod correlate;
pub mod destinations;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod reporter;
pub mod throttling;

// Re-export main types for convenience
pub use campaign::{CampaignRunner, CampaignSummary, TrialExecutor, TrialOutcome};
pub use config::Config;
pub use correlate::{TrialVerdict, VerdictStatus};
pub use destinations::{Destination, DestinationRegistry};
pub use error::{TrialError, TrialResult};
pub use reporter::{CsvSink, TrialRow};
