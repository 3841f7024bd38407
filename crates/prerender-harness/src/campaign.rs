//! Campaign execution
//!
//! Iterates condition × destination × trial index, strictly sequentially
//! (exactly one trial is live at a time), applies the consecutive-failure
//! circuit breaker, and appends one output row per configured trial index,
//! always, including when the breaker converts the remaining indices of a
//! pair into synthetic timeout rows.

use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing::{info, warn};

use crate::config::{Condition, Config};
use crate::error::TrialError;
use crate::reporter::{CsvSink, TrialRow};

/// Result of one executed trial: the output row plus the error that aborted
/// it, if any. Failed trials still carry their partial candidate signal in
/// the row.
#[derive(Debug)]
pub struct TrialOutcome {
    pub row: TrialRow,
    pub error: Option<TrialError>,
}

/// Runs one trial end-to-end for a condition/destination pair.
///
/// The campaign runner is generic over this seam so the breaker and
/// row-emission logic can be exercised without a browser.
pub trait TrialExecutor {
    /// Run trial `trial_no` measuring destination `primary` under `condition`.
    fn run_trial(
        &mut self,
        condition: &Condition,
        primary: usize,
        trial_no: u32,
    ) -> impl std::future::Future<Output = TrialOutcome> + Send;
}

/// Summary of a completed campaign run.
#[derive(Debug, Clone)]
pub struct CampaignSummary {
    pub rows_written: u64,
    pub trials_executed: u64,
    pub trials_skipped: u64,
    pub trials_failed: u64,
    pub started_at: String,
    pub duration_ms: u64,
}

/// Drives a full campaign through a [`TrialExecutor`].
pub struct CampaignRunner<E> {
    executor: E,
    config: Arc<Config>,
    destination_filter: Option<Vec<String>>,
}

impl<E: TrialExecutor> CampaignRunner<E> {
    pub fn new(executor: E, config: Arc<Config>) -> Self {
        Self {
            executor,
            config,
            destination_filter: None,
        }
    }

    /// Restrict measurement to destinations whose name matches the filter
    /// (case-insensitive). A filter that matches nothing falls back to
    /// measuring all destinations.
    pub fn with_destination_filter(mut self, names: Vec<String>) -> Self {
        self.destination_filter = if names.is_empty() { None } else { Some(names) };
        self
    }

    fn measured_destinations(&self) -> Vec<usize> {
        let all: Vec<usize> = (0..self.config.destinations.len()).collect();
        let Some(filter) = &self.destination_filter else {
            return all;
        };
        let wanted: Vec<String> = filter.iter().map(|n| n.to_lowercase()).collect();
        let matched: Vec<usize> = all
            .iter()
            .copied()
            .filter(|idx| {
                wanted.contains(&self.config.destinations[*idx].name.to_lowercase())
            })
            .collect();
        if matched.is_empty() { all } else { matched }
    }

    /// Run every configured condition × destination × trial index, writing
    /// one row per index to `sink`.
    pub async fn run<W: Write>(&mut self, sink: &mut CsvSink<W>) -> Result<CampaignSummary> {
        let started_at = chrono::Utc::now().to_rfc3339();
        let start = Instant::now();
        let conditions = self.config.conditions.clone();
        let destinations = self.measured_destinations();
        let trials = self.config.campaign.trials;
        let threshold = self.config.campaign.skip_threshold;

        info!(
            campaign = %self.config.campaign.name,
            conditions = conditions.len(),
            destinations = destinations.len(),
            trials,
            "starting campaign"
        );

        let mut summary = CampaignSummary {
            rows_written: 0,
            trials_executed: 0,
            trials_skipped: 0,
            trials_failed: 0,
            started_at,
            duration_ms: 0,
        };

        for condition in &conditions {
            for &primary in &destinations {
                let destination = self.config.destinations[primary].name.clone();
                info!(condition = %condition.label, destination = %destination, "measuring pair");

                let mut consecutive_failures = 0u32;
                let mut trial_no = 1u32;
                while trial_no <= trials {
                    if consecutive_failures >= threshold {
                        warn!(
                            condition = %condition.label,
                            destination = %destination,
                            threshold,
                            remaining = trials - trial_no + 1,
                            "breaker tripped; emitting synthetic timeout rows"
                        );
                        for skipped_no in trial_no..=trials {
                            sink.write_row(&TrialRow::synthetic(
                                &condition.label,
                                &destination,
                                skipped_no,
                            ))?;
                            summary.rows_written += 1;
                            summary.trials_skipped += 1;
                        }
                        break;
                    }

                    let outcome = self.executor.run_trial(condition, primary, trial_no).await;
                    match &outcome.error {
                        Some(error) => {
                            consecutive_failures += 1;
                            summary.trials_failed += 1;
                            warn!(
                                condition = %condition.label,
                                destination = %destination,
                                trial_no,
                                streak = consecutive_failures,
                                %error,
                                "trial failed"
                            );
                        }
                        None => consecutive_failures = 0,
                    }
                    sink.write_row(&outcome.row)?;
                    summary.rows_written += 1;
                    summary.trials_executed += 1;
                    trial_no += 1;
                }
            }
        }

        summary.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            rows = summary.rows_written,
            executed = summary.trials_executed,
            skipped = summary.trials_skipped,
            failed = summary.trials_failed,
            duration_ms = summary.duration_ms,
            "campaign finished"
        );
        Ok(summary)
    }
}
