//! Integration tests for the output row contract
//!
//! One row per configured trial index, always, with the header on first
//! write and the TimeOut sentinel standing in for numeric columns on
//! failed or skipped trials.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use prerender_harness::campaign::{CampaignRunner, TrialExecutor, TrialOutcome};
use prerender_harness::config::{Condition, Config};
use prerender_harness::error::TrialError;
use prerender_harness::reporter::{CsvSink, TrialRow, TIMEOUT_SENTINEL};

const CONFIG: &str = r##"
    [campaign]
    name = "Contract"
    hub_url = "https://home.lab-ish.com/index.html"
    trials = 5
    skip_threshold = 2

    [[conditions]]
    label = "vanilla"

    [[conditions]]
    label = "Fast 3G"
    network_profile = "Fast3G"

    [[destinations]]
    name = "Light"
    url = "https://victim.lab-ish.com/"
    selector = "#link-light"

    [[destinations]]
    name = "Heavy"
    url = "https://attack.lab-ish.com/"
    selector = "#link-heavy"
"##;

/// Fails every trial for one destination under one condition; succeeds
/// everywhere else.
struct BrokenPairExecutor {
    broken_condition: String,
    broken_primary: usize,
    navigation_calls: u32,
}

impl TrialExecutor for BrokenPairExecutor {
    async fn run_trial(
        &mut self,
        condition: &Condition,
        primary: usize,
        trial_no: u32,
    ) -> TrialOutcome {
        self.navigation_calls += 1;
        let destination = if primary == 0 { "Light" } else { "Heavy" };
        if condition.label == self.broken_condition && primary == self.broken_primary {
            TrialOutcome {
                row: TrialRow::synthetic(&condition.label, destination, trial_no),
                error: Some(TrialError::Navigation("destination unreachable".to_string())),
            }
        } else {
            TrialOutcome {
                row: TrialRow {
                    condition: condition.label.clone(),
                    destination: destination.to_string(),
                    trial_no,
                    lcp_ms: Some(250.0),
                    fcp_ms: Some(120.0),
                    transfer_mb: 0.25,
                    prerendered: true,
                    candidates: Vec::new(),
                },
                error: None,
            }
        }
    }
}

#[tokio::test]
async fn every_configured_trial_index_produces_exactly_one_row() {
    let config = Arc::new(Config::from_str(CONFIG).unwrap());
    let executor = BrokenPairExecutor {
        broken_condition: "Fast 3G".to_string(),
        broken_primary: 1,
        navigation_calls: 0,
    };
    let mut runner = CampaignRunner::new(executor, Arc::clone(&config));
    let mut sink = CsvSink::from_writer(Vec::new(), 1);

    let summary = runner.run(&mut sink).await.unwrap();

    // 2 conditions x 2 destinations x 5 trials.
    assert_eq!(summary.rows_written, 20);

    let text = String::from_utf8(sink.into_inner()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 21);
    assert!(lines[0].starts_with("Condition,Page,Trial_No"));

    // The broken pair: threshold 2 means trials 1-2 run and fail, 3-5 are
    // synthetic; the executor is never invoked for the skipped indices.
    let broken_rows: Vec<&&str> = lines
        .iter()
        .filter(|l| l.starts_with("\"Fast 3G\",\"Heavy\""))
        .collect();
    assert_eq!(broken_rows.len(), 5);
    assert!(broken_rows.iter().all(|l| l.contains(TIMEOUT_SENTINEL)));
    assert_eq!(summary.trials_skipped, 3);
    // Skipped indices never reach the executor.
    assert_eq!(summary.trials_executed, 17);

    // Healthy pairs have numeric timing columns.
    let healthy: Vec<&&str> = lines
        .iter()
        .filter(|l| l.starts_with("\"vanilla\",\"Light\""))
        .collect();
    assert_eq!(healthy.len(), 5);
    assert!(healthy.iter().all(|l| l.contains("250.00,120.00")));
}

#[tokio::test]
async fn rows_preserve_campaign_iteration_order() {
    let config = Arc::new(Config::from_str(CONFIG).unwrap());
    let executor = BrokenPairExecutor {
        broken_condition: "none".to_string(),
        broken_primary: 0,
        navigation_calls: 0,
    };
    let mut runner = CampaignRunner::new(executor, config);
    let mut sink = CsvSink::from_writer(Vec::new(), 1);
    runner.run(&mut sink).await.unwrap();

    let text = String::from_utf8(sink.into_inner()).unwrap();
    let first_data_lines: Vec<String> = text
        .lines()
        .skip(1)
        .take(6)
        .map(|l| l.split(',').take(3).collect::<Vec<_>>().join(","))
        .collect();

    // Condition-major, destination-minor, trial index innermost.
    assert_eq!(first_data_lines[0], "\"vanilla\",\"Light\",1");
    assert_eq!(first_data_lines[4], "\"vanilla\",\"Light\",5");
    assert_eq!(first_data_lines[5], "\"vanilla\",\"Heavy\",1");
}
