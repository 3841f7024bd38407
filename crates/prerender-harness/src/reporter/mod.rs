//! Trial result reporting
//!
//! Each trial, run or skipped, produces exactly one [`TrialRow`]. Rows are
//! appended to a CSV sink as they are produced so a partially completed
//! campaign still leaves usable output behind.

mod csv;

pub use csv::{CsvSink, TIMEOUT_SENTINEL};

use serde::{Deserialize, Serialize};

use crate::correlate::trial::{CandidateRecord, TrialState};
use crate::correlate::{TrialVerdict, VerdictStatus};

/// Per-candidate detail fields of one output row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateReport {
    pub url: String,
    pub started: bool,
    pub result: String,
    pub http_status: Option<i64>,
    pub error: Option<String>,
    pub duration_ms: Option<u64>,
    pub transfer_kb: Option<f64>,
}

impl CandidateReport {
    fn from_record(record: &CandidateRecord) -> Self {
        Self {
            url: record.url.clone(),
            started: record.started,
            result: record.outcome.label().to_string(),
            http_status: record.http_status,
            error: record.error_text.clone(),
            duration_ms: record.duration_ms(),
            transfer_kb: record
                .started
                .then(|| record.bytes_transferred as f64 / 1024.0),
        }
    }
}

/// One output row: page-level timing plus per-candidate detail.
///
/// `lcp_ms`/`fcp_ms` of `None` mean the trial failed or timed out and the
/// numeric columns carry the `TimeOut` sentinel instead of a value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrialRow {
    pub condition: String,
    pub destination: String,
    pub trial_no: u32,
    pub lcp_ms: Option<f64>,
    pub fcp_ms: Option<f64>,
    pub transfer_mb: f64,
    pub prerendered: bool,
    pub candidates: Vec<CandidateReport>,
}

impl TrialRow {
    /// Build the row for a trial that ran, from its final state and verdict.
    ///
    /// `timed_out` selects the sentinel timing columns; candidate detail is
    /// reported either way so a failed trial keeps its partial signal.
    pub fn from_trial(
        condition: &str,
        destination: &str,
        trial_no: u32,
        state: &TrialState,
        verdict: &TrialVerdict,
        timed_out: bool,
    ) -> Self {
        let (lcp_ms, fcp_ms, transfer_mb) = if timed_out {
            (None, None, 0.0)
        } else {
            (
                state.lcp_ms,
                state.fcp_ms,
                state.transfer_bytes as f64 / 1024.0 / 1024.0,
            )
        };
        Self {
            condition: condition.to_string(),
            destination: destination.to_string(),
            trial_no,
            lcp_ms,
            fcp_ms,
            transfer_mb,
            prerendered: !timed_out && verdict.status == VerdictStatus::Success,
            candidates: state.candidates.iter().map(CandidateReport::from_record).collect(),
        }
    }

    /// Synthetic timeout row emitted by the circuit breaker without running
    /// a browser trial; candidate columns stay empty.
    pub fn synthetic(condition: &str, destination: &str, trial_no: u32) -> Self {
        Self {
            condition: condition.to_string(),
            destination: destination.to_string(),
            trial_no,
            lcp_ms: None,
            fcp_ms: None,
            transfer_mb: 0.0,
            prerendered: false,
            candidates: Vec::new(),
        }
    }
}
