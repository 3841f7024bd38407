//! Per-trial correlation state
//!
//! One [`TrialState`] is live at a time. It owns one [`CandidateRecord`] and
//! one [`ActivationRecord`] per candidate destination plus the page-level
//! timing results of the primary navigation. Event routers mutate it through
//! a shared [`TrialCell`], which hands out access only while the trial is
//! live; events arriving after teardown see an empty cell and become no-ops.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Network-level outcome of one candidate's speculative load.
///
/// Transitions only move forward (`None → Pending → {Finished, Failed,
/// Canceled}`), with one exception: a sub-target detach may force a
/// `Pending` record to `Canceled` as a terminal override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateOutcome {
    None,
    Pending,
    Finished,
    Failed,
    Canceled,
}

impl CandidateOutcome {
    /// Whether the outcome is terminal and must not change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Canceled)
    }

    /// Lowercase label used in output rows.
    pub fn label(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pending => "pending",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

/// Activation-channel status of one candidate, fed by speculative-load
/// status updates rather than raw network events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationStatus {
    None,
    Running,
    Success,
    Failed,
    Canceled,
}

/// Raw network bookkeeping for one candidate destination.
#[derive(Debug, Clone)]
pub struct CandidateRecord {
    /// Candidate destination URL (stable for the trial)
    pub url: String,
    /// Whether any request toward this candidate was observed
    pub started: bool,
    pub outcome: CandidateOutcome,
    pub http_status: Option<i64>,
    pub error_text: Option<String>,
    pub request_started_at: Option<Instant>,
    pub request_ended_at: Option<Instant>,
    /// Running byte total; monotonically non-decreasing within a trial
    pub bytes_transferred: u64,
}

impl CandidateRecord {
    fn new(url: String) -> Self {
        Self {
            url,
            started: false,
            outcome: CandidateOutcome::None,
            http_status: None,
            error_text: None,
            request_started_at: None,
            request_ended_at: None,
            bytes_transferred: 0,
        }
    }

    /// Duration between first request and terminal event, in milliseconds.
    pub fn duration_ms(&self) -> Option<u64> {
        match (self.request_started_at, self.request_ended_at) {
            (Some(start), Some(end)) => Some(end.duration_since(start).as_millis() as u64),
            _ => None,
        }
    }
}

/// Activation-signal bookkeeping for one candidate destination.
#[derive(Debug, Clone)]
pub struct ActivationRecord {
    pub status: ActivationStatus,
    /// Which signal stream produced the current status
    pub source: String,
    /// Human-readable detail carried alongside the status
    pub note: String,
    pub fail_reason: Option<String>,
}

impl ActivationRecord {
    fn new() -> Self {
        Self {
            status: ActivationStatus::None,
            source: String::new(),
            note: String::new(),
            fail_reason: None,
        }
    }
}

/// Aggregate state for one trial.
#[derive(Debug, Clone)]
pub struct TrialState {
    pub candidates: Vec<CandidateRecord>,
    pub activations: Vec<ActivationRecord>,
    /// Largest contentful paint of the primary navigation, activation-relative
    pub lcp_ms: Option<f64>,
    /// First contentful paint of the primary navigation, activation-relative
    pub fcp_ms: Option<f64>,
    /// Total transfer size of the primary navigation in bytes
    pub transfer_bytes: u64,
}

impl TrialState {
    /// Allocate rest-default records for the given candidate URLs.
    ///
    /// No side effects beyond allocation; indices are stable for the
    /// trial's lifetime.
    pub fn new(candidate_urls: Vec<String>) -> Self {
        let candidates = candidate_urls
            .iter()
            .cloned()
            .map(CandidateRecord::new)
            .collect();
        let activations = candidate_urls.iter().map(|_| ActivationRecord::new()).collect();
        Self {
            candidates,
            activations,
            lcp_ms: None,
            fcp_ms: None,
            transfer_bytes: 0,
        }
    }

    /// Force every still-pending candidate to a terminal outcome, stamping
    /// the end time exactly once. Used on detach (`Canceled`) and on trial
    /// finalization (`Failed`).
    pub fn finalize_pending(&mut self, outcome: CandidateOutcome) {
        debug_assert!(outcome.is_terminal());
        let now = Instant::now();
        for record in &mut self.candidates {
            if record.outcome == CandidateOutcome::Pending {
                record.outcome = outcome;
                if record.request_ended_at.is_none() {
                    record.request_ended_at = Some(now);
                }
            }
        }
    }
}

/// Shared handle to the currently-live trial state.
///
/// The orchestrator owns the trial's lifetime: [`begin`](TrialCell::begin)
/// installs a fresh state and [`end`](TrialCell::end) takes it out. Routers
/// and managers hold clones and mutate through [`with`](TrialCell::with),
/// which returns `None` once the trial has been torn down. This is the cancellation
/// check every mutation entry point performs before touching state.
#[derive(Debug, Clone, Default)]
pub struct TrialCell {
    inner: Arc<Mutex<Option<TrialState>>>,
}

impl TrialCell {
    /// Create an empty cell (no live trial).
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the state for a new trial, replacing any previous one.
    pub fn begin(&self, state: TrialState) {
        *self.lock() = Some(state);
    }

    /// Take the state out, ending the trial. Subsequent `with` calls no-op.
    pub fn end(&self) -> Option<TrialState> {
        self.lock().take()
    }

    /// Whether a trial is currently live.
    pub fn is_live(&self) -> bool {
        self.lock().is_some()
    }

    /// Run `f` against the live state, or return `None` if the trial has
    /// already been torn down.
    pub fn with<R>(&self, f: impl FnOnce(&mut TrialState) -> R) -> Option<R> {
        self.lock().as_mut().map(f)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<TrialState>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
