//! Trial-level error taxonomy
//!
//! Every variant aborts the current trial and counts toward the
//! consecutive-failure breaker; none is retried within a trial slot. A
//! best-effort instrumentation failure is deliberately *not* represented
//! here: it is logged and the trial continues with reduced fidelity.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for trial execution
pub type TrialResult<T> = std::result::Result<T, TrialError>;

/// Errors that abort a single trial
#[derive(Error, Debug)]
pub enum TrialError {
    /// The hub page could not be reached or the trial context could not be
    /// prepared; a setup fault, not a measurement outcome
    #[error("Setup failed: {0}")]
    Setup(String),

    /// The navigation to the destination did not complete
    #[error("Navigation failed: {0}")]
    Navigation(String),

    /// The activation click on the hub page failed
    #[error("Activation failed: {0}")]
    Activation(String),

    /// Paint-timing collection on the destination document failed
    #[error("Metrics collection failed: {0}")]
    Metrics(String),

    /// The global per-trial deadline fired
    #[error("Trial deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
}

impl TrialError {
    /// Whether the hub page itself was unreachable (no navigation was ever
    /// attempted, no metrics exist).
    pub fn is_setup(&self) -> bool {
        matches!(self, Self::Setup(_))
    }
}
