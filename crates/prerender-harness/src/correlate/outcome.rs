//! Trial outcome reduction
//!
//! Pure reduction of a finished [`TrialState`] into a single user-visible
//! verdict. Activation-status signals are authoritative when present; raw
//! network traffic toward a candidate is only a weak hint and classifies as
//! `Unknown` on its own.

use serde::{Deserialize, Serialize};

use crate::correlate::trial::{ActivationStatus, TrialState};

/// User-visible speculative-load verdict for one trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictStatus {
    Success,
    Canceled,
    Failed,
    /// Network traffic was observed toward a candidate but no definitive
    /// activation signal arrived
    Unknown,
    None,
}

/// Reduced verdict plus the signal that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialVerdict {
    pub status: VerdictStatus,
    pub detect_source: String,
    pub note: String,
}

/// Reduce a trial's final state into a verdict.
///
/// Fixed precedence, first match wins: any activation success, then any
/// activation cancel, then any activation failure, then started network
/// traffic (`Unknown`), then `None`.
pub fn reduce(state: &TrialState) -> TrialVerdict {
    if let Some(success) = state
        .activations
        .iter()
        .find(|a| a.status == ActivationStatus::Success)
    {
        return TrialVerdict {
            status: VerdictStatus::Success,
            detect_source: success.source.clone(),
            note: success.note.clone(),
        };
    }
    if let Some(canceled) = state
        .activations
        .iter()
        .find(|a| a.status == ActivationStatus::Canceled)
    {
        return TrialVerdict {
            status: VerdictStatus::Canceled,
            detect_source: canceled.source.clone(),
            note: canceled.note.clone(),
        };
    }
    if let Some(failed) = state
        .activations
        .iter()
        .find(|a| a.status == ActivationStatus::Failed)
    {
        return TrialVerdict {
            status: VerdictStatus::Failed,
            detect_source: failed.source.clone(),
            note: failed.note.clone(),
        };
    }
    if state.candidates.iter().any(|c| c.started) {
        return TrialVerdict {
            status: VerdictStatus::Unknown,
            detect_source: "network-only".to_string(),
            note: "no activation signal".to_string(),
        };
    }
    TrialVerdict {
        status: VerdictStatus::None,
        detect_source: "no-event".to_string(),
        note: "no speculative load observed".to_string(),
    }
}
