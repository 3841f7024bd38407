//! Sub-target lifecycle management
//!
//! The browser spawns auxiliary debugging targets for speculative
//! (pre-)loads. This module watches the browser-level attach/detach stream,
//! decides which attached targets are speculative sub-targets, pins each one
//! to a candidate slot, and hands out a forced-index
//! [`SessionEventRouter`](crate::correlate::router::SessionEventRouter) for
//! its lifetime. It also consumes the independent speculative-load status
//! stream that feeds the activation records.
//!
//! The attach/detach stream is shared across the whole campaign (subscribed
//! once at startup); the manager is re-armed per trial and ignores events
//! that arrive outside the live trial window.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, trace};

use crate::correlate::router::SessionEventRouter;
use crate::correlate::trial::{ActivationStatus, CandidateOutcome, TrialCell};
use crate::destinations::DestinationRegistry;

/// Target subtype Chrome reports for prerender sub-targets.
pub const PRERENDER_SUBTYPE: &str = "prerender";

/// Source label recorded when a detach forces an activation record closed.
pub const LIFECYCLE_DETACH_SOURCE: &str = "lifecycle-detach";

/// Source label recorded for the speculative-load status stream.
pub const STATUS_UPDATE_SOURCE: &str = "status-update";

/// A debugging-target attach notification.
#[derive(Debug, Clone)]
pub struct TargetAttached {
    pub session_id: String,
    pub target_id: String,
    pub url: String,
    /// Target subtype as reported by the browser ("prerender" for
    /// speculative sub-targets)
    pub subtype: Option<String>,
}

/// Phase of a speculative-load status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadPhase {
    Pending,
    Running,
    Success,
    Failure,
}

/// One update from the speculative-load status stream.
#[derive(Debug, Clone)]
pub struct PreloadUpdate {
    /// URL of the speculatively loaded document
    pub url: String,
    pub phase: PreloadPhase,
    /// Final status detail, when the browser reported one
    /// (e.g. "Activated", "PrerenderingDisabledByDevTools")
    pub final_status: Option<String>,
}

/// Final-status value meaning instrumentation itself disabled prerendering.
const DISABLED_BY_DEVTOOLS: &str = "PrerenderingDisabledByDevTools";

/// Lifecycle state of one tracked sub-target session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubTargetState {
    /// Seen, candidate slot resolved, router not (yet) delivering events
    Observed,
    Attached,
    Detached,
}

#[derive(Debug)]
struct SessionTrack {
    state: SubTargetState,
    candidate_index: usize,
    router: Option<Arc<SessionEventRouter>>,
}

/// Watches sub-target attach/detach notifications and the speculative-load
/// status stream, wiring routers for the lifetime of each sub-target.
#[derive(Debug)]
pub struct SubTargetLifecycleManager {
    trial: TrialCell,
    armed: Mutex<Option<Arc<DestinationRegistry>>>,
    sessions: Mutex<HashMap<String, SessionTrack>>,
}

impl SubTargetLifecycleManager {
    pub fn new(trial: TrialCell) -> Self {
        Self {
            trial,
            armed: Mutex::new(None),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Arm the manager for a new trial with that trial's candidate registry.
    pub fn arm(&self, registry: Arc<DestinationRegistry>) {
        *lock(&self.armed) = Some(registry);
        lock(&self.sessions).clear();
    }

    /// Disarm after a trial; attach/detach events are ignored until re-armed.
    pub fn disarm(&self) {
        *lock(&self.armed) = None;
        lock(&self.sessions).clear();
    }

    /// Candidate slots currently claimed by live sub-target sessions.
    pub fn used_slots(&self) -> HashSet<usize> {
        lock(&self.sessions)
            .values()
            .filter(|track| track.state != SubTargetState::Detached)
            .map(|track| track.candidate_index)
            .collect()
    }

    /// Lifecycle state of a tracked session, if known.
    pub fn session_state(&self, session_id: &str) -> Option<SubTargetState> {
        lock(&self.sessions).get(session_id).map(|t| t.state)
    }

    /// Handle a target attach notification.
    ///
    /// Returns the forced-index router for the new sub-target session so the
    /// transport layer can wire its network event stream, or `None` when the
    /// target is not a speculative sub-target or no trial is live.
    pub fn on_attached(&self, event: TargetAttached) -> Option<Arc<SessionEventRouter>> {
        if event.subtype.as_deref() != Some(PRERENDER_SUBTYPE) {
            trace!(target_id = %event.target_id, "ignoring non-prerender target");
            return None;
        }
        let registry = lock(&self.armed).clone()?;
        if !self.trial.is_live() {
            trace!(session_id = %event.session_id, "attach outside live trial window");
            return None;
        }

        let index = registry.resolve_with_fallback(&event.url, &self.used_slots());
        let router = Arc::new(SessionEventRouter::forced(
            self.trial.clone(),
            registry,
            event.session_id.clone(),
            index,
        ));
        debug!(
            session_id = %event.session_id,
            url = %event.url,
            candidate = index,
            "prerender sub-target attached"
        );
        lock(&self.sessions).insert(
            event.session_id,
            SessionTrack {
                state: SubTargetState::Attached,
                candidate_index: index,
                router: Some(Arc::clone(&router)),
            },
        );
        Some(router)
    }

    /// Handle a target detach notification.
    ///
    /// A detach before completion is the authoritative signal that the
    /// browser discarded the speculative load: still-pending candidate
    /// records are forced to `Canceled` and untouched activation records are
    /// closed with the lifecycle-detach source. Unknown sessions are a no-op.
    pub fn on_detached(&self, session_id: &str) {
        let track = lock(&self.sessions).remove(session_id);
        let Some(track) = track else {
            return;
        };
        if track.router.is_none() {
            return;
        }
        debug!(session_id, candidate = track.candidate_index, "prerender sub-target detached");

        self.trial.with(|state| {
            state.finalize_pending(CandidateOutcome::Canceled);
            for activation in &mut state.activations {
                if activation.status == ActivationStatus::None {
                    activation.status = ActivationStatus::Canceled;
                    activation.source = LIFECYCLE_DETACH_SOURCE.to_string();
                    activation.note = "detached".to_string();
                }
            }
        });
    }

    /// Handle one speculative-load status update.
    ///
    /// Precedence: an explicit success always wins; a disabled-by-
    /// instrumentation final status is a failure with a recorded reason; a
    /// generic failure is a failure; running/pending only leaves a note
    /// while the status is still unset.
    pub fn on_preload_update(&self, update: PreloadUpdate) {
        let Some(registry) = lock(&self.armed).clone() else {
            return;
        };
        let Some(index) = registry.resolve(&update.url) else {
            trace!(url = %update.url, "preload update for unresolved URL");
            return;
        };
        let final_status = update.final_status.clone().unwrap_or_default();
        let activated = update.phase == PreloadPhase::Success || final_status == "Activated";

        self.trial.with(|state| {
            let Some(activation) = state.activations.get_mut(index) else {
                return;
            };
            if activated {
                activation.status = ActivationStatus::Success;
                activation.source = STATUS_UPDATE_SOURCE.to_string();
                activation.note = if final_status.is_empty() {
                    "Success".to_string()
                } else {
                    final_status.clone()
                };
                return;
            }
            match update.phase {
                PreloadPhase::Failure => {
                    if matches!(
                        activation.status,
                        ActivationStatus::None | ActivationStatus::Running
                    ) {
                        activation.status = ActivationStatus::Failed;
                        activation.source = STATUS_UPDATE_SOURCE.to_string();
                        activation.note = if final_status.is_empty() {
                            "Failure".to_string()
                        } else {
                            final_status.clone()
                        };
                        if final_status == DISABLED_BY_DEVTOOLS {
                            activation.fail_reason = Some("DevToolsDisabled".to_string());
                        }
                    }
                }
                PreloadPhase::Running | PreloadPhase::Pending => {
                    if activation.status == ActivationStatus::None {
                        activation.note = "running".to_string();
                        activation.source = STATUS_UPDATE_SOURCE.to_string();
                    }
                }
                PreloadPhase::Success => {}
            }
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
