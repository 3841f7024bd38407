//! Per-session network event routing
//!
//! A [`SessionEventRouter`] binds to the network-lifecycle event stream of
//! exactly one debugging session (the visible page, or one speculative
//! sub-target) and reduces its events into the live trial's candidate
//! records. Destination attribution is either forced (sub-target sessions,
//! resolved once at attach) or per-URL via the registry (primary session).
//!
//! Delivery order across sessions is not guaranteed and events can race
//! trial teardown; every handler checks trial liveness first and drops the
//! event when the trial is gone.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tracing::trace;

use crate::correlate::trial::{CandidateOutcome, TrialCell};
use crate::destinations::DestinationRegistry;

/// A network-lifecycle event from one debugging session.
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    RequestStarted {
        request_id: String,
        url: String,
    },
    ResponseReceived {
        request_id: String,
        status: i64,
    },
    DataReceived {
        request_id: String,
        byte_count: u64,
    },
    LoadingFinished {
        request_id: String,
        encoded_byte_count: u64,
    },
    LoadingFailed {
        request_id: String,
        canceled: bool,
        error_text: String,
    },
}

/// Correlation bookkeeping for one attached debugging session.
#[derive(Debug, Default)]
pub struct SessionBinding {
    /// Debugging-session identifier (empty for the primary session)
    pub session_id: String,
    /// Maps in-flight request IDs to candidate slots
    pub request_map: HashMap<String, usize>,
    /// Slot every event of this session is attributed to, when known
    pub forced_index: Option<usize>,
}

/// Routes one session's network events into the live trial state.
#[derive(Debug)]
pub struct SessionEventRouter {
    trial: TrialCell,
    registry: Arc<DestinationRegistry>,
    binding: Mutex<SessionBinding>,
}

impl SessionEventRouter {
    /// Router for the primary session: destinations resolved per event URL.
    pub fn unforced(trial: TrialCell, registry: Arc<DestinationRegistry>) -> Self {
        Self::bind(trial, registry, String::new(), None)
    }

    /// Router for a sub-target session whose destination slot was resolved
    /// at attach time.
    pub fn forced(
        trial: TrialCell,
        registry: Arc<DestinationRegistry>,
        session_id: String,
        index: usize,
    ) -> Self {
        Self::bind(trial, registry, session_id, Some(index))
    }

    fn bind(
        trial: TrialCell,
        registry: Arc<DestinationRegistry>,
        session_id: String,
        forced_index: Option<usize>,
    ) -> Self {
        Self {
            trial,
            registry,
            binding: Mutex::new(SessionBinding {
                session_id,
                request_map: HashMap::new(),
                forced_index,
            }),
        }
    }

    /// Candidate slot this session is pinned to, if any.
    pub fn forced_index(&self) -> Option<usize> {
        self.binding_lock().forced_index
    }

    /// Handle one network event. No-op if the trial has been torn down.
    pub fn handle(&self, event: NetworkEvent) {
        match event {
            NetworkEvent::RequestStarted { request_id, url } => {
                self.on_request_started(request_id, &url);
            }
            NetworkEvent::ResponseReceived { request_id, status } => {
                self.on_response_received(&request_id, status);
            }
            NetworkEvent::DataReceived {
                request_id,
                byte_count,
            } => {
                self.on_data_received(&request_id, byte_count);
            }
            NetworkEvent::LoadingFinished {
                request_id,
                encoded_byte_count,
            } => {
                self.on_loading_finished(&request_id, encoded_byte_count);
            }
            NetworkEvent::LoadingFailed {
                request_id,
                canceled,
                error_text,
            } => {
                self.on_loading_failed(&request_id, canceled, error_text);
            }
        }
    }

    fn on_request_started(&self, request_id: String, url: &str) {
        let index = match self.binding_lock().forced_index {
            Some(idx) => Some(idx),
            None => self.registry.resolve(url),
        };
        // Unresolved URLs are unrelated traffic, not an error.
        let Some(index) = index else {
            trace!(url, "ignoring request for unresolved URL");
            return;
        };

        let touched = self.trial.with(|state| {
            let Some(record) = state.candidates.get_mut(index) else {
                return false;
            };
            if !record.started {
                record.started = true;
                record.request_started_at = Some(Instant::now());
                if record.outcome == CandidateOutcome::None {
                    record.outcome = CandidateOutcome::Pending;
                }
            }
            true
        });
        if touched == Some(true) {
            self.binding_lock().request_map.insert(request_id, index);
        }
    }

    fn on_response_received(&self, request_id: &str, status: i64) {
        let Some(index) = self.mapped_index(request_id) else {
            return;
        };
        self.trial.with(|state| {
            if let Some(record) = state.candidates.get_mut(index) {
                if record.http_status.is_none() && status != 0 {
                    record.http_status = Some(status);
                }
            }
        });
    }

    fn on_data_received(&self, request_id: &str, byte_count: u64) {
        let Some(index) = self.mapped_index(request_id) else {
            return;
        };
        self.trial.with(|state| {
            if let Some(record) = state.candidates.get_mut(index) {
                if !record.outcome.is_terminal() {
                    record.bytes_transferred += byte_count;
                }
            }
        });
    }

    fn on_loading_finished(&self, request_id: &str, encoded_byte_count: u64) {
        let Some(index) = self.mapped_index(request_id) else {
            return;
        };
        self.trial.with(|state| {
            if let Some(record) = state.candidates.get_mut(index) {
                if record.outcome.is_terminal() {
                    return;
                }
                record.bytes_transferred = record.bytes_transferred.max(encoded_byte_count);
                record.outcome = CandidateOutcome::Finished;
                record.request_ended_at = Some(Instant::now());
            }
        });
    }

    fn on_loading_failed(&self, request_id: &str, canceled: bool, error_text: String) {
        let Some(index) = self.mapped_index(request_id) else {
            return;
        };
        self.trial.with(|state| {
            if let Some(record) = state.candidates.get_mut(index) {
                if record.outcome.is_terminal() {
                    return;
                }
                record.outcome = if canceled {
                    CandidateOutcome::Canceled
                } else {
                    CandidateOutcome::Failed
                };
                if !error_text.is_empty() {
                    record.error_text = Some(error_text);
                }
                record.request_ended_at = Some(Instant::now());
            }
        });
    }

    fn mapped_index(&self, request_id: &str) -> Option<usize> {
        self.binding_lock().request_map.get(request_id).copied()
    }

    fn binding_lock(&self) -> MutexGuard<'_, SessionBinding> {
        match self.binding.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlate::trial::TrialState;
    use crate::destinations::Destination;

    fn setup() -> (TrialCell, Arc<DestinationRegistry>) {
        let registry = Arc::new(DestinationRegistry::new(vec![
            Destination {
                name: "Light".to_string(),
                url: "https://victim.lab-ish.com/".to_string(),
                selector: "#link-light".to_string(),
            },
            Destination {
                name: "Heavy".to_string(),
                url: "https://attack.lab-ish.com/".to_string(),
                selector: "#link-heavy".to_string(),
            },
        ]));
        let cell = TrialCell::new();
        cell.begin(TrialState::new(vec![
            "https://victim.lab-ish.com/".to_string(),
            "https://attack.lab-ish.com/".to_string(),
        ]));
        (cell, registry)
    }

    #[test]
    fn test_request_started_marks_pending() {
        let (cell, registry) = setup();
        let router = SessionEventRouter::unforced(cell.clone(), registry);

        router.handle(NetworkEvent::RequestStarted {
            request_id: "r1".to_string(),
            url: "https://victim.lab-ish.com/index.html".to_string(),
        });

        cell.with(|state| {
            assert!(state.candidates[0].started);
            assert_eq!(state.candidates[0].outcome, CandidateOutcome::Pending);
            assert!(state.candidates[0].request_started_at.is_some());
            assert!(!state.candidates[1].started);
        })
        .unwrap();
    }

    #[test]
    fn test_unresolved_url_is_ignored() {
        let (cell, registry) = setup();
        let router = SessionEventRouter::unforced(cell.clone(), registry);

        router.handle(NetworkEvent::RequestStarted {
            request_id: "r1".to_string(),
            url: "https://tracker.example/pixel.gif".to_string(),
        });

        cell.with(|state| {
            assert!(state.candidates.iter().all(|c| !c.started));
        })
        .unwrap();
    }

    #[test]
    fn test_forced_index_overrides_resolution() {
        let (cell, registry) = setup();
        let router =
            SessionEventRouter::forced(cell.clone(), registry, "sess-1".to_string(), 1);

        // URL resolves to slot 0, but the forced binding pins slot 1.
        router.handle(NetworkEvent::RequestStarted {
            request_id: "r1".to_string(),
            url: "https://victim.lab-ish.com/".to_string(),
        });

        cell.with(|state| {
            assert!(!state.candidates[0].started);
            assert!(state.candidates[1].started);
        })
        .unwrap();
    }

    #[test]
    fn test_byte_accounting_max_of_final_and_accumulated() {
        let (cell, registry) = setup();
        let router = SessionEventRouter::unforced(cell.clone(), registry);

        router.handle(NetworkEvent::RequestStarted {
            request_id: "r1".to_string(),
            url: "https://victim.lab-ish.com/".to_string(),
        });
        router.handle(NetworkEvent::DataReceived {
            request_id: "r1".to_string(),
            byte_count: 100,
        });
        router.handle(NetworkEvent::DataReceived {
            request_id: "r1".to_string(),
            byte_count: 150,
        });
        router.handle(NetworkEvent::LoadingFinished {
            request_id: "r1".to_string(),
            encoded_byte_count: 300,
        });

        cell.with(|state| {
            assert_eq!(state.candidates[0].bytes_transferred, 300);
            assert_eq!(state.candidates[0].outcome, CandidateOutcome::Finished);
            assert!(state.candidates[0].request_ended_at.is_some());
        })
        .unwrap();
    }

    #[test]
    fn test_accumulated_bytes_kept_when_larger_than_final() {
        let (cell, registry) = setup();
        let router = SessionEventRouter::unforced(cell.clone(), registry);

        router.handle(NetworkEvent::RequestStarted {
            request_id: "r1".to_string(),
            url: "https://victim.lab-ish.com/".to_string(),
        });
        router.handle(NetworkEvent::DataReceived {
            request_id: "r1".to_string(),
            byte_count: 500,
        });
        router.handle(NetworkEvent::LoadingFinished {
            request_id: "r1".to_string(),
            encoded_byte_count: 300,
        });

        cell.with(|state| {
            assert_eq!(state.candidates[0].bytes_transferred, 500);
        })
        .unwrap();
    }

    #[test]
    fn test_terminal_outcome_never_regresses() {
        let (cell, registry) = setup();
        let router = SessionEventRouter::unforced(cell.clone(), registry);

        router.handle(NetworkEvent::RequestStarted {
            request_id: "r1".to_string(),
            url: "https://victim.lab-ish.com/".to_string(),
        });
        router.handle(NetworkEvent::LoadingFinished {
            request_id: "r1".to_string(),
            encoded_byte_count: 300,
        });
        // A late failure for the same request must not flip the outcome.
        router.handle(NetworkEvent::LoadingFailed {
            request_id: "r1".to_string(),
            canceled: true,
            error_text: "net::ERR_ABORTED".to_string(),
        });

        cell.with(|state| {
            assert_eq!(state.candidates[0].outcome, CandidateOutcome::Finished);
            assert!(state.candidates[0].error_text.is_none());
        })
        .unwrap();
    }

    #[test]
    fn test_loading_failed_distinguishes_cancel() {
        let (cell, registry) = setup();
        let router = SessionEventRouter::unforced(cell.clone(), registry);

        router.handle(NetworkEvent::RequestStarted {
            request_id: "r1".to_string(),
            url: "https://victim.lab-ish.com/".to_string(),
        });
        router.handle(NetworkEvent::LoadingFailed {
            request_id: "r1".to_string(),
            canceled: false,
            error_text: "net::ERR_CONNECTION_RESET".to_string(),
        });

        cell.with(|state| {
            assert_eq!(state.candidates[0].outcome, CandidateOutcome::Failed);
            assert_eq!(
                state.candidates[0].error_text.as_deref(),
                Some("net::ERR_CONNECTION_RESET")
            );
        })
        .unwrap();
    }

    #[test]
    fn test_http_status_set_once() {
        let (cell, registry) = setup();
        let router = SessionEventRouter::unforced(cell.clone(), registry);

        router.handle(NetworkEvent::RequestStarted {
            request_id: "r1".to_string(),
            url: "https://victim.lab-ish.com/".to_string(),
        });
        router.handle(NetworkEvent::ResponseReceived {
            request_id: "r1".to_string(),
            status: 200,
        });
        router.handle(NetworkEvent::ResponseReceived {
            request_id: "r1".to_string(),
            status: 304,
        });

        cell.with(|state| {
            assert_eq!(state.candidates[0].http_status, Some(200));
        })
        .unwrap();
    }

    #[test]
    fn test_events_after_teardown_are_dropped() {
        let (cell, registry) = setup();
        let router = SessionEventRouter::unforced(cell.clone(), registry);

        router.handle(NetworkEvent::RequestStarted {
            request_id: "r1".to_string(),
            url: "https://victim.lab-ish.com/".to_string(),
        });
        let state = cell.end().unwrap();
        assert!(state.candidates[0].started);

        // Late events after teardown must be silently dropped.
        router.handle(NetworkEvent::LoadingFinished {
            request_id: "r1".to_string(),
            encoded_byte_count: 300,
        });
        assert!(!cell.is_live());
    }

    #[test]
    fn test_events_for_unmapped_requests_are_dropped() {
        let (cell, registry) = setup();
        let router = SessionEventRouter::unforced(cell.clone(), registry);

        router.handle(NetworkEvent::DataReceived {
            request_id: "never-seen".to_string(),
            byte_count: 64,
        });
        cell.with(|state| {
            assert_eq!(state.candidates[0].bytes_transferred, 0);
        })
        .unwrap();
    }
}
