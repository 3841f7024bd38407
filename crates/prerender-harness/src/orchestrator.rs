//! Per-trial orchestration
//!
//! Runs one trial end-to-end: opens a fresh page, applies the impairment
//! condition, arms the correlation engine, walks the hub → dwell → navigate
//! sequence under a global deadline, collects paint timing, reduces the
//! trial state into a verdict, and tears everything down on every exit
//! path. Trials never overlap; the orchestrator is not re-entrant.

use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::{Browser, Page};
use tracing::{debug, instrument, warn};

use crate::campaign::{TrialExecutor, TrialOutcome};
use crate::cdp::{self, ListenerGuard};
use crate::config::{Condition, Config};
use crate::correlate::{
    reduce, CandidateOutcome, SessionEventRouter, SubTargetLifecycleManager, TrialCell, TrialState,
};
use crate::destinations::{Destination, DestinationRegistry};
use crate::error::TrialError;
use crate::metrics::PaintTimingCollector;
use crate::reporter::TrialRow;
use crate::throttling;

/// Tall viewport so every hub link is in view for the activation click.
const VIEWPORT_WIDTH: i64 = 1280;
const VIEWPORT_HEIGHT: i64 = 20_000;

/// Grace period after the hub load for speculative sub-targets to appear.
const HUB_SETTLE: Duration = Duration::from_millis(200);

/// Runs trials against a shared browser instance.
///
/// The browser-level target attach/detach stream is subscribed exactly once
/// here and lives for the whole campaign; the per-trial window is enforced
/// by arming and disarming the sub-target manager around each trial.
pub struct TrialOrchestrator {
    browser: Arc<Browser>,
    config: Arc<Config>,
    registry: Arc<DestinationRegistry>,
    trial: TrialCell,
    manager: Arc<SubTargetLifecycleManager>,
    _watcher: ListenerGuard,
}

impl TrialOrchestrator {
    /// Arm the campaign-wide target watcher and build the orchestrator.
    pub async fn new(browser: Arc<Browser>, config: Arc<Config>) -> anyhow::Result<Self> {
        let registry = Arc::new(DestinationRegistry::new(config.destinations.clone()));
        let trial = TrialCell::new();
        let manager = Arc::new(SubTargetLifecycleManager::new(trial.clone()));
        let watcher =
            cdp::attach_target_watcher(Arc::clone(&browser), Arc::clone(&manager)).await?;

        Ok(Self {
            browser,
            config,
            registry,
            trial,
            manager,
            _watcher: watcher,
        })
    }

    /// Run one trial, always producing a row.
    #[instrument(skip(self, condition), fields(condition = %condition.label))]
    pub async fn execute_trial(
        &self,
        condition: &Condition,
        primary: usize,
        trial_no: u32,
    ) -> TrialOutcome {
        let Some(destination) = self.registry.get(primary).cloned() else {
            // Defensive: the campaign runner only passes registry indices.
            let row = TrialRow::synthetic(&condition.label, "unknown", trial_no);
            return TrialOutcome {
                row,
                error: Some(TrialError::Setup(format!(
                    "unknown destination index {primary}"
                ))),
            };
        };

        let candidate_registry = Arc::new(self.registry.candidates_for(primary));
        let candidate_urls: Vec<String> =
            candidate_registry.iter().map(|d| d.url.clone()).collect();

        self.trial.begin(TrialState::new(candidate_urls));
        self.manager.arm(Arc::clone(&candidate_registry));

        let result = self
            .run_measured(condition, &destination, Arc::clone(&candidate_registry))
            .await;

        // Finalize partially populated records so a timed-out trial still
        // yields a best-effort reduced verdict.
        self.trial
            .with(|state| state.finalize_pending(CandidateOutcome::Failed));
        let state = self
            .trial
            .end()
            .unwrap_or_else(|| TrialState::new(Vec::new()));
        self.manager.disarm();

        let verdict = reduce(&state);
        let error = result.err();
        let row = TrialRow::from_trial(
            &condition.label,
            &destination.name,
            trial_no,
            &state,
            &verdict,
            error.is_some(),
        );
        TrialOutcome { row, error }
    }

    /// The fallible part of a trial: page lifecycle plus the deadline race.
    async fn run_measured(
        &self,
        condition: &Condition,
        destination: &Destination,
        candidate_registry: Arc<DestinationRegistry>,
    ) -> Result<(), TrialError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| TrialError::Setup(format!("could not open page: {e}")))?;

        let deadline = self.config.campaign.trial_timeout();
        let driven = self.drive(&page, condition, destination, candidate_registry);
        let result = match tokio::time::timeout(deadline, driven).await {
            Ok(result) => result,
            Err(_) => Err(TrialError::DeadlineExceeded(deadline)),
        };

        // Unconditional teardown: the page context never outlives the trial.
        if let Err(e) = page.close().await {
            warn!(error = %e, "failed to close trial page");
        }
        result
    }

    /// hub load → dwell → activation click + navigation wait → paint timing.
    ///
    /// Router subscriptions are scoped to this future; abandoning it on
    /// deadline expiry drops the guards and detaches every listener.
    async fn drive(
        &self,
        page: &Page,
        condition: &Condition,
        destination: &Destination,
        candidate_registry: Arc<DestinationRegistry>,
    ) -> Result<(), TrialError> {
        cdp::set_viewport(page, VIEWPORT_WIDTH, VIEWPORT_HEIGHT)
            .await
            .map_err(|e| TrialError::Setup(e.to_string()))?;
        cdp::instrument_primary_page(page)
            .await
            .map_err(|e| TrialError::Setup(e.to_string()))?;

        // Impairment failure is non-fatal; the trial runs with reduced fidelity.
        if let Err(e) = throttling::apply_condition(page, condition).await {
            warn!(condition = %condition.label, error = %e, "could not apply impairment condition");
        }

        let router = Arc::new(SessionEventRouter::unforced(
            self.trial.clone(),
            candidate_registry,
        ));
        let _network_guard = cdp::attach_network_router(page, router)
            .await
            .map_err(|e| TrialError::Setup(e.to_string()))?;
        let _preload_guard = cdp::attach_preload_listener(page, Arc::clone(&self.manager))
            .await
            .map_err(|e| TrialError::Setup(e.to_string()))?;

        page.goto(self.config.campaign.hub_url.as_str())
            .await
            .map_err(|e| TrialError::Setup(format!("hub navigation failed: {e}")))?;
        page.wait_for_navigation()
            .await
            .map_err(|e| TrialError::Setup(format!("hub load incomplete: {e}")))?;

        // Speculative loading is expected to start during the dwell window.
        tokio::time::sleep(HUB_SETTLE).await;
        tokio::time::sleep(self.config.campaign.dwell()).await;

        let navigation = page.wait_for_navigation();
        let activation = async {
            let element = page
                .find_element(destination.selector.as_str())
                .await
                .map_err(|e| {
                    TrialError::Activation(format!(
                        "selector {} not found: {e}",
                        destination.selector
                    ))
                })?;
            element
                .click()
                .await
                .map_err(|e| TrialError::Activation(format!("click failed: {e}")))?;
            Ok::<(), TrialError>(())
        };
        let (nav_result, click_result) = tokio::join!(navigation, activation);
        click_result?;
        nav_result.map_err(|e| TrialError::Navigation(e.to_string()))?;

        let timing = PaintTimingCollector::new()
            .collect(page)
            .await
            .map_err(|e| TrialError::Metrics(e.to_string()))?;

        self.trial.with(|state| {
            state.lcp_ms = Some(timing.lcp_ms);
            state.fcp_ms = Some(timing.fcp_ms);
            state.transfer_bytes = timing.transfer_bytes;
        });
        debug!(
            lcp_ms = timing.lcp_ms,
            fcp_ms = timing.fcp_ms,
            activated = timing.activated,
            "trial measured"
        );
        Ok(())
    }
}

impl TrialExecutor for TrialOrchestrator {
    async fn run_trial(
        &mut self,
        condition: &Condition,
        primary: usize,
        trial_no: u32,
    ) -> TrialOutcome {
        self.execute_trial(condition, primary, trial_no).await
    }
}
