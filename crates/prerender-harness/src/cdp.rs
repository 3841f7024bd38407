//! Chrome DevTools Protocol wiring
//!
//! Translates chromiumoxide event streams into the correlation engine's
//! transport-agnostic events and manages the subscriptions' lifetimes.
//! Every attach returns a [`ListenerGuard`]; teardown drops the guard,
//! which aborts the listener tasks unconditionally, so no subscription
//! survives past trial end even on the error path.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    ClearBrowserCacheParams, ClearBrowserCookiesParams, EventDataReceived, EventLoadingFailed,
    EventLoadingFinished, EventRequestWillBeSent, EventResponseReceived, SetCacheDisabledParams,
};
use chromiumoxide::cdp::browser_protocol::preload::{
    EventPrerenderStatusUpdated, PreloadingStatus,
};
use chromiumoxide::cdp::browser_protocol::target::{
    EventAttachedToTarget, EventDetachedFromTarget, SetAutoAttachParams,
};
use chromiumoxide::cdp::browser_protocol::{network, preload};
use chromiumoxide::cdp::js_protocol::runtime::RunIfWaitingForDebuggerParams;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::correlate::router::{NetworkEvent, SessionEventRouter};
use crate::correlate::subtarget::{
    PreloadPhase, PreloadUpdate, SubTargetLifecycleManager, TargetAttached,
};

/// Handle to a set of event subscriptions.
///
/// Dropping (or explicitly detaching) the guard aborts all listener tasks
/// and releases any nested per-session guards.
#[derive(Debug, Default)]
pub struct ListenerGuard {
    tasks: Vec<JoinHandle<()>>,
    children: Option<Arc<Mutex<HashMap<String, ListenerGuard>>>>,
}

impl ListenerGuard {
    fn new(tasks: Vec<JoinHandle<()>>) -> Self {
        Self {
            tasks,
            children: None,
        }
    }

    /// Detach all subscriptions now instead of waiting for drop.
    pub fn detach(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(children) = self.children.take() {
            if let Ok(mut map) = children.lock() {
                map.clear();
            }
        }
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Launch a headless browser suitable for measurement campaigns.
///
/// Certificate errors are ignored so lab origins with self-signed
/// certificates can be measured. The returned handle drives the browser's
/// event loop and ends when the browser closes.
pub async fn launch_browser(
    headless: bool,
    executable: Option<PathBuf>,
) -> Result<(Arc<Browser>, JoinHandle<()>)> {
    let mut builder = BrowserConfig::builder();
    if !headless {
        builder = builder.with_head();
    }
    if let Some(path) = executable {
        builder = builder.chrome_executable(path);
    }
    builder = builder.arg("--ignore-certificate-errors");

    let config = builder
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build browser config: {}", e))?;

    info!("Launching browser");
    let (browser, mut handler) = Browser::launch(config)
        .await
        .context("Failed to launch browser")?;

    let handle = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if event.is_err() {
                break;
            }
        }
    });

    Ok((Arc::new(browser), handle))
}

/// Prepare the primary page session for a trial.
///
/// Network observation is required; cache/cookie clearing and preload
/// observation are best-effort and only logged when unavailable.
pub async fn instrument_primary_page(page: &Page) -> Result<()> {
    page.execute(network::EnableParams::default())
        .await
        .context("Failed to enable network observation")?;

    if let Err(e) = page.execute(ClearBrowserCacheParams::default()).await {
        warn!(error = %e, "could not clear browser cache");
    }
    if let Err(e) = page.execute(ClearBrowserCookiesParams::default()).await {
        warn!(error = %e, "could not clear browser cookies");
    }
    if let Err(e) = execute_cache_disabled(page).await {
        warn!(error = %e, "could not disable cache");
    }
    if let Err(e) = page.execute(preload::EnableParams::default()).await {
        warn!(error = %e, "could not enable preload observation");
    }
    if let Err(e) = page.execute(RunIfWaitingForDebuggerParams::default()).await {
        warn!(error = %e, "could not resume page");
    }
    Ok(())
}

/// Set the trial viewport (tall enough that every hub link is visible).
pub async fn set_viewport(page: &Page, width: i64, height: i64) -> Result<()> {
    let params = SetDeviceMetricsOverrideParams::builder()
        .width(width)
        .height(height)
        .device_scale_factor(1.0)
        .mobile(false)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build viewport params: {}", e))?;
    page.execute(params).await.context("Failed to set viewport")?;
    Ok(())
}

/// Subscribe a router to a page session's network-lifecycle events.
pub async fn attach_network_router(
    page: &Page,
    router: Arc<SessionEventRouter>,
) -> Result<ListenerGuard> {
    let mut tasks = Vec::with_capacity(5);

    let mut requests = page
        .event_listener::<EventRequestWillBeSent>()
        .await
        .context("Failed to subscribe to request events")?;
    let target = Arc::clone(&router);
    tasks.push(tokio::spawn(async move {
        while let Some(event) = requests.next().await {
            target.handle(NetworkEvent::RequestStarted {
                request_id: event.request_id.inner().clone(),
                url: event.request.url.clone(),
            });
        }
    }));

    let mut responses = page
        .event_listener::<EventResponseReceived>()
        .await
        .context("Failed to subscribe to response events")?;
    let target = Arc::clone(&router);
    tasks.push(tokio::spawn(async move {
        while let Some(event) = responses.next().await {
            target.handle(NetworkEvent::ResponseReceived {
                request_id: event.request_id.inner().clone(),
                status: event.response.status,
            });
        }
    }));

    let mut chunks = page
        .event_listener::<EventDataReceived>()
        .await
        .context("Failed to subscribe to data events")?;
    let target = Arc::clone(&router);
    tasks.push(tokio::spawn(async move {
        while let Some(event) = chunks.next().await {
            target.handle(NetworkEvent::DataReceived {
                request_id: event.request_id.inner().clone(),
                byte_count: event.data_length.max(0) as u64,
            });
        }
    }));

    let mut finished = page
        .event_listener::<EventLoadingFinished>()
        .await
        .context("Failed to subscribe to loading-finished events")?;
    let target = Arc::clone(&router);
    tasks.push(tokio::spawn(async move {
        while let Some(event) = finished.next().await {
            target.handle(NetworkEvent::LoadingFinished {
                request_id: event.request_id.inner().clone(),
                encoded_byte_count: event.encoded_data_length.max(0.0) as u64,
            });
        }
    }));

    let mut failed = page
        .event_listener::<EventLoadingFailed>()
        .await
        .context("Failed to subscribe to loading-failed events")?;
    tasks.push(tokio::spawn(async move {
        while let Some(event) = failed.next().await {
            router.handle(NetworkEvent::LoadingFailed {
                request_id: event.request_id.inner().clone(),
                canceled: event.canceled.unwrap_or(false),
                error_text: event.error_text.clone(),
            });
        }
    }));

    Ok(ListenerGuard::new(tasks))
}

/// Subscribe the manager to the page's speculative-load status stream.
pub async fn attach_preload_listener(
    page: &Page,
    manager: Arc<SubTargetLifecycleManager>,
) -> Result<ListenerGuard> {
    let mut updates = page
        .event_listener::<EventPrerenderStatusUpdated>()
        .await
        .context("Failed to subscribe to preload status events")?;

    let task = tokio::spawn(async move {
        while let Some(event) = updates.next().await {
            let phase = match event.status {
                PreloadingStatus::Pending => PreloadPhase::Pending,
                PreloadingStatus::Running => PreloadPhase::Running,
                PreloadingStatus::Success => PreloadPhase::Success,
                PreloadingStatus::Failure => PreloadPhase::Failure,
                _ => {
                    trace!(status = ?event.status, "ignoring preload status phase");
                    continue;
                }
            };
            manager.on_preload_update(PreloadUpdate {
                url: event.key.url.clone(),
                phase,
                final_status: event.prerender_status.as_ref().map(|s| format!("{s:?}")),
            });
        }
    });

    Ok(ListenerGuard::new(vec![task]))
}

/// Arm browser-level auto-attach and subscribe the manager to the shared
/// target attach/detach stream.
///
/// This is subscribed once per campaign; the manager itself decides which
/// attach notifications belong to the live trial. Each attached sub-target
/// gets its own network subscription, unbound again on detach.
pub async fn attach_target_watcher(
    browser: Arc<Browser>,
    manager: Arc<SubTargetLifecycleManager>,
) -> Result<ListenerGuard> {
    let params = SetAutoAttachParams::builder()
        .auto_attach(true)
        .wait_for_debugger_on_start(false)
        .flatten(true)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build auto-attach params: {}", e))?;
    browser
        .execute(params)
        .await
        .context("Failed to arm target auto-attach")?;

    let session_guards: Arc<Mutex<HashMap<String, ListenerGuard>>> =
        Arc::new(Mutex::new(HashMap::new()));

    let mut attached = browser
        .event_listener::<EventAttachedToTarget>()
        .await
        .context("Failed to subscribe to target attach events")?;
    let mut detached = browser
        .event_listener::<EventDetachedFromTarget>()
        .await
        .context("Failed to subscribe to target detach events")?;

    let mut tasks = Vec::with_capacity(2);

    let attach_manager = Arc::clone(&manager);
    let attach_browser = Arc::clone(&browser);
    let attach_guards = Arc::clone(&session_guards);
    tasks.push(tokio::spawn(async move {
        while let Some(event) = attached.next().await {
            let info = &event.target_info;
            let session_id = event.session_id.inner().clone();
            let notification = TargetAttached {
                session_id: session_id.clone(),
                target_id: info.target_id.inner().clone(),
                url: info.url.clone(),
                subtype: info.subtype.clone(),
            };
            let Some(router) = attach_manager.on_attached(notification) else {
                continue;
            };

            // Best-effort instrumentation: a sub-target we cannot fully
            // observe is still tracked, just with degraded detail.
            match attach_browser.get_page(info.target_id.clone()).await {
                Ok(page) => {
                    instrument_subtarget(&page).await;
                    match attach_network_router(&page, router).await {
                        Ok(guard) => {
                            if let Ok(mut map) = attach_guards.lock() {
                                map.insert(session_id, guard);
                            }
                        }
                        Err(e) => {
                            warn!(
                                session_id = %session_id,
                                error = %e,
                                "sub-target network observation unavailable"
                            );
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        session_id = %session_id,
                        error = %e,
                        "no page handle for sub-target; tracking with degraded detail"
                    );
                }
            }
        }
    }));

    let detach_manager = Arc::clone(&manager);
    let detach_guards = Arc::clone(&session_guards);
    tasks.push(tokio::spawn(async move {
        while let Some(event) = detached.next().await {
            let session_id = event.session_id.inner().clone();
            debug!(session_id = %session_id, "target detached");
            if let Ok(mut map) = detach_guards.lock() {
                map.remove(&session_id);
            }
            detach_manager.on_detached(&session_id);
        }
    }));

    let mut guard = ListenerGuard::new(tasks);
    guard.children = Some(session_guards);
    Ok(guard)
}

/// Best-effort instrumentation of a freshly attached sub-target session.
async fn instrument_subtarget(page: &Page) {
    if let Err(e) = page.execute(network::EnableParams::default()).await {
        warn!(error = %e, "sub-target: could not enable network observation");
    }
    if let Err(e) = execute_cache_disabled(page).await {
        warn!(error = %e, "sub-target: could not disable cache");
    }
    if let Err(e) = page.execute(preload::EnableParams::default()).await {
        warn!(error = %e, "sub-target: could not enable preload observation");
    }
    if let Err(e) = page.execute(RunIfWaitingForDebuggerParams::default()).await {
        warn!(error = %e, "sub-target: could not resume");
    }
}

async fn execute_cache_disabled(page: &Page) -> Result<()> {
    let params = SetCacheDisabledParams::builder()
        .cache_disabled(true)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build cache params: {}", e))?;
    page.execute(params).await?;
    Ok(())
}
