//! Paint-timing extraction from the destination document
//!
//! After a trial's navigation completes, the destination page is asked for
//! its largest-contentful-paint and first-contentful-paint entries plus the
//! total transfer size. All times are normalized against
//! `navigation.activationStart`, so a navigation served from a speculative
//! load reads near-zero paint times.

use anyhow::{Context, Result};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::Page;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Paint-timing metrics for one primary navigation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaintTiming {
    /// Largest contentful paint in milliseconds, activation-relative
    pub lcp_ms: f64,
    /// First contentful paint in milliseconds, activation-relative
    pub fcp_ms: f64,
    /// Navigation + resource transfer size in bytes
    pub transfer_bytes: u64,
    /// Whether the document reports a non-zero activation start, i.e. it
    /// was speculatively loaded before the navigation
    pub activated: bool,
}

/// Collects paint-timing metrics from a destination document.
#[derive(Debug, Clone, Default)]
pub struct PaintTimingCollector {
    _private: (),
}

impl PaintTimingCollector {
    /// Create a new collector
    pub fn new() -> Self {
        Self { _private: () }
    }

    /// Evaluate the timing script in the page and parse the result.
    ///
    /// The in-page script waits up to five seconds for a buffered LCP entry
    /// before falling back to zero, so this call is bounded even when the
    /// page never paints.
    ///
    /// # Errors
    ///
    /// Returns an error if the evaluation fails or the payload cannot be
    /// parsed.
    #[instrument(skip(self, page))]
    pub async fn collect(&self, page: &Page) -> Result<PaintTiming> {
        let params = EvaluateParams::builder()
            .expression(Self::timing_script())
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build evaluate params: {}", e))?;

        let timing: PaintTiming = page
            .evaluate(params)
            .await
            .context("Failed to evaluate paint-timing script")?
            .into_value()
            .context("Failed to parse paint-timing payload")?;

        debug!(
            lcp_ms = timing.lcp_ms,
            fcp_ms = timing.fcp_ms,
            transfer_bytes = timing.transfer_bytes,
            activated = timing.activated,
            "paint timing collected"
        );
        Ok(timing)
    }

    /// The in-page timing script.
    ///
    /// Mirrors what the PerformanceObserver API exposes: the last buffered
    /// largest-contentful-paint entry, the first-contentful-paint entry, and
    /// the transfer sizes of the navigation plus all resource entries.
    fn timing_script() -> String {
        r#"
(async () => {
    const getLcp = () =>
        new Promise((resolve) => {
            try {
                new PerformanceObserver((list) => resolve(list.getEntries().pop())).observe({
                    type: 'largest-contentful-paint',
                    buffered: true
                });
            } catch (e) {
                resolve(null);
            }
            setTimeout(() => resolve(null), 5000);
        });

    const [nav] = performance.getEntriesByType('navigation');
    const [fcp] = performance.getEntriesByName('first-contentful-paint');
    const lcpEntry = await getLcp();
    const resources = performance.getEntriesByType('resource');
    const resourceBytes = resources.reduce((sum, r) => sum + r.transferSize, 0);

    const activationStart = (nav && nav.activationStart) || 0;
    const lcp = lcpEntry ? lcpEntry.startTime : 0;
    const fcpTime = fcp ? fcp.startTime : 0;

    return {
        lcpMs: Math.max(0, lcp - activationStart),
        fcpMs: Math.max(0, fcpTime - activationStart),
        transferBytes: Math.round(((nav && nav.transferSize) || 0) + resourceBytes),
        activated: activationStart > 0
    };
})()
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timing_script_normalizes_against_activation_start() {
        let script = PaintTimingCollector::timing_script();
        assert!(script.contains("activationStart"));
        assert!(script.contains("largest-contentful-paint"));
        assert!(script.contains("first-contentful-paint"));
    }

    #[test]
    fn test_payload_deserialization_from_js_shape() {
        let json = r#"{"lcpMs":123.4,"fcpMs":56.7,"transferBytes":204800,"activated":true}"#;
        let timing: PaintTiming = serde_json::from_str(json).unwrap();
        assert_eq!(timing.lcp_ms, 123.4);
        assert_eq!(timing.fcp_ms, 56.7);
        assert_eq!(timing.transfer_bytes, 204_800);
        assert!(timing.activated);
    }

    #[test]
    fn test_payload_roundtrip() {
        let timing = PaintTiming {
            lcp_ms: 0.0,
            fcp_ms: 0.0,
            transfer_bytes: 0,
            activated: false,
        };
        let json = serde_json::to_string(&timing).unwrap();
        let back: PaintTiming = serde_json::from_str(&json).unwrap();
        assert_eq!(back, timing);
    }
}
