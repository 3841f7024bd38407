//! Network and CPU impairment via Chrome DevTools Protocol
//!
//! Applies an impairment [`Condition`] to a page session before a trial
//! runs: network shaping via `Network.emulateNetworkConditions` and CPU
//! slowdown via `Emulation.setCPUThrottlingRate`.

#![allow(deprecated)] // EmulateNetworkConditionsParams is deprecated but still functional

use anyhow::Result;
use chromiumoxide::cdp::browser_protocol::emulation::SetCpuThrottlingRateParams;
use chromiumoxide::cdp::browser_protocol::network::{
    ConnectionType, EmulateNetworkConditionsParams,
};
use chromiumoxide::Page;
use tracing::{debug, instrument};

use crate::config::Condition;

// Re-export NetworkProfile from config
pub use crate::config::NetworkProfile;

impl NetworkProfile {
    /// Download throughput in bytes per second (-1 means no throttling)
    pub fn download_throughput(&self) -> f64 {
        match self.download_bps() {
            Some(bps) => bps as f64,
            None => -1.0, // -1 means no throttling in Chrome DevTools Protocol
        }
    }

    /// Upload throughput in bytes per second (-1 means no throttling)
    pub fn upload_throughput(&self) -> f64 {
        match self.upload_bps() {
            Some(bps) => bps as f64,
            None => -1.0,
        }
    }

    /// Network latency in milliseconds
    pub fn latency(&self) -> f64 {
        match self.rtt_ms() {
            Some(rtt) => rtt as f64,
            None => 0.0,
        }
    }

    /// Whether the network is completely offline
    pub fn offline(&self) -> bool {
        matches!(self, NetworkProfile::Offline)
    }
}

/// Network throttling controller
pub struct NetworkThrottler;

impl NetworkThrottler {
    /// Apply network throttling to a page session.
    #[instrument(skip(page), fields(profile = ?profile))]
    pub async fn apply(page: &Page, profile: NetworkProfile) -> Result<()> {
        debug!(
            "Applying network throttling: offline={}, latency={}ms, down={:.2} KB/s, up={:.2} KB/s",
            profile.offline(),
            profile.latency(),
            profile.download_throughput() / 1024.0,
            profile.upload_throughput() / 1024.0
        );

        let params = EmulateNetworkConditionsParams::builder()
            .offline(profile.offline())
            .latency(profile.latency())
            .download_throughput(profile.download_throughput())
            .upload_throughput(profile.upload_throughput())
            .connection_type(ConnectionType::Cellular4g) // Generic type for throttled connections
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build network params: {}", e))?;

        page.execute(params).await?;
        Ok(())
    }

    /// Remove network throttling by restoring no-throttling defaults.
    #[instrument(skip(page))]
    pub async fn clear(page: &Page) -> Result<()> {
        let params = EmulateNetworkConditionsParams::builder()
            .offline(false)
            .latency(0.0)
            .download_throughput(-1.0)
            .upload_throughput(-1.0)
            .connection_type(ConnectionType::None)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build network params: {}", e))?;

        page.execute(params).await?;
        Ok(())
    }
}

/// CPU throttling controller
pub struct CpuThrottler;

impl CpuThrottler {
    /// Apply CPU throttling as a slowdown multiplier (1.0 = no throttling,
    /// 4.0 = typical mid-tier mobile device).
    #[instrument(skip(page), fields(rate = %rate))]
    pub async fn apply(page: &Page, rate: f64) -> Result<()> {
        if rate < 1.0 {
            anyhow::bail!("CPU throttling rate must be >= 1.0 (got {})", rate);
        }

        debug!("Applying CPU throttling with {}x slowdown", rate);
        let params = SetCpuThrottlingRateParams::builder()
            .rate(rate)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build CPU params: {}", e))?;

        page.execute(params).await?;
        Ok(())
    }

    /// Remove CPU throttling by setting the rate back to 1.0.
    #[instrument(skip(page))]
    pub async fn clear(page: &Page) -> Result<()> {
        let params = SetCpuThrottlingRateParams::builder()
            .rate(1.0)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build CPU params: {}", e))?;

        page.execute(params).await?;
        Ok(())
    }
}

/// Apply one impairment condition (network + CPU) to a page session.
///
/// A rate of exactly 1.0 is still sent so a previous condition's slowdown
/// never leaks into the next trial.
#[instrument(skip(page), fields(condition = %condition.label))]
pub async fn apply_condition(page: &Page, condition: &Condition) -> Result<()> {
    if condition.network_profile != NetworkProfile::None {
        NetworkThrottler::apply(page, condition.network_profile).await?;
    }
    CpuThrottler::apply(page, condition.cpu_slowdown).await?;
    Ok(())
}
