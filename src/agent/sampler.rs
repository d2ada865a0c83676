//! Host metrics sampling
//!
//! CPU utilization is not observable instantaneously: it is the share of
//! non-idle time between two readings, so a sample suspends for a
//! measurement window between refreshes.

use crate::protocol::MetricsReport;
use async_trait::async_trait;
use std::time::Duration;
use sysinfo::System;

/// Default CPU measurement window
pub const DEFAULT_CPU_WINDOW: Duration = Duration::from_millis(200);

/// Source of metrics samples
#[async_trait]
pub trait MetricsSampler: Send {
    /// Take one sample; may suspend while CPU usage is measured
    async fn sample(&mut self) -> MetricsReport;
}

/// Samples the local host through `sysinfo`
pub struct SystemSampler {
    system: System,
    window: Duration,
}

impl SystemSampler {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_CPU_WINDOW)
    }

    /// Window shorter than the platform minimum is raised to it
    pub fn with_window(window: Duration) -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();

        Self {
            system,
            window: window.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL),
        }
    }

    /// Free memory as a fraction of total memory
    pub fn free_memory_fraction(&mut self) -> f64 {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return 0.0;
        }
        self.system.available_memory() as f64 / total as f64
    }

    /// Global CPU utilization over the measurement window, as a fraction
    pub async fn cpu_usage_fraction(&mut self) -> f64 {
        self.system.refresh_cpu_usage();
        tokio::time::sleep(self.window).await;
        self.system.refresh_cpu_usage();
        f64::from(self.system.global_cpu_info().cpu_usage()) / 100.0
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricsSampler for SystemSampler {
    async fn sample(&mut self) -> MetricsReport {
        let mem = self.free_memory_fraction();
        let cpu = self.cpu_usage_fraction().await;
        MetricsReport::from_fractions(cpu, mem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_never_below_platform_minimum() {
        let sampler = SystemSampler::with_window(Duration::from_millis(1));
        assert!(sampler.window() >= sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    }

    #[test]
    fn test_free_memory_fraction_in_range() {
        let mut sampler = SystemSampler::new();
        let fraction = sampler.free_memory_fraction();
        assert!((0.0..=1.0).contains(&fraction), "fraction: {fraction}");
    }

    #[tokio::test]
    async fn test_system_sample_in_range() {
        let mut sampler = SystemSampler::new();
        let report = sampler.sample().await;

        assert!((0.0..=100.0).contains(&report.cpu), "cpu: {}", report.cpu);
        assert!((0.0..=100.0).contains(&report.mem), "mem: {}", report.mem);
    }
}
