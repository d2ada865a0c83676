//! Process-wide counters for the telemetry agent
//!
//! Atomic counters for connection lifecycle, publishing and shadow events,
//! plus a bounded window of sampling durations.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Number of sampling durations kept for statistics
const SAMPLE_WINDOW: usize = 1000;

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics and a mutex-protected window
pub struct MetricsCollector {
    connected: AtomicBool,
    connections_established: AtomicU64,
    disconnections: AtomicU64,
    hello_published: AtomicU64,
    reports_published: AtomicU64,
    publish_failures: AtomicU64,
    shadow_errors: AtomicU64,
    deltas_received: AtomicU64,
    operation_timeouts: AtomicU64,
    sample_durations: Mutex<Vec<u64>>, // in milliseconds
    started_at: DateTime<Utc>,
}

/// Point-in-time view of all counters
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: i64,
    pub connected: bool,
    pub connections_established: u64,
    pub disconnections: u64,
    pub hello_published: u64,
    pub reports_published: u64,
    pub publish_failures: u64,
    pub shadow_errors: u64,
    pub deltas_received: u64,
    pub operation_timeouts: u64,
    pub avg_sample_time_ms: f64,
    pub max_sample_time_ms: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            connections_established: AtomicU64::new(0),
            disconnections: AtomicU64::new(0),
            hello_published: AtomicU64::new(0),
            reports_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            shadow_errors: AtomicU64::new(0),
            deltas_received: AtomicU64::new(0),
            operation_timeouts: AtomicU64::new(0),
            sample_durations: Mutex::new(Vec::new()),
            started_at: Utc::now(),
        }
    }

    // Connection lifecycle
    pub fn record_connection(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.connected.store(true, Ordering::Relaxed);
    }

    pub fn record_disconnection(&self) {
        self.disconnections.fetch_add(1, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
    }

    // Publishing
    pub fn hello_published(&self) {
        self.hello_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report_published(&self) {
        self.reports_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Shadow events
    pub fn shadow_error(&self) {
        self.shadow_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delta_received(&self) {
        self.deltas_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn operation_timed_out(&self) {
        self.operation_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sample_duration(&self, duration: Duration) {
        if let Ok(mut durations) = self.sample_durations.lock() {
            durations.push(duration.as_millis() as u64);
            if durations.len() > SAMPLE_WINDOW {
                durations.remove(0);
            }
        }
    }

    fn sample_statistics(&self) -> (f64, u64) {
        match self.sample_durations.lock() {
            Ok(durations) if !durations.is_empty() => {
                let total: u64 = durations.iter().sum();
                let max = durations.iter().copied().max().unwrap_or(0);
                (total as f64 / durations.len() as f64, max)
            }
            _ => (0.0, 0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = Utc::now();
        let (avg_sample_time_ms, max_sample_time_ms) = self.sample_statistics();

        MetricsSnapshot {
            timestamp: now,
            uptime_seconds: (now - self.started_at).num_seconds(),
            connected: self.connected.load(Ordering::Relaxed),
            connections_established: self.connections_established.load(Ordering::Relaxed),
            disconnections: self.disconnections.load(Ordering::Relaxed),
            hello_published: self.hello_published.load(Ordering::Relaxed),
            reports_published: self.reports_published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            shadow_errors: self.shadow_errors.load(Ordering::Relaxed),
            deltas_received: self.deltas_received.load(Ordering::Relaxed),
            operation_timeouts: self.operation_timeouts.load(Ordering::Relaxed),
            avg_sample_time_ms,
            max_sample_time_ms,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_increment() {
        let collector = MetricsCollector::new();
        collector.record_connection();
        collector.hello_published();
        collector.report_published();
        collector.report_published();
        collector.publish_failed();

        let snapshot = collector.snapshot();
        assert!(snapshot.connected);
        assert_eq!(snapshot.connections_established, 1);
        assert_eq!(snapshot.hello_published, 1);
        assert_eq!(snapshot.reports_published, 2);
        assert_eq!(snapshot.publish_failures, 1);
    }

    #[test]
    fn test_disconnection_clears_connected() {
        let collector = MetricsCollector::new();
        collector.record_connection();
        collector.record_disconnection();

        let snapshot = collector.snapshot();
        assert!(!snapshot.connected);
        assert_eq!(snapshot.disconnections, 1);
    }

    #[test]
    fn test_sample_statistics() {
        let collector = MetricsCollector::new();
        assert_eq!(collector.snapshot().avg_sample_time_ms, 0.0);

        collector.record_sample_duration(Duration::from_millis(100));
        collector.record_sample_duration(Duration::from_millis(300));

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.avg_sample_time_ms, 200.0);
        assert_eq!(snapshot.max_sample_time_ms, 300);
    }

    #[test]
    fn test_sample_window_is_bounded() {
        let collector = MetricsCollector::new();
        for _ in 0..(SAMPLE_WINDOW + 10) {
            collector.record_sample_duration(Duration::from_millis(1));
        }
        assert_eq!(collector.sample_durations.lock().unwrap().len(), SAMPLE_WINDOW);
    }

    #[test]
    fn test_snapshot_serializes() {
        let snapshot = MetricsCollector::new().snapshot();
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["reports_published"], 0);
        assert!(json["timestamp"].is_string());
    }
}
