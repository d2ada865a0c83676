//! Mock implementations for testing
//!
//! Provides a recording shadow client and a fixed-value sampler so the agent
//! can be driven without a broker or real host metrics.

use crate::agent::sampler::MetricsSampler;
use crate::protocol::MetricsReport;
use crate::shadow::ShadowClient;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

pub type PublishedMessage = (String, String);

#[derive(Debug, Error)]
#[error("Mock publish failure on {topic}")]
pub struct MockPublishError {
    pub topic: String,
}

/// Shadow client that records every publish
#[derive(Debug)]
pub struct MockShadowClient {
    published: Arc<Mutex<Vec<PublishedMessage>>>,
    should_fail: AtomicBool,
    connected: AtomicBool,
}

impl MockShadowClient {
    pub fn new() -> Self {
        Self {
            published: Arc::new(Mutex::new(Vec::new())),
            should_fail: AtomicBool::new(false),
            connected: AtomicBool::new(true),
        }
    }

    pub fn with_failure() -> Self {
        let client = Self::new();
        client.set_should_fail(true);
        client
    }

    pub fn set_should_fail(&self, should_fail: bool) {
        self.should_fail.store(should_fail, Ordering::SeqCst);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published
            .lock()
            .map(|published| published.clone())
            .unwrap_or_default()
    }

    /// Payloads published to one topic, in order
    pub fn published_to(&self, topic: &str) -> Vec<String> {
        self.published()
            .into_iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload)
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut published) = self.published.lock() {
            published.clear();
        }
    }
}

impl Default for MockShadowClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ShadowClient for MockShadowClient {
    type Error = MockPublishError;

    async fn publish(&self, topic: &str, payload: String) -> Result<(), Self::Error> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(MockPublishError {
                topic: topic.to_string(),
            });
        }

        if let Ok(mut published) = self.published.lock() {
            published.push((topic.to_string(), payload));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Sampler returning the same fractions every time
#[derive(Debug, Clone)]
pub struct FixedSampler {
    cpu_fraction: f64,
    mem_fraction: f64,
    delay: Option<Duration>,
    samples: Arc<AtomicUsize>,
}

impl FixedSampler {
    pub fn new(cpu_fraction: f64, mem_fraction: f64) -> Self {
        Self {
            cpu_fraction,
            mem_fraction,
            delay: None,
            samples: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Each sample suspends for `delay`, like a CPU measurement window
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Shared counter of samples taken, readable after the sampler is moved
    pub fn sample_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.samples)
    }
}

#[async_trait]
impl MetricsSampler for FixedSampler {
    async fn sample(&mut self) -> MetricsReport {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.samples.fetch_add(1, Ordering::SeqCst);
        MetricsReport::from_fractions(self.cpu_fraction, self.mem_fraction)
    }
}
