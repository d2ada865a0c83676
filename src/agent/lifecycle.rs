//! Telemetry agent lifecycle
//!
//! The agent reacts to shadow client events. A connect announces the device
//! with a hello message and starts a reporting task that publishes one
//! metrics report per period; a close stops that task. Errors, deltas and
//! timeouts are logged and never change the lifecycle state.

use crate::agent::sampler::MetricsSampler;
use crate::config::AgentConfig;
use crate::error::sanitize_error_message;
use crate::observability::metrics;
use crate::protocol::{HelloMessage, Topics};
use crate::shadow::{ShadowClient, ShadowEvent};
use crate::{lifecycle_span, mqtt_span};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn, Instrument};

/// Time between metrics reports
pub const REPORT_PERIOD: Duration = Duration::from_millis(1000);

/// Whether the agent currently has a live session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Disconnected,
    Connected,
}

/// Drives hello and metrics publishing from shadow client events
pub struct TelemetryAgent<C, S>
where
    C: ShadowClient + 'static,
    S: MetricsSampler + 'static,
{
    thing_name: String,
    endpoint: String,
    topics: Topics,
    client: Arc<C>,
    sampler: Arc<Mutex<S>>,
    state: AgentState,
    reporter: Option<JoinHandle<()>>,
}

impl<C, S> TelemetryAgent<C, S>
where
    C: ShadowClient + 'static,
    S: MetricsSampler + 'static,
{
    pub fn new(config: &AgentConfig, client: Arc<C>, sampler: S) -> Self {
        Self {
            thing_name: config.thing_name.clone(),
            endpoint: config.endpoint(),
            topics: config.topics(),
            client,
            sampler: Arc::new(Mutex::new(sampler)),
            state: AgentState::Disconnected,
            reporter: None,
        }
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    /// True while the reporting task is scheduled
    pub fn is_reporting(&self) -> bool {
        self.reporter.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Process shadow events until the channel closes or `shutdown` resolves
    pub async fn run<F>(&mut self, events: &mut mpsc::Receiver<ShadowEvent>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping telemetry agent");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        warn!("Shadow event channel closed");
                        break;
                    }
                },
            }
        }

        self.stop();
    }

    pub async fn handle_event(&mut self, event: ShadowEvent) {
        match event {
            ShadowEvent::Connect => self.on_connect().await,
            ShadowEvent::Close => self.on_close(),
            ShadowEvent::Error(message) => {
                metrics().shadow_error();
                error!(
                    thing_name = %self.thing_name,
                    error = %sanitize_error_message(&message),
                    "Shadow client error"
                );
            }
            ShadowEvent::Delta { thing_name, state } => {
                metrics().delta_received();
                info!("received delta on {}: {}", thing_name, state);
            }
            ShadowEvent::Timeout {
                thing_name,
                client_token,
            } => {
                metrics().operation_timed_out();
                warn!(
                    thing_name = %thing_name,
                    client_token = %client_token,
                    "Shadow operation timed out"
                );
            }
            ShadowEvent::Status {
                thing_name,
                status,
                client_token,
                ..
            } => {
                debug!(
                    thing_name = %thing_name,
                    client_token = %client_token,
                    "Shadow operation {}", status
                );
            }
        }
    }

    async fn on_connect(&mut self) {
        info!("{} connected to {}", self.thing_name, self.endpoint);

        // A reconnect replaces the running reporter
        self.stop_reporter();
        self.state = AgentState::Connected;

        let span = lifecycle_span!(event = "connect", thing_name = %self.thing_name);
        self.publish_hello().instrument(span).await;
        self.reporter = Some(spawn_reporter(
            Arc::clone(&self.client),
            Arc::clone(&self.sampler),
            self.topics.report().to_string(),
            self.thing_name.clone(),
        ));
    }

    async fn publish_hello(&self) {
        let topic = self.topics.hello();
        let payload = match serde_json::to_string(&HelloMessage::new(&self.thing_name)) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize hello message: {}", e);
                return;
            }
        };

        match self.client.publish(topic, payload).await {
            Ok(()) => {
                metrics().hello_published();
                info!("{} published its name to '{}'", self.thing_name, topic);
            }
            Err(e) => {
                metrics().publish_failed();
                warn!(topic = %topic, error = %e, "Failed to publish hello message");
            }
        }
    }

    fn on_close(&mut self) {
        info!("Stopping metric loop");
        self.stop();
    }

    /// Stop reporting; safe to call repeatedly
    pub fn stop(&mut self) {
        self.stop_reporter();
        self.state = AgentState::Disconnected;
    }

    fn stop_reporter(&mut self) {
        if let Some(handle) = self.reporter.take() {
            handle.abort();
        }
    }
}

impl<C, S> Drop for TelemetryAgent<C, S>
where
    C: ShadowClient + 'static,
    S: MetricsSampler + 'static,
{
    fn drop(&mut self) {
        self.stop_reporter();
    }
}

/// Spawn the reporting task; the first report is due one period from now
fn spawn_reporter<C, S>(
    client: Arc<C>,
    sampler: Arc<Mutex<S>>,
    topic: String,
    thing_name: String,
) -> JoinHandle<()>
where
    C: ShadowClient + 'static,
    S: MetricsSampler + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + REPORT_PERIOD, REPORT_PERIOD);
        // A sample that overruns the period drops the missed ticks
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            publish_report(client.as_ref(), &sampler, &topic, &thing_name).await;
        }
    })
}

/// Sample once and publish the report; skipped while the session is down
pub async fn publish_report<C, S>(client: &C, sampler: &Mutex<S>, topic: &str, thing_name: &str)
where
    C: ShadowClient,
    S: MetricsSampler,
{
    if !client.is_connected() {
        debug!(topic = %topic, "Session down, skipping metrics report");
        return;
    }

    let started = Instant::now();
    let report = sampler.lock().await.sample().await;
    metrics().record_sample_duration(started.elapsed());

    let payload = match report.to_json() {
        Ok(payload) => payload,
        Err(e) => {
            error!("Failed to serialize metrics report: {}", e);
            return;
        }
    };

    let span = mqtt_span!(operation = "publish_report", topic = %topic);
    match client.publish(topic, payload.clone()).instrument(span).await {
        Ok(()) => {
            metrics().report_published();
            info!("{} published {} to '{}'", thing_name, payload, topic);
        }
        Err(e) => {
            metrics().publish_failed();
            warn!(topic = %topic, error = %e, "Failed to publish metrics report");
        }
    }
}
