//! Event loop supervisor and public handle of the MQTT shadow client
//!
//! The supervisor task owns the `rumqttc` event loop. It translates packets
//! into [`ShadowEvent`]s, replays shadow subscriptions after each ConnAck,
//! expires pending operations and backs off between reconnect attempts.

use super::connection::{
    configure_mqtt_options, ConnectionState, ShadowError, ShadowOptions, TlsCredentials,
};
use super::message_handler::{EventRoute, MessageHandler, ShadowMessage};
use super::pending::{generate_client_token, PendingOperations};
use super::{ShadowClient, ShadowEvent};
use crate::config::AgentConfig;
use crate::observability::metrics::metrics;
use crate::protocol::{ShadowGetRequest, ShadowOperation, ShadowTopic, ShadowUpdateRequest};
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, ConnectionError, Event, EventLoop};
use rumqttc::Outgoing;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// How often pending operations are checked for expiry
const PENDING_SWEEP_INTERVAL: Duration = Duration::from_millis(500);

/// How long shutdown waits for the DISCONNECT packet to go out
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

/// How long `disconnect` waits for the event loop before aborting it
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Handle to a device-shadow session over MQTT
pub struct MqttShadowClient {
    client_id: String,
    client: AsyncClient,
    options: ShadowOptions,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    pending: Arc<Mutex<PendingOperations>>,
    event_loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MqttShadowClient {
    /// Load credentials, build the session and start the event loop supervisor
    ///
    /// Returns the handle and the receiver of lifecycle events. The
    /// connection is established asynchronously; a `Connect` event reports
    /// success.
    pub fn connect(
        config: &AgentConfig,
        options: ShadowOptions,
    ) -> Result<(Self, mpsc::Receiver<ShadowEvent>), ShadowError> {
        let credentials = TlsCredentials::load(config)?;
        let mqtt_options = configure_mqtt_options(config, credentials, &options);
        let (client, event_loop) = AsyncClient::new(mqtt_options, options.channel_capacity);

        info!(
            client_id = %config.client_id,
            host = %config.host,
            port = config.port,
            region = %config.region,
            debug = options.debug,
            "Starting shadow client"
        );
        let (mut shadow_client, supervisor, events_rx, shutdown_rx) =
            Self::assemble(&config.client_id, client, options);
        let handle = tokio::spawn(supervisor.run(event_loop, shutdown_rx));
        *shadow_client.event_loop_handle.get_mut() = Some(handle);

        Ok((shadow_client, events_rx))
    }

    /// Wire a handle and its supervisor around one `AsyncClient`
    fn assemble(
        client_id: &str,
        client: AsyncClient,
        options: ShadowOptions,
    ) -> (
        Self,
        EventLoopSupervisor,
        mpsc::Receiver<ShadowEvent>,
        watch::Receiver<bool>,
    ) {
        let (events_tx, events_rx) = mpsc::channel(options.channel_capacity);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let subscriptions = Arc::new(Mutex::new(Vec::new()));
        let pending = Arc::new(Mutex::new(PendingOperations::new()));

        let supervisor = EventLoopSupervisor {
            client: client.clone(),
            events_tx,
            state_tx,
            subscriptions: subscriptions.clone(),
            pending: pending.clone(),
            options: options.clone(),
        };

        let shadow_client = Self {
            client_id: client_id.to_string(),
            client,
            options,
            state_rx,
            shutdown_tx,
            subscriptions,
            pending,
            event_loop_handle: Mutex::new(None),
        };

        (shadow_client, supervisor, events_rx, shutdown_rx)
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    fn check_connection_state(&self) -> Result<(), ShadowError> {
        let state = self.connection_state();
        if state != ConnectionState::Connected {
            return Err(ShadowError::NotConnected { state });
        }
        Ok(())
    }

    /// Subscribe to the shadow topics of a thing
    ///
    /// Subscriptions are remembered and replayed after every reconnect. When
    /// called before the session is up they are issued on the next ConnAck.
    pub async fn register(&self, thing_name: &str) -> Result<(), ShadowError> {
        let topics = ShadowTopic::subscriptions(thing_name);
        let mut subscriptions = self.subscriptions.lock().await;

        let connected = self.connection_state() == ConnectionState::Connected;
        for topic in topics {
            if subscriptions.contains(&topic) {
                continue;
            }
            if connected {
                self.client
                    .try_subscribe(topic.clone(), QoS::AtLeastOnce)
                    .map_err(ShadowError::SubscriptionFailed)?;
            }
            subscriptions.push(topic);
        }

        info!(thing_name = %thing_name, "Registered thing shadow");
        Ok(())
    }

    /// Request a shadow update, returning the client token of the request
    pub async fn update(&self, thing_name: &str, state: Value) -> Result<String, ShadowError> {
        let client_token = generate_client_token(&self.client_id);
        let request = ShadowUpdateRequest {
            state,
            client_token: client_token.clone(),
        };
        let payload = serde_json::to_string(&request).map_err(ShadowError::SerializationError)?;

        self.send_operation(thing_name, ShadowOperation::Update, client_token, payload)
            .await
    }

    /// Request the current shadow document, returning the client token of the request
    pub async fn get(&self, thing_name: &str) -> Result<String, ShadowError> {
        let client_token = generate_client_token(&self.client_id);
        let request = ShadowGetRequest {
            client_token: client_token.clone(),
        };
        let payload = serde_json::to_string(&request).map_err(ShadowError::SerializationError)?;

        self.send_operation(thing_name, ShadowOperation::Get, client_token, payload)
            .await
    }

    async fn send_operation(
        &self,
        thing_name: &str,
        operation: ShadowOperation,
        client_token: String,
        payload: String,
    ) -> Result<String, ShadowError> {
        self.check_connection_state()?;

        let mut pending = self.pending.lock().await;
        let topic = ShadowTopic::request(thing_name, operation);
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(ShadowError::PublishFailed)?;

        pending.insert(
            client_token.clone(),
            thing_name,
            operation,
            Instant::now(),
            self.options.operation_timeout,
        );

        debug!(thing_name = %thing_name, %operation, client_token = %client_token, "Shadow operation sent");
        Ok(client_token)
    }

    /// Close the session and stop the event loop supervisor
    pub async fn disconnect(&self) -> Result<(), ShadowError> {
        let was_connected = self.connection_state() == ConnectionState::Connected;
        if was_connected {
            self.client
                .try_disconnect()
                .map_err(ShadowError::DisconnectFailed)?;
        }

        let _ = self.shutdown_tx.send(true);

        let handle = self.event_loop_handle.lock().await.take();
        if let Some(mut handle) = handle {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => info!("Shadow event loop shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!("Shadow event loop ended with error: {}", e)
                }
                Err(_) => {
                    warn!("Shadow event loop didn't shut down gracefully, forcing abort");
                    handle.abort();
                }
                _ => {}
            }
        }

        info!("Shadow client disconnected");
        Ok(())
    }
}

#[async_trait]
impl ShadowClient for MqttShadowClient {
    type Error = ShadowError;

    async fn publish(&self, topic: &str, payload: String) -> Result<(), Self::Error> {
        self.check_connection_state()?;

        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(ShadowError::PublishFailed)
    }

    fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }
}

impl Drop for MqttShadowClient {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.event_loop_handle.get_mut().take() {
            handle.abort();
        }
    }
}

/// State owned by the event loop task
struct EventLoopSupervisor {
    client: AsyncClient,
    events_tx: mpsc::Sender<ShadowEvent>,
    state_tx: watch::Sender<ConnectionState>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    pending: Arc<Mutex<PendingOperations>>,
    options: ShadowOptions,
}

impl EventLoopSupervisor {
    async fn run(self, mut event_loop: EventLoop, mut shutdown_rx: watch::Receiver<bool>) {
        info!("Shadow event loop started");
        let mut sweep = tokio::time::interval(PENDING_SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut reconnect_attempts = 0u32;

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping shadow event loop");
                        break;
                    }
                }

                _ = sweep.tick() => {
                    self.expire_pending().await;
                }

                result = event_loop.poll() => {
                    match result {
                        Ok(event) => {
                            if self.options.debug {
                                debug!(target: "shadow_client", "MQTT event: {:?}", event);
                            }
                            if self.handle_event(&event).await {
                                reconnect_attempts = 0;
                            }
                        }
                        Err(e) => {
                            self.handle_connection_error(&e).await;
                            reconnect_attempts = reconnect_attempts.saturating_add(1);
                            let delay_ms = self
                                .options
                                .reconnect
                                .calculate_backoff_delay(reconnect_attempts);
                            info!("Reconnection attempt {} after {}ms delay", reconnect_attempts, delay_ms);
                            if !interruptible_sleep(shutdown_rx.clone(), delay_ms).await {
                                break;
                            }
                        }
                    }
                }
            }
        }

        if *self.state_tx.borrow() == ConnectionState::Connected {
            flush_disconnect(&mut event_loop).await;
            metrics().record_disconnection();
            self.emit(ShadowEvent::Close).await;
        }
        let _ = self.state_tx.send(ConnectionState::Closed);
        info!("Shadow event loop stopped");
    }

    /// Returns true when the event acknowledged a connection
    async fn handle_event(&self, event: &Event) -> bool {
        match MessageHandler::route_mqtt_event(event) {
            EventRoute::ConnectionAcknowledged => {
                let _ = self.state_tx.send(ConnectionState::Connected);
                self.resubscribe().await;
                metrics().record_connection();
                self.emit(ShadowEvent::Connect).await;
                true
            }
            EventRoute::MessageReceived { topic, payload } => {
                self.handle_message(&topic, &payload).await;
                false
            }
            EventRoute::Disconnected => {
                if self.mark_disconnected("Broker disconnected".to_string()) {
                    self.emit(ShadowEvent::Close).await;
                }
                false
            }
            EventRoute::InfrastructureEvent(event_str) => {
                debug!(target: "shadow_client", "MQTT event: {}", event_str);
                false
            }
            EventRoute::OutgoingEvent => false,
        }
    }

    async fn handle_connection_error(&self, error: &ConnectionError) {
        let reason = error.to_string();
        error!("Shadow connection error: {}", reason);

        self.emit(ShadowEvent::Error(reason.clone())).await;
        if self.mark_disconnected(reason) {
            self.emit(ShadowEvent::Close).await;
        }
    }

    /// Record a disconnect, returning true when the session was up
    fn mark_disconnected(&self, reason: String) -> bool {
        let previous = self
            .state_tx
            .send_replace(ConnectionState::Disconnected(reason));
        let was_connected = previous == ConnectionState::Connected;
        if was_connected {
            metrics().record_disconnection();
        }
        was_connected
    }

    async fn handle_message(&self, topic: &str, payload: &[u8]) {
        match MessageHandler::interpret_shadow_message(topic, payload) {
            Some(ShadowMessage::Delta { thing_name, state }) => {
                self.emit(ShadowEvent::Delta { thing_name, state }).await;
            }
            Some(ShadowMessage::Response {
                thing_name,
                status,
                client_token: Some(client_token),
                document,
                ..
            }) => {
                let resolved = self.pending.lock().await.resolve(&client_token);
                if resolved.is_some() {
                    self.emit(ShadowEvent::Status {
                        thing_name,
                        status,
                        client_token,
                        document,
                    })
                    .await;
                } else {
                    debug!("Ignoring response for unknown client token {}", client_token);
                }
            }
            Some(ShadowMessage::Response { .. }) => {
                debug!("Ignoring shadow response without client token on {}", topic);
            }
            None => {
                debug!("Ignoring message on topic {}", topic);
            }
        }
    }

    /// Replay remembered subscriptions, returning how many were issued
    async fn resubscribe(&self) -> usize {
        let subscriptions = self.subscriptions.lock().await;
        let mut issued = 0;
        for topic in subscriptions.iter() {
            if let Err(e) = self.client.try_subscribe(topic.clone(), QoS::AtLeastOnce) {
                error!("Failed to re-subscribe to {}: {}", topic, e);
            } else {
                debug!(target: "shadow_client", "Re-subscribed to: {}", topic);
                issued += 1;
            }
        }
        issued
    }

    async fn expire_pending(&self) {
        let expired = self.pending.lock().await.expire(Instant::now());
        for (thing_name, client_token) in expired {
            self.emit(ShadowEvent::Timeout {
                thing_name,
                client_token,
            })
            .await;
        }
    }

    async fn emit(&self, event: ShadowEvent) {
        if self.events_tx.send(event).await.is_err() {
            debug!("Shadow event receiver dropped");
        }
    }
}

/// Sleep unless shutdown is requested; returns false on shutdown
async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
    tokio::select! {
        changed = shutdown_rx.changed() => {
            if changed.is_err() || *shutdown_rx.borrow() {
                info!("Shutdown signal received during reconnection delay, stopping");
                return false;
            }
            true
        }
        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
    }
}

/// Poll until the queued DISCONNECT has been written or the connection drops
async fn flush_disconnect(event_loop: &mut EventLoop) {
    let flushed = tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, async {
        loop {
            match event_loop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => continue,
            }
        }
    })
    .await;

    if flushed.is_err() {
        warn!("Timed out flushing DISCONNECT");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OperationStatus;
    use bytes::Bytes;
    use rumqttc::v5::mqttbytes::v5::{
        ConnAck, ConnectReturnCode, Disconnect, DisconnectReasonCode, Packet, Publish,
    };
    use rumqttc::v5::MqttOptions;
    use serde_json::json;
    use tokio::sync::oneshot;

    struct Fixture {
        client: MqttShadowClient,
        supervisor: EventLoopSupervisor,
        events: mpsc::Receiver<ShadowEvent>,
        _event_loop: EventLoop,
        _shutdown_rx: watch::Receiver<bool>,
    }

    fn fixture() -> Fixture {
        let options = ShadowOptions::default();
        let mqtt_options = MqttOptions::new("rpi-01-client", "localhost", 8883);
        let (async_client, event_loop) = AsyncClient::new(mqtt_options, options.channel_capacity);
        let (client, supervisor, events, shutdown_rx) =
            MqttShadowClient::assemble("rpi-01-client", async_client, options);

        Fixture {
            client,
            supervisor,
            events,
            _event_loop: event_loop,
            _shutdown_rx: shutdown_rx,
        }
    }

    fn connack() -> Event {
        Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }))
    }

    fn broker_disconnect() -> Event {
        Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: DisconnectReasonCode::NormalDisconnection,
            properties: None,
        }))
    }

    fn incoming_publish(topic: &str, payload: serde_json::Value) -> Event {
        Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: Bytes::from(topic.to_string()),
            pkid: 1,
            payload: Bytes::from(payload.to_string()),
            properties: None,
        }))
    }

    fn refused() -> ConnectionError {
        ConnectionError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ))
    }

    fn drain(events: &mut mpsc::Receiver<ShadowEvent>) -> Vec<ShadowEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = events.try_recv() {
            drained.push(event);
        }
        drained
    }

    #[tokio::test]
    async fn test_interruptible_sleep_completes() {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        assert!(interruptible_sleep(shutdown_rx, 10).await);
    }

    #[tokio::test]
    async fn test_interruptible_sleep_interrupted() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = shutdown_tx.send(true);
        });

        assert!(!interruptible_sleep(shutdown_rx, 1000).await);
    }

    #[tokio::test]
    async fn test_connect_fails_without_credentials() {
        let mut config = AgentConfig::test_config();
        config.ca_cert = "/nonexistent/ca.pem".into();

        let result = MqttShadowClient::connect(&config, ShadowOptions::default());
        assert!(matches!(result, Err(ShadowError::CredentialRead { .. })));
    }

    #[tokio::test]
    async fn test_connack_emits_connect() {
        let mut fx = fixture();

        assert!(fx.supervisor.handle_event(&connack()).await);

        assert_eq!(drain(&mut fx.events), vec![ShadowEvent::Connect]);
        assert_eq!(fx.client.connection_state(), ConnectionState::Connected);
        assert!(fx.client.is_connected());
    }

    #[tokio::test]
    async fn test_registered_topics_replayed_after_connack() {
        let fx = fixture();

        // Registered before the session is up, so nothing is issued yet
        fx.client.register("rpi-01").await.unwrap();
        fx.client.register("rpi-01").await.unwrap();
        assert_eq!(fx.client.subscriptions.lock().await.len(), 5);

        assert_eq!(fx.supervisor.resubscribe().await, 5);
    }

    #[tokio::test]
    async fn test_error_while_connected_emits_error_then_close() {
        let mut fx = fixture();
        fx.supervisor.handle_event(&connack()).await;
        drain(&mut fx.events);

        fx.supervisor.handle_connection_error(&refused()).await;

        let events = drain(&mut fx.events);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], ShadowEvent::Error(reason) if reason.contains("connection refused")));
        assert_eq!(events[1], ShadowEvent::Close);
        assert!(matches!(
            fx.client.connection_state(),
            ConnectionState::Disconnected(_)
        ));
    }

    #[tokio::test]
    async fn test_error_while_connecting_emits_no_close() {
        let mut fx = fixture();

        fx.supervisor.handle_connection_error(&refused()).await;
        fx.supervisor.handle_connection_error(&refused()).await;

        let events = drain(&mut fx.events);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| matches!(e, ShadowEvent::Error(_))));
    }

    #[tokio::test]
    async fn test_broker_disconnect_emits_single_close() {
        let mut fx = fixture();
        fx.supervisor.handle_event(&connack()).await;
        drain(&mut fx.events);

        fx.supervisor.handle_event(&broker_disconnect()).await;
        fx.supervisor.handle_event(&broker_disconnect()).await;

        assert_eq!(drain(&mut fx.events), vec![ShadowEvent::Close]);
        assert!(!fx.client.is_connected());
    }

    #[tokio::test]
    async fn test_delta_publish_emits_delta() {
        let mut fx = fixture();

        fx.supervisor
            .handle_event(&incoming_publish(
                "$aws/things/rpi-01/shadow/update/delta",
                json!({"state": {"led": "on"}, "version": 7}),
            ))
            .await;

        assert_eq!(
            drain(&mut fx.events),
            vec![ShadowEvent::Delta {
                thing_name: "rpi-01".to_string(),
                state: json!({"led": "on"}),
            }]
        );
    }

    #[tokio::test]
    async fn test_operation_response_emits_status() {
        let mut fx = fixture();
        fx.supervisor.handle_event(&connack()).await;
        drain(&mut fx.events);

        let token = fx
            .client
            .update("rpi-01", json!({"reported": {"cpu": 12}}))
            .await
            .unwrap();
        assert!(token.starts_with("rpi-01-client-"));
        assert_eq!(fx.client.pending.lock().await.len(), 1);

        let document = json!({"state": {"reported": {"cpu": 12}}, "clientToken": token, "version": 3});
        fx.supervisor
            .handle_event(&incoming_publish(
                "$aws/things/rpi-01/shadow/update/accepted",
                document.clone(),
            ))
            .await;

        assert_eq!(
            drain(&mut fx.events),
            vec![ShadowEvent::Status {
                thing_name: "rpi-01".to_string(),
                status: OperationStatus::Accepted,
                client_token: token,
                document,
            }]
        );
        assert!(fx.client.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_token_is_ignored() {
        let mut fx = fixture();

        fx.supervisor
            .handle_event(&incoming_publish(
                "$aws/things/rpi-01/shadow/get/rejected",
                json!({"code": 404, "message": "No shadow exists", "clientToken": "someone-else"}),
            ))
            .await;

        assert!(drain(&mut fx.events).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_operation_emits_timeout() {
        let mut fx = fixture();
        fx.supervisor.handle_event(&connack()).await;
        drain(&mut fx.events);

        let token = fx.client.get("rpi-01").await.unwrap();

        fx.supervisor.expire_pending().await;
        assert!(drain(&mut fx.events).is_empty());

        tokio::time::advance(Duration::from_secs(11)).await;
        fx.supervisor.expire_pending().await;

        assert_eq!(
            drain(&mut fx.events),
            vec![ShadowEvent::Timeout {
                thing_name: "rpi-01".to_string(),
                client_token: token,
            }]
        );
    }

    #[tokio::test]
    async fn test_operations_and_publish_require_session() {
        let fx = fixture();

        assert!(matches!(
            fx.client.update("rpi-01", json!({})).await,
            Err(ShadowError::NotConnected { .. })
        ));
        assert!(matches!(
            fx.client.get("rpi-01").await,
            Err(ShadowError::NotConnected { .. })
        ));
        assert!(matches!(
            fx.client.publish("sensor/rpi-01", "{}".to_string()).await,
            Err(ShadowError::NotConnected { .. })
        ));
        assert!(fx.client.pending.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_aborts_unresponsive_event_loop() {
        let fx = fixture();
        let (alive_tx, alive_rx) = oneshot::channel::<()>();
        let stuck = tokio::spawn(async move {
            let _alive = alive_tx;
            std::future::pending::<()>().await;
        });
        *fx.client.event_loop_handle.lock().await = Some(stuck);

        fx.client.disconnect().await.unwrap();

        // The sender is dropped only when the task is torn down
        assert!(alive_rx.await.is_err());
    }
}
