//! Impure I/O operations for MQTT client
//!
//! This module handles all impure I/O operations including network communication,
//! async coordination, and integration with the rumqttc client.

use super::connection::{configure_mqtt_options, ConnectionState, MqttError, ReconnectConfig};
use super::health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
use super::message_handler::{EventRoute, MessageDispatcher, MessageHandler};
use crate::config::DeviceConfig;
use crate::tls::TlsMaterial;
use crate::transport::{MessageHandlerFn, Transport};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, EventLoop, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// MQTT 3.1.1 transport client for a single device session
pub struct MqttClient {
    client_id: String,
    broker_url: String,
    client: AsyncClient,
    event_loop: std::sync::Mutex<Option<EventLoop>>,
    connect_timeout: Duration,
    event_loop_handle: Option<JoinHandle<()>>,
    state_rx: Option<watch::Receiver<ConnectionState>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    disconnect_requested: Arc<AtomicBool>,
    reconnect_config: ReconnectConfig,
    dispatcher: Arc<Mutex<MessageDispatcher>>,
}

impl MqttClient {
    /// Build a client for `broker_url`; no network I/O happens until `connect`
    pub fn new(
        config: &DeviceConfig,
        broker_url: &str,
        tls: Option<&TlsMaterial>,
    ) -> Result<Self, MqttError> {
        let client_id = config.device.service_name.clone();
        let mqtt_options =
            configure_mqtt_options(&client_id, broker_url, &config.board_config, tls)?;

        let (client, event_loop) = AsyncClient::new(mqtt_options, 10);

        Ok(MqttClient {
            client_id,
            broker_url: broker_url.to_string(),
            client,
            event_loop: std::sync::Mutex::new(Some(event_loop)),
            connect_timeout: config.device.connect_timeout(),
            event_loop_handle: None,
            state_rx: None,
            shutdown_tx: None,
            disconnect_requested: Arc::new(AtomicBool::new(false)),
            reconnect_config: ReconnectConfig::default(),
            dispatcher: Arc::new(Mutex::new(MessageDispatcher::new())),
        })
    }

    /// Replace the reconnection policy; must be called before `connect`
    pub fn with_reconnect_config(
        mut self,
        reconnect_config: ReconnectConfig,
    ) -> Result<Self, MqttError> {
        HealthMonitor::validate_connection_config(&reconnect_config)
            .map_err(MqttError::InvalidReconnectConfig)?;
        self.reconnect_config = reconnect_config;
        Ok(self)
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Create connection state and shutdown channels
    #[allow(clippy::type_complexity)]
    fn setup_connection_channels() -> (
        (
            watch::Sender<ConnectionState>,
            watch::Receiver<ConnectionState>,
        ),
        (watch::Sender<bool>, watch::Receiver<bool>),
    ) {
        let state_channels = watch::channel(ConnectionState::Connecting);
        let shutdown_channels = watch::channel(false);
        (state_channels, shutdown_channels)
    }

    /// Wait for connection confirmation (ConnAck) with timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let timeout_result = tokio::time::timeout(timeout, async {
            loop {
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailedStr(
                        "State channel closed".to_string(),
                    ));
                }
                match *state_rx.borrow() {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected(ref reason) => {
                        return Err(MqttError::ConnectionFailedStr(reason.clone()));
                    }
                    ConnectionState::PermanentlyDisconnected(ref reason) => {
                        return Err(MqttError::ConnectionFailedStr(format!(
                            "Permanently disconnected: {reason}"
                        )));
                    }
                    ConnectionState::Connecting => continue,
                    ConnectionState::Reconnecting(_) => continue,
                }
            }
        })
        .await;

        match timeout_result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(MqttError::ConnectionFailedStr(
                "ConnAck timeout - no connection confirmation received".to_string(),
            )),
        }
    }

    /// Connect to the broker and start the event loop supervisor
    ///
    /// Returns only once the broker has acknowledged the session, or fails
    /// when the first attempt is refused or the connect timeout expires.
    pub async fn connect(&mut self) -> Result<(), MqttError> {
        let event_loop = self
            .event_loop
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| {
                MqttError::ConnectionFailedStr("Event loop already started".to_string())
            })?;

        let ((state_tx, state_rx), (shutdown_tx, shutdown_rx)) =
            Self::setup_connection_channels();
        self.state_rx = Some(state_rx.clone());
        self.shutdown_tx = Some(shutdown_tx);

        let supervisor = Supervisor {
            client_id: self.client_id.clone(),
            client: self.client.clone(),
            state_tx,
            shutdown_rx,
            disconnect_requested: self.disconnect_requested.clone(),
            reconnect_config: self.reconnect_config.clone(),
            dispatcher: self.dispatcher.clone(),
            reconnect_attempts: 0,
            ever_connected: false,
        };

        info!(
            client_id = %self.client_id,
            broker = %self.broker_url,
            "Connecting to MQTT broker"
        );
        let span = crate::mqtt_span!(client_id = %self.client_id, broker = %self.broker_url);
        self.event_loop_handle = Some(tokio::spawn(supervisor.run(event_loop).instrument(span)));

        if let Err(e) = Self::wait_for_connection_confirmation(state_rx, self.connect_timeout).await
        {
            debug!(client_id = %self.client_id, error = %e, "Connection attempt failed");
            self.stop_supervisor();
            return Err(e);
        }

        Ok(())
    }

    /// Disconnect from the broker and stop the supervisor
    pub async fn disconnect(&mut self) -> Result<(), MqttError> {
        let Some(mut handle) = self.event_loop_handle.take() else {
            debug!(client_id = %self.client_id, "Disconnect requested before connect");
            return Ok(());
        };

        self.disconnect_requested.store(true, Ordering::SeqCst);
        let mut sent = false;
        if self.is_connected() {
            match self.client.try_disconnect() {
                Ok(()) => sent = true,
                Err(e) => {
                    warn!(client_id = %self.client_id, error = %e, "Failed to send DISCONNECT")
                }
            }
        }
        if !sent {
            if let Some(shutdown_tx) = &self.shutdown_tx {
                let _ = shutdown_tx.send(true);
            }
        }

        match tokio::time::timeout(Duration::from_secs(2), &mut handle).await {
            Ok(Ok(())) => {
                debug!("Event loop task shut down gracefully");
            }
            Ok(Err(e)) if !e.is_cancelled() => {
                warn!("Event loop task ended with error: {}", e);
            }
            Err(_) => {
                warn!("Event loop task didn't shut down gracefully, forcing abort");
                handle.abort();
            }
            _ => {}
        }

        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }

        info!(client_id = %self.client_id, "MQTT client disconnected");
        Ok(())
    }

    fn stop_supervisor(&mut self) {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }

    /// Get current connection state
    /// Returns None if connection hasn't been established yet
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.state_rx.as_ref().map(|rx| rx.borrow().clone())
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.connection_state(), Some(ConnectionState::Connected))
    }

    /// Check if the connection is permanently disconnected
    pub fn is_permanently_disconnected(&self) -> bool {
        matches!(
            self.connection_state(),
            Some(ConnectionState::PermanentlyDisconnected(_))
        )
    }

    /// Check connection state against an operation guard
    fn check_connection_state(
        &self,
        allowed: fn(&ConnectionState) -> bool,
    ) -> Result<(), MqttError> {
        let state_rx = self.state_rx.as_ref().ok_or_else(|| {
            MqttError::ConnectionFailedStr("Client not connected: state_rx is None".to_string())
        })?;

        let current_state = state_rx.borrow().clone();
        if !allowed(&current_state) {
            return Err(MqttError::NotConnected {
                state: current_state,
            });
        }

        Ok(())
    }

    /// Publish a payload; completes once rumqttc has queued the packet
    pub async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), MqttError> {
        self.check_connection_state(HealthMonitor::can_publish)?;

        let size = payload.len();
        self.client
            .publish(topic, qos, retain, payload)
            .await
            .map_err(|e| MqttError::PublishFailed {
                topic: topic.to_string(),
                source: Box::new(e),
            })?;

        debug!(topic = %topic, qos = ?qos, retain, bytes = size, "Published message");
        Ok(())
    }

    /// Subscribe and wait for the broker's SubAck
    ///
    /// The subscription is remembered and replayed after every reconnect.
    pub async fn subscribe(
        &self,
        topic_filter: &str,
        qos: QoS,
        handler: MessageHandlerFn,
    ) -> Result<(), MqttError> {
        self.check_connection_state(HealthMonitor::can_subscribe)?;

        let ack = {
            let mut dispatcher = self.dispatcher.lock().await;
            dispatcher.register(topic_filter, qos, handler);
            let ack = dispatcher.expect_ack();
            if let Err(e) = self.client.try_subscribe(topic_filter, qos) {
                dispatcher.cancel_last_ack();
                dispatcher.unregister(topic_filter);
                return Err(MqttError::SubscriptionFailed {
                    topic: topic_filter.to_string(),
                    reason: e.to_string(),
                });
            }
            ack
        };

        let outcome = match tokio::time::timeout(self.connect_timeout, ack).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err("SubAck waiter dropped".to_string()),
            Err(_) => Err("SubAck timeout".to_string()),
        };

        match outcome {
            Ok(()) => {
                info!(topic = %topic_filter, qos = ?qos, "Subscribed");
                Ok(())
            }
            Err(reason) => {
                self.dispatcher.lock().await.unregister(topic_filter);
                Err(MqttError::SubscriptionFailed {
                    topic: topic_filter.to_string(),
                    reason,
                })
            }
        }
    }
}

/// State owned by the event loop task
struct Supervisor {
    client_id: String,
    client: AsyncClient,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_rx: watch::Receiver<bool>,
    disconnect_requested: Arc<AtomicBool>,
    reconnect_config: ReconnectConfig,
    dispatcher: Arc<Mutex<MessageDispatcher>>,
    reconnect_attempts: u32,
    ever_connected: bool,
}

impl Supervisor {
    async fn run(mut self, mut event_loop: EventLoop) {
        debug!("Starting MQTT event loop supervisor");

        loop {
            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping event loop supervisor");
                        break;
                    }
                }
                event_result = event_loop.poll() => {
                    let keep_running = match event_result {
                        Ok(event) => {
                            let route = MessageHandler::route_mqtt_event(&event);
                            self.process_event_route(route).await
                        }
                        Err(e) => self.handle_event_loop_error(e).await,
                    };
                    if !keep_running {
                        break;
                    }
                }
            }
        }

        debug!("MQTT event loop stopped");
    }

    fn transition(&self, event: ConnectionEvent) {
        let next = HealthMonitor::determine_next_state(event);
        let previous = self.state_tx.borrow().clone();
        HealthMonitor::log_state_transition(&self.client_id, &previous, &next);
        let _ = self.state_tx.send(next);
    }

    /// Returns true to continue loop, false to break
    async fn process_event_route(&mut self, route: EventRoute) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => {
                self.reconnect_attempts = 0;
                self.ever_connected = true;
                self.transition(ConnectionEvent::ConnAckReceived);
                self.resubscribe().await;
                true
            }
            EventRoute::MessageReceived {
                topic,
                payload,
                retain,
            } => {
                debug!(topic = %topic, retain, bytes = payload.len(), "Received MQTT message");
                self.dispatcher.lock().await.dispatch(&topic, &payload);
                true
            }
            EventRoute::Disconnected => {
                self.dispatcher.lock().await.fail_pending("Broker disconnected");
                self.transition(ConnectionEvent::DisconnectedByBroker);
                true
            }
            EventRoute::DisconnectSent => {
                self.transition(ConnectionEvent::DisconnectedByClient);
                false
            }
            EventRoute::SubscriptionConfirmed {
                packet_id,
                return_codes,
            } => {
                debug!(packet_id, ?return_codes, "Subscription acknowledged");
                self.dispatcher.lock().await.complete_ack(&return_codes);
                true
            }
            EventRoute::InfrastructureEvent(event_str) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    /// Returns true to continue loop (after reconnection delay), false to break
    async fn handle_event_loop_error(&mut self, error: ConnectionError) -> bool {
        let reason = error.to_string();
        self.dispatcher.lock().await.fail_pending(&reason);

        if self.disconnect_requested.load(Ordering::SeqCst) {
            self.transition(ConnectionEvent::DisconnectedByClient);
            return false;
        }

        // The first session must succeed outright; retries only follow a loss
        if !self.ever_connected {
            self.transition(ConnectionEvent::NetworkError(reason));
            return false;
        }

        // Log the loss, then go straight to Reconnecting; publishers never see
        // a closed session in between
        let previous = self.state_tx.borrow().clone();
        let lost =
            HealthMonitor::determine_next_state(ConnectionEvent::NetworkError(reason.clone()));
        HealthMonitor::log_state_transition(&self.client_id, &previous, &lost);

        self.attempt_reconnection(reason).await
    }

    async fn attempt_reconnection(&mut self, reason: String) -> bool {
        let decision = HealthMonitor::should_attempt_reconnection(
            self.reconnect_attempts,
            &self.reconnect_config,
            *self.shutdown_rx.borrow(),
        );

        match decision {
            ReconnectionDecision::Proceed { attempt, delay_ms } => {
                self.reconnect_attempts = attempt;
                self.transition(ConnectionEvent::ReconnectionStarted(attempt));
                debug!(attempt, delay_ms, "Waiting before reconnection attempt");

                // The next poll re-establishes the connection
                interruptible_sleep(self.shutdown_rx.clone(), delay_ms).await
            }
            ReconnectionDecision::AbortShutdownRequested => {
                info!("Shutdown signal received, stopping reconnection");
                self.transition(ConnectionEvent::NetworkError(reason));
                false
            }
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                let reason = format!(
                    "Max reconnection attempts ({}) exceeded",
                    self.reconnect_attempts
                );
                self.transition(ConnectionEvent::PermanentFailure(reason));
                false
            }
        }
    }

    /// Replay recorded subscriptions on a fresh session
    async fn resubscribe(&self) {
        let mut dispatcher = self.dispatcher.lock().await;
        let subscriptions: Vec<(String, QoS)> = dispatcher
            .subscriptions()
            .iter()
            .map(|s| (s.filter.clone(), s.qos))
            .collect();

        for (filter, qos) in subscriptions {
            match self.client.try_subscribe(filter.as_str(), qos) {
                Ok(()) => {
                    dispatcher.expect_internal_ack();
                    debug!(topic = %filter, "Re-subscribed");
                }
                Err(e) => error!(topic = %filter, error = %e, "Failed to re-subscribe"),
            }
        }
    }
}

/// Perform interruptible sleep with shutdown monitoring
/// Returns true if sleep completed, false if shutdown requested
async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
    tokio::select! {
        changed = shutdown_rx.changed() => {
            if changed.is_err() || *shutdown_rx.borrow() {
                info!("Shutdown signal received during reconnection delay, stopping");
                return false;
            }
            true
        }
        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {
            true
        }
    }
}

#[async_trait]
impl Transport for MqttClient {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        MqttClient::connect(self).await
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        MqttClient::disconnect(self).await
    }

    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), Self::Error> {
        MqttClient::publish(self, topic, qos, retain, payload).await
    }

    async fn subscribe(
        &self,
        topic_filter: &str,
        qos: QoS,
        handler: MessageHandlerFn,
    ) -> Result<(), Self::Error> {
        MqttClient::subscribe(self, topic_filter, qos, handler).await
    }

    fn is_connected(&self) -> bool {
        MqttClient::is_connected(self)
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        MqttClient::connection_state(self)
    }

    fn is_permanently_disconnected(&self) -> bool {
        MqttClient::is_permanently_disconnected(self)
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        // Async disconnect is impossible here; only stop the background task
        self.stop_supervisor();
    }
}
