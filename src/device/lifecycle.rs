//! Device service lifecycle
//!
//! [`DeviceService`] owns the transport and drives the state machine
//! `Unconnected → Connected → Running → Terminating → Terminated`. While
//! running it supervises the telemetry and heartbeat activities and ends on
//! the first of: the caller's signal future, a fatal telemetry error, or a
//! permanently lost broker connection.

use super::publisher::{HeartbeatPublisher, TelemetryPublisher};
use super::subscriber::CommandSubscriber;
use super::ticker::{IntervalTicker, Ticker};
use crate::config::DeviceConfig;
use crate::error::{DeviceError, DeviceResult};
use crate::sensor::{MeasurementSource, RandomVoltageSource};
use crate::transport::{MessageHandlerFn, Transport};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument};

/// How often the transport is checked for a permanent disconnect
const CONNECTION_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long `shutdown` waits for each activity before aborting it
const ACTIVITY_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Unconnected,
    Connected,
    Running,
    Terminating,
    Terminated,
}

/// Why the service stopped running
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// Interrupt or terminate signal
    Signal,
    /// The telemetry activity hit an encoding or publish error
    TelemetryFailed(String),
    /// The transport gave up reconnecting
    ConnectionLost(String),
}

impl TerminationReason {
    pub fn is_failure(&self) -> bool {
        !matches!(self, TerminationReason::Signal)
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::Signal => write!(f, "termination signal received"),
            TerminationReason::TelemetryFailed(e) => write!(f, "telemetry failed: {e}"),
            TerminationReason::ConnectionLost(e) => write!(f, "broker connection lost: {e}"),
        }
    }
}

pub struct DeviceService<T>
where
    T: Transport + 'static,
{
    config: DeviceConfig,
    state: ServiceState,
    transport: Option<T>,
    shared_transport: Option<Arc<T>>,
    source: Arc<dyn MeasurementSource>,
    command_handler: Option<MessageHandlerFn>,
    shutdown_tx: watch::Sender<bool>,
    fatal_rx: Option<mpsc::Receiver<DeviceError>>,
    telemetry_handle: Option<JoinHandle<()>>,
    heartbeat_handle: Option<JoinHandle<()>>,
}

impl<T> DeviceService<T>
where
    T: Transport + 'static,
{
    /// Service sampling [`RandomVoltageSource`] and logging inbound commands
    pub fn new(config: DeviceConfig, transport: T) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            state: ServiceState::Unconnected,
            transport: Some(transport),
            shared_transport: None,
            source: Arc::new(RandomVoltageSource),
            command_handler: None,
            shutdown_tx,
            fatal_rx: None,
            telemetry_handle: None,
            heartbeat_handle: None,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn MeasurementSource>) -> Self {
        self.source = source;
        self
    }

    pub fn with_command_handler(mut self, handler: MessageHandlerFn) -> Self {
        self.command_handler = Some(handler);
        self
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    fn require_state(&self, expected: ServiceState, operation: &str) -> DeviceResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(DeviceError::InvalidState(format!(
                "{operation} requires {expected:?}, service is {:?}",
                self.state
            )))
        }
    }

    /// Establish the broker session
    pub async fn connect(&mut self) -> DeviceResult<()> {
        self.require_state(ServiceState::Unconnected, "connect")?;
        let span = crate::lifecycle_span!(phase = "connect", device_id = %self.config.device_id());

        async {
            let transport = self
                .transport
                .as_mut()
                .ok_or_else(|| DeviceError::InvalidState("transport missing".to_string()))?;

            match transport.connect().await {
                Ok(()) => {
                    self.state = ServiceState::Connected;
                    info!("Device connected");
                    Ok(())
                }
                Err(e) => {
                    self.state = ServiceState::Terminated;
                    Err(DeviceError::connect(e))
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Start with production tickers from the configured intervals
    pub async fn start(&mut self) -> DeviceResult<()> {
        let telemetry = IntervalTicker::new(self.config.device.telemetry_interval());
        let heartbeat = IntervalTicker::delayed(self.config.device.heartbeat_interval());
        self.start_with_tickers(telemetry, heartbeat).await
    }

    /// Subscribe to commands, then spawn the telemetry and heartbeat activities
    pub async fn start_with_tickers<A, B>(
        &mut self,
        telemetry_ticker: A,
        heartbeat_ticker: B,
    ) -> DeviceResult<()>
    where
        A: Ticker + 'static,
        B: Ticker + 'static,
    {
        self.require_state(ServiceState::Connected, "start")?;
        let transport = match self.transport.take() {
            Some(transport) => Arc::new(transport),
            None => return Err(DeviceError::InvalidState("transport missing".to_string())),
        };
        self.shared_transport = Some(transport.clone());

        let mut subscriber = CommandSubscriber::new(transport.clone(), &self.config);
        if let Some(handler) = &self.command_handler {
            subscriber = subscriber.with_handler(handler.clone());
        }
        if let Err(e) = subscriber.listen().await {
            self.state = ServiceState::Terminated;
            return Err(e);
        }

        let device_id = self.config.device_id().to_string();
        let (fatal_tx, fatal_rx) = mpsc::channel(1);
        self.fatal_rx = Some(fatal_rx);

        let telemetry =
            TelemetryPublisher::new(transport.clone(), &self.config, self.source.clone());
        let shutdown_rx = self.shutdown_tx.subscribe();
        self.telemetry_handle = Some(tokio::spawn(
            async move {
                if let Err(e) = telemetry.run(telemetry_ticker, shutdown_rx).await {
                    let _ = fatal_tx.send(e).await;
                }
            }
            .instrument(crate::telemetry_span!(activity = "telemetry", device_id = %device_id)),
        ));

        let heartbeat = HeartbeatPublisher::new(transport, &self.config);
        let shutdown_rx = self.shutdown_tx.subscribe();
        self.heartbeat_handle = Some(tokio::spawn(
            heartbeat
                .run(heartbeat_ticker, shutdown_rx)
                .instrument(crate::telemetry_span!(activity = "heartbeat", device_id = %device_id)),
        ));

        self.state = ServiceState::Running;
        info!(
            device_id = %device_id,
            telemetry_interval_ms = self.config.device.telemetry_interval_ms,
            heartbeat_interval_ms = self.config.device.heartbeat_interval_ms,
            "Device service running"
        );
        Ok(())
    }

    /// Block until `signal` resolves or the service fails on its own
    pub async fn wait_for_termination<F>(&mut self, signal: F) -> DeviceResult<TerminationReason>
    where
        F: Future<Output = ()>,
    {
        self.require_state(ServiceState::Running, "wait_for_termination")?;
        let transport = self
            .shared_transport
            .clone()
            .ok_or_else(|| DeviceError::InvalidState("transport missing".to_string()))?;
        let mut fatal_rx = self
            .fatal_rx
            .take()
            .ok_or_else(|| DeviceError::InvalidState("already waited".to_string()))?;

        let mut connection_check = tokio::time::interval(CONNECTION_POLL_INTERVAL);
        tokio::pin!(signal);

        let reason = loop {
            tokio::select! {
                _ = &mut signal => break TerminationReason::Signal,
                Some(e) = fatal_rx.recv() => break TerminationReason::TelemetryFailed(e.to_string()),
                _ = connection_check.tick() => {
                    if transport.is_permanently_disconnected() {
                        let detail = transport
                            .connection_state()
                            .map(|state| format!("{state:?}"))
                            .unwrap_or_else(|| "unknown".to_string());
                        break TerminationReason::ConnectionLost(detail);
                    }
                }
            }
        };

        self.state = ServiceState::Terminating;
        self.stop_activities().await;
        if reason.is_failure() {
            error!(reason = %reason, "Device service terminating");
        } else {
            info!(reason = %reason, "Device service terminating");
        }
        Ok(reason)
    }

    /// Signal both activities and wait for them to finish; idempotent
    async fn stop_activities(&mut self) {
        self.shutdown_tx.send_replace(true);

        for (name, handle) in [
            ("telemetry", self.telemetry_handle.take()),
            ("heartbeat", self.heartbeat_handle.take()),
        ] {
            if let Some(handle) = handle {
                join_activity(name, handle).await;
            }
        }
    }

    /// Stop the activities, then disconnect the transport (best effort)
    pub async fn shutdown(&mut self) -> DeviceResult<()> {
        if self.state == ServiceState::Terminated
            && self.shared_transport.is_none()
            && self.transport.is_none()
        {
            return Ok(());
        }
        let span = crate::lifecycle_span!(phase = "shutdown", device_id = %self.config.device_id());

        async {
            self.stop_activities().await;

            let transport = match self.shared_transport.take() {
                Some(shared) => match Arc::try_unwrap(shared) {
                    Ok(transport) => Some(transport),
                    Err(_) => {
                        warn!("Transport still shared, skipping disconnect");
                        None
                    }
                },
                None => self.transport.take(),
            };

            if let Some(mut transport) = transport {
                if let Err(e) = transport.disconnect().await {
                    warn!(error = %e, "Failed to disconnect cleanly");
                }
            }

            self.state = ServiceState::Terminated;
            info!("Device service stopped");
            Ok(())
        }
        .instrument(span)
        .await
    }
}

async fn join_activity(name: &str, mut handle: JoinHandle<()>) {
    match tokio::time::timeout(ACTIVITY_JOIN_TIMEOUT, &mut handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(activity = name, error = %e, "Activity ended abnormally"),
        Err(_) => {
            warn!(activity = name, "Activity did not stop in time, aborting");
            handle.abort();
        }
    }
}
