//! Pure connection health and reconnection logic for the MQTT client
//!
//! The supervisor task feeds broker events through these functions to decide
//! the next [`ConnectionState`] and whether another reconnection attempt is
//! allowed. Nothing here performs I/O apart from logging.

use super::connection::{ConnectionState, ReconnectConfig};
use tracing::{error, info, warn};

/// Pure health monitoring and reconnection decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Determine if reconnection should be attempted (pure function)
    /// Supports unlimited retries when max_attempts is None
    pub fn should_attempt_reconnection(
        current_attempts: u32,
        config: &ReconnectConfig,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        if let Some(max_attempts) = config.max_attempts {
            if current_attempts >= max_attempts {
                return ReconnectionDecision::AbortMaxAttemptsExceeded;
            }
        }

        let backoff_delay = config.calculate_backoff_delay(current_attempts + 1);
        ReconnectionDecision::Proceed {
            attempt: current_attempts + 1,
            delay_ms: backoff_delay,
        }
    }

    /// Determine next state after connection event (pure function)
    pub fn determine_next_state(event: ConnectionEvent) -> ConnectionState {
        match event {
            ConnectionEvent::ConnAckReceived => ConnectionState::Connected,
            ConnectionEvent::DisconnectedByBroker => {
                ConnectionState::Disconnected("Broker disconnected".to_string())
            }
            ConnectionEvent::DisconnectedByClient => {
                ConnectionState::Disconnected("Client disconnected".to_string())
            }
            ConnectionEvent::NetworkError(error) => ConnectionState::Disconnected(error),
            ConnectionEvent::ReconnectionStarted(attempt) => ConnectionState::Reconnecting(attempt),
            ConnectionEvent::PermanentFailure(reason) => {
                ConnectionState::PermanentlyDisconnected(reason)
            }
        }
    }

    /// Check if connection state allows publishing (pure function)
    ///
    /// Publishes issued while reconnecting are queued by the client and go
    /// out once the session is back.
    pub fn can_publish(state: &ConnectionState) -> bool {
        matches!(
            state,
            ConnectionState::Connected | ConnectionState::Reconnecting(_)
        )
    }

    /// Check if connection state allows subscribing (pure function)
    pub fn can_subscribe(state: &ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }

    /// Log connection state transition
    ///
    /// Every session established is reported as "Connected to broker" and
    /// every loss is reported at error level with its cause.
    pub fn log_state_transition(client_id: &str, from: &ConnectionState, to: &ConnectionState) {
        match (from, to) {
            (ConnectionState::Reconnecting(attempt), ConnectionState::Connected) => {
                info!(client_id = %client_id, attempt, "Connected to broker");
            }
            (_, ConnectionState::Connected) => {
                info!(client_id = %client_id, "Connected to broker");
            }
            (ConnectionState::Connected, ConnectionState::Disconnected(reason)) => {
                error!(client_id = %client_id, reason = %reason, "Connection to broker lost");
            }
            (_, ConnectionState::Reconnecting(attempt)) => {
                warn!(client_id = %client_id, attempt, "Reconnecting to broker");
            }
            (_, ConnectionState::PermanentlyDisconnected(reason)) => {
                error!(client_id = %client_id, reason = %reason, "Broker connection permanently failed");
            }
            _ => {
                info!(client_id = %client_id, "MQTT connection state: {:?} -> {:?}", from, to);
            }
        }
    }

    /// Validate connection configuration (pure function)
    pub fn validate_connection_config(config: &ReconnectConfig) -> Result<(), String> {
        if let Some(max_attempts) = config.max_attempts {
            if max_attempts == 0 {
                return Err("max_attempts must be greater than 0 or None for unlimited".to_string());
            }
        }

        if config.sustained_delay == 0 {
            return Err("sustained_delay must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    /// Proceed with reconnection attempt
    Proceed { attempt: u32, delay_ms: u64 },
    /// Abort reconnection - shutdown requested
    AbortShutdownRequested,
    /// Abort reconnection - max attempts exceeded
    AbortMaxAttemptsExceeded,
}

/// Connection events that trigger state transitions
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// ConnAck received from broker
    ConnAckReceived,
    /// Broker initiated disconnect
    DisconnectedByBroker,
    /// Our own DISCONNECT packet went out
    DisconnectedByClient,
    /// Network or protocol error
    NetworkError(String),
    /// Reconnection attempt started
    ReconnectionStarted(u32),
    /// Permanent failure - no more retries
    PermanentFailure(String),
}
