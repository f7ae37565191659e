//! Message routing for MQTT events
//!
//! [`MessageHandler`] turns raw rumqttc events into [`EventRoute`] decisions.
//! [`MessageDispatcher`] owns the subscription registry, delivers inbound
//! publishes to matching handlers and pairs SUBACKs with waiting callers.

use crate::transport::MessageHandlerFn;
use bytes::Bytes;
use rumqttc::{Event, Outgoing, Packet, QoS, SubscribeReasonCode};
use std::collections::VecDeque;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: publish.topic.clone(),
                    payload: publish.payload.clone(),
                    retain: publish.retain,
                },
                Packet::Disconnect => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    return_codes: suback
                        .return_codes
                        .iter()
                        .map(|code| match code {
                            SubscribeReasonCode::Success(qos) => *qos as u8,
                            SubscribeReasonCode::Failure => 0x80,
                        })
                        .collect(),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Validate subscription success from SubAck (pure function)
    pub fn validate_subscription_success(return_codes: &[u8]) -> Result<(), String> {
        if return_codes.iter().any(|&code| code >= 0x80) {
            Err(format!(
                "Subscription failed with return codes: {return_codes:?}"
            ))
        } else {
            Ok(())
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on subscribed topic
    MessageReceived {
        topic: String,
        payload: Bytes,
        retain: bool,
    },
    /// MQTT broker disconnected
    Disconnected,
    /// Our DISCONNECT packet was written to the socket
    DisconnectSent,
    /// Subscription confirmed with return codes
    SubscriptionConfirmed {
        packet_id: u16,
        return_codes: Vec<u8>,
    },
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

/// MQTT topic filter matching with `+` (one level) and `#` (remaining levels)
///
/// Wildcards at the first level never match topics starting with `$`.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// A registered subscription, replayed after every reconnect
#[derive(Clone)]
pub struct Subscription {
    pub filter: String,
    pub qos: QoS,
    handler: MessageHandlerFn,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("filter", &self.filter)
            .field("qos", &self.qos)
            .finish_non_exhaustive()
    }
}

type SubAckSender = oneshot::Sender<Result<(), String>>;

/// Subscription registry plus the FIFO of callers awaiting a SUBACK
///
/// The broker acknowledges SUBSCRIBE packets in the order they were sent, so
/// every subscribe request must be enqueued here in the same order it is
/// handed to the client. Replayed subscriptions enqueue `None`.
#[derive(Default)]
pub struct MessageDispatcher {
    subscriptions: Vec<Subscription>,
    pending_acks: VecDeque<Option<SubAckSender>>,
}

impl MessageDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a subscription; replaces the handler of an identical filter
    pub fn register(&mut self, filter: &str, qos: QoS, handler: MessageHandlerFn) {
        let subscription = Subscription {
            filter: filter.to_string(),
            qos,
            handler,
        };
        match self.subscriptions.iter_mut().find(|s| s.filter == filter) {
            Some(existing) => *existing = subscription,
            None => self.subscriptions.push(subscription),
        }
    }

    pub fn unregister(&mut self, filter: &str) {
        self.subscriptions.retain(|s| s.filter != filter);
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    /// Queue a waiter for the next SUBACK; returns the receiving half
    pub fn expect_ack(&mut self) -> oneshot::Receiver<Result<(), String>> {
        let (tx, rx) = oneshot::channel();
        self.pending_acks.push_back(Some(tx));
        rx
    }

    /// Queue an anonymous SUBACK slot for a replayed subscription
    pub fn expect_internal_ack(&mut self) {
        self.pending_acks.push_back(None);
    }

    /// Remove the most recently queued waiter after its request was rejected
    pub fn cancel_last_ack(&mut self) {
        self.pending_acks.pop_back();
    }

    /// Resolve the oldest waiter with the SUBACK outcome
    pub fn complete_ack(&mut self, return_codes: &[u8]) {
        let outcome = MessageHandler::validate_subscription_success(return_codes);
        match self.pending_acks.pop_front() {
            Some(Some(waiter)) => {
                // Receiver may have timed out already
                let _ = waiter.send(outcome);
            }
            Some(None) => {
                if let Err(reason) = outcome {
                    warn!(reason = %reason, "Re-subscription rejected by broker");
                }
            }
            None => debug!("SubAck received with no pending subscription"),
        }
    }

    /// Fail every pending waiter; used when the session drops
    pub fn fail_pending(&mut self, reason: &str) {
        for waiter in self.pending_acks.drain(..).flatten() {
            let _ = waiter.send(Err(reason.to_string()));
        }
    }

    /// Invoke every handler whose filter matches `topic`; returns the count
    pub fn dispatch(&self, topic: &str, payload: &[u8]) -> usize {
        let mut delivered = 0;
        for subscription in &self.subscriptions {
            if topic_matches(&subscription.filter, topic) {
                (subscription.handler)(topic, payload);
                delivered += 1;
            }
        }
        if delivered == 0 {
            debug!(topic = %topic, "Message matched no subscription");
        }
        delivered
    }
}
