//! Mock implementations for testing
//!
//! Provides a mock [`Transport`] that records traffic and can be told to fail,
//! and a [`ManualTicker`] that only fires when a test asks it to.

use crate::device::ticker::Ticker;
use crate::transport::{mqtt::ConnectionState, MessageHandlerFn, QoS, Transport};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

/// One message handed to the mock transport
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub payload: Vec<u8>,
}

#[derive(Debug, Error, PartialEq)]
pub enum MockTransportError {
    #[error("Mock connection failure")]
    ConnectFailed,
    #[error("Mock transport is not connected")]
    NotConnected,
    #[error("Mock publish failure on {0}")]
    PublishFailed(String),
    #[error("Mock subscribe failure on {0}")]
    SubscribeFailed(String),
}

#[derive(Default)]
struct MockState {
    published_messages: Mutex<Vec<PublishedMessage>>,
    failed_publishes: Mutex<Vec<String>>,
    failing_topics: Mutex<HashSet<String>>,
    subscriptions: Mutex<Vec<(String, QoS, MessageHandlerFn)>>,
    connected: AtomicBool,
    permanently_disconnected: AtomicBool,
    disconnect_calls: AtomicUsize,
}

/// Mock transport for testing
///
/// Clones share state, so a test can keep one handle while the service owns
/// another.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<MockState>,
    pub should_fail_connect: bool,
    pub should_fail_subscribe: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that behaves as if `connect` already succeeded
    pub fn connected() -> Self {
        let transport = Self::default();
        transport.state.connected.store(true, Ordering::SeqCst);
        transport
    }

    pub fn with_connect_failure() -> Self {
        Self {
            should_fail_connect: true,
            ..Default::default()
        }
    }

    pub fn with_subscribe_failure() -> Self {
        Self {
            should_fail_subscribe: true,
            ..Default::default()
        }
    }

    /// Every publish to `topic` fails until [`clear_failures`](Self::clear_failures)
    pub async fn fail_publishes_to(&self, topic: &str) {
        self.state.failing_topics.lock().await.insert(topic.to_string());
    }

    pub async fn clear_failures(&self) {
        self.state.failing_topics.lock().await.clear();
    }

    pub fn set_permanently_disconnected(&self) {
        self.state.connected.store(false, Ordering::SeqCst);
        self.state
            .permanently_disconnected
            .store(true, Ordering::SeqCst);
    }

    pub async fn get_published_messages(&self) -> Vec<PublishedMessage> {
        self.state.published_messages.lock().await.clone()
    }

    pub async fn get_published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.state
            .published_messages
            .lock()
            .await
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// Topics of publishes that were rejected
    pub async fn get_failed_publishes(&self) -> Vec<String> {
        self.state.failed_publishes.lock().await.clone()
    }

    pub async fn subscription_filters(&self) -> Vec<String> {
        self.state
            .subscriptions
            .lock()
            .await
            .iter()
            .map(|(filter, _, _)| filter.clone())
            .collect()
    }

    pub fn disconnect_count(&self) -> usize {
        self.state.disconnect_calls.load(Ordering::SeqCst)
    }

    /// Simulate an inbound message; returns how many handlers saw it
    pub async fn deliver(&self, topic: &str, payload: &[u8]) -> usize {
        let subscriptions = self.state.subscriptions.lock().await;
        let mut delivered = 0;
        for (filter, _, handler) in subscriptions.iter() {
            if crate::transport::mqtt::topic_matches(filter, topic) {
                handler(topic, payload);
                delivered += 1;
            }
        }
        delivered
    }

    /// Wait until `count` messages reached `topic`; false after one second
    pub async fn wait_for_published(&self, topic: &str, count: usize) -> bool {
        for _ in 0..1000 {
            if self.get_published_to(topic).await.len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        false
    }

    /// Wait until `count` publishes to `topic` were rejected
    pub async fn wait_for_failed(&self, topic: &str, count: usize) -> bool {
        for _ in 0..1000 {
            let failed = self
                .get_failed_publishes()
                .await
                .iter()
                .filter(|t| t.as_str() == topic)
                .count();
            if failed >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        false
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MockTransportError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        if self.should_fail_connect {
            return Err(MockTransportError::ConnectFailed);
        }
        self.state.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        self.state.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.state.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), Self::Error> {
        if !self.is_connected() {
            return Err(MockTransportError::NotConnected);
        }

        if self.state.failing_topics.lock().await.contains(topic) {
            self.state
                .failed_publishes
                .lock()
                .await
                .push(topic.to_string());
            return Err(MockTransportError::PublishFailed(topic.to_string()));
        }

        self.state
            .published_messages
            .lock()
            .await
            .push(PublishedMessage {
                topic: topic.to_string(),
                qos,
                retain,
                payload,
            });
        Ok(())
    }

    async fn subscribe(
        &self,
        topic_filter: &str,
        qos: QoS,
        handler: MessageHandlerFn,
    ) -> Result<(), Self::Error> {
        if self.should_fail_subscribe {
            return Err(MockTransportError::SubscribeFailed(topic_filter.to_string()));
        }
        self.state
            .subscriptions
            .lock()
            .await
            .push((topic_filter.to_string(), qos, handler));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        if self.state.permanently_disconnected.load(Ordering::SeqCst) {
            Some(ConnectionState::PermanentlyDisconnected(
                "Mock connection lost".to_string(),
            ))
        } else if self.is_connected() {
            Some(ConnectionState::Connected)
        } else {
            None
        }
    }

    fn is_permanently_disconnected(&self) -> bool {
        self.state.permanently_disconnected.load(Ordering::SeqCst)
    }
}

/// Ticker driven by a [`TickHandle`]; never fires on its own
pub struct ManualTicker {
    rx: mpsc::UnboundedReceiver<()>,
}

#[derive(Clone)]
pub struct TickHandle {
    tx: mpsc::UnboundedSender<()>,
}

impl ManualTicker {
    pub fn new() -> (Self, TickHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, TickHandle { tx })
    }
}

impl TickHandle {
    pub fn tick(&self) {
        let _ = self.tx.send(());
    }
}

#[async_trait]
impl Ticker for ManualTicker {
    async fn tick(&mut self) {
        if self.rx.recv().await.is_none() {
            // All handles dropped: behave like a ticker that never fires again
            std::future::pending::<()>().await;
        }
    }
}
