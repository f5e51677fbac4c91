//! Mock transport for testing
//!
//! Records every call the agent makes and lets tests fire transport events
//! synchronously, so the connection state machine and dispatch path can be
//! exercised without a broker.

use crate::sync::lock;
use crate::transport::{
    BrokerTransport, ConnectOptions, EventHandler, Qos, SubscriptionToken, TransportError,
    TransportEvent,
};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A recorded subscribe request
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeCall {
    pub topic: String,
    pub qos: Qos,
    pub token: SubscriptionToken,
}

/// A recorded publish
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: Qos,
    pub retain: bool,
}

/// Mock transport for testing
#[derive(Default)]
pub struct MockTransport {
    connected: AtomicBool,
    fail_connect: AtomicBool,
    fail_subscriptions: AtomicBool,
    next_token: AtomicU64,
    disconnect_calls: AtomicUsize,
    handler: Mutex<Option<Arc<dyn EventHandler>>>,
    connect_calls: Mutex<Vec<ConnectOptions>>,
    subscribe_calls: Mutex<Vec<SubscribeCall>>,
    published: Mutex<Vec<PublishedMessage>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose connect requests are rejected synchronously
    pub fn with_failure() -> Self {
        let transport = Self::default();
        transport.fail_connect.store(true, Ordering::SeqCst);
        transport
    }

    /// Set the readiness reported by `is_connected` without firing events
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn fail_subscriptions(&self, fail: bool) {
        self.fail_subscriptions.store(fail, Ordering::SeqCst);
    }

    /// Deliver an event to the installed handler as the transport would.
    ///
    /// Connection events update the reported readiness first. Returns false
    /// when no handler has been installed yet.
    pub fn emit(&self, event: TransportEvent) -> bool {
        match &event {
            TransportEvent::Connected { result_code } => self.set_connected(*result_code == 0),
            TransportEvent::Disconnected { .. } => self.set_connected(false),
            _ => {}
        }

        let handler = lock(&self.handler).clone();
        match handler {
            Some(handler) => {
                handler.handle_event(event);
                true
            }
            None => false,
        }
    }

    pub fn emit_connected(&self) -> bool {
        self.emit(TransportEvent::Connected { result_code: 0 })
    }

    pub fn emit_disconnected(&self, expected: bool) -> bool {
        self.emit(TransportEvent::Disconnected {
            expected,
            reason: if expected {
                "disconnect requested".to_string()
            } else {
                "connection reset".to_string()
            },
        })
    }

    pub fn emit_message(&self, topic: &str, payload: Vec<u8>) -> bool {
        self.emit(TransportEvent::Message {
            topic: topic.to_string(),
            payload,
        })
    }

    /// Acknowledge a previously issued subscribe request
    pub fn emit_subscribed(&self, token: SubscriptionToken, granted_qos: Option<Qos>) -> bool {
        self.emit(TransportEvent::Subscribed { token, granted_qos })
    }

    pub fn connect_calls(&self) -> Vec<ConnectOptions> {
        lock(&self.connect_calls).clone()
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn subscribe_calls(&self) -> Vec<SubscribeCall> {
        lock(&self.subscribe_calls).clone()
    }

    /// Topic and QoS of every subscribe request, in order
    pub fn subscriptions(&self) -> Vec<(String, Qos)> {
        lock(&self.subscribe_calls)
            .iter()
            .map(|call| (call.topic.clone(), call.qos))
            .collect()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.published).clone()
    }

    pub fn clear_history(&self) {
        lock(&self.connect_calls).clear();
        lock(&self.subscribe_calls).clear();
        lock(&self.published).clear();
        self.disconnect_calls.store(0, Ordering::SeqCst);
    }
}

impl BrokerTransport for MockTransport {
    fn connect(
        &self,
        options: &ConnectOptions,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), TransportError> {
        lock(&self.connect_calls).push(options.clone());
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed(
                "Mock connection failure".to_string(),
            ));
        }
        *lock(&self.handler) = Some(handler);
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self, topic: &str, qos: Qos) -> Result<SubscriptionToken, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        if self.fail_subscriptions.load(Ordering::SeqCst) {
            return Err(TransportError::SubscriptionFailed(
                "Mock subscription failure".into(),
            ));
        }
        let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::SeqCst) + 1);
        lock(&self.subscribe_calls).push(SubscribeCall {
            topic: topic.to_string(),
            qos,
            token,
        });
        Ok(token)
    }

    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: Qos,
        retain: bool,
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        lock(&self.published).push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("connected", &self.is_connected())
            .field("subscribe_calls", &lock(&self.subscribe_calls).len())
            .field("published", &lock(&self.published).len())
            .finish()
    }
}
