//! Input plugs: subscription state and listener fan-out

use super::{Listener, Plug};
use crate::error::{AgentError, AgentResult};
use crate::protocol::{topic_matches, Payload};
use crate::sync::{lock, read, write};
use crate::transport::{BrokerSession, Qos, SubscriptionToken, TransportError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};
use tracing::{debug, error, warn};

#[derive(Debug, Default)]
struct SubscriptionStatus {
    token: Option<SubscriptionToken>,
    granted_qos: Option<Qos>,
    acknowledged: bool,
}

/// A named subscription point
pub struct InputPlug {
    name: String,
    topic: String,
    qos: Qos,
    connected: AtomicBool,
    listeners: RwLock<Vec<Listener>>,
    subscription: Mutex<SubscriptionStatus>,
    session: BrokerSession,
}

impl InputPlug {
    pub(crate) fn new(name: String, topic: String, qos: Qos, session: BrokerSession) -> Self {
        Self {
            name,
            topic,
            qos,
            connected: AtomicBool::new(false),
            listeners: RwLock::new(Vec::new()),
            subscription: Mutex::new(SubscriptionStatus::default()),
            session,
        }
    }

    /// Register a listener. Registering the same listener twice is an error.
    pub fn add_listener(&self, listener: Listener) -> AgentResult<()> {
        let mut listeners = write(&self.listeners);
        if listeners.iter().any(|l| l.same_as(&listener)) {
            return Err(AgentError::duplicate_listener(&self.name));
        }
        listeners.push(listener);
        debug!(
            "Added listener to input plug {}; {} registered",
            self.name,
            listeners.len()
        );
        Ok(())
    }

    /// Unregister a listener. Unknown listeners are ignored.
    pub fn remove_listener(&self, listener: &Listener) {
        let mut listeners = write(&self.listeners);
        let before = listeners.len();
        listeners.retain(|l| !l.same_as(listener));
        if listeners.len() < before {
            debug!(
                "Removed listener from input plug {}; {} remaining",
                self.name,
                listeners.len()
            );
        }
    }

    pub fn listener_count(&self) -> usize {
        read(&self.listeners).len()
    }

    /// Token of the most recent subscribe request
    pub fn subscription_token(&self) -> Option<SubscriptionToken> {
        lock(&self.subscription).token
    }

    /// Whether the broker acknowledged the most recent subscribe request
    pub fn is_subscribed(&self) -> bool {
        lock(&self.subscription).acknowledged
    }

    /// QoS the broker granted for the most recent subscription
    pub fn granted_qos(&self) -> Option<Qos> {
        lock(&self.subscription).granted_qos
    }

    /// Whether a message published on `topic` belongs to this plug
    pub fn matches(&self, topic: &str) -> bool {
        topic_matches(&self.topic, topic)
    }

    /// Request a subscription to this plug's topic.
    ///
    /// Failures are logged, never returned; the result only says whether a
    /// request was issued.
    pub(crate) fn subscribe(&self) -> bool {
        let _span = crate::mqtt_span!(operation = "subscribe", plug = %self.name, topic = %self.topic).entered();

        if !self.session.is_connected() {
            warn!("Cannot subscribe to {}; not connected to a broker", self.topic);
            return false;
        }

        match self.session.subscribe(&self.topic, self.qos) {
            Ok(token) => {
                *lock(&self.subscription) = SubscriptionStatus {
                    token: Some(token),
                    ..SubscriptionStatus::default()
                };
                debug!("Subscribe request {} issued for topic {}", token, self.topic);
                true
            }
            Err(TransportError::NotConnected) => {
                warn!("Failed to subscribe to topic {}; client is not connected", self.topic);
                false
            }
            Err(e) => {
                warn!("Failed to subscribe to topic {}: {}", self.topic, e);
                false
            }
        }
    }

    /// Record a subscribe acknowledgement. Returns false for a stale token.
    pub(crate) fn acknowledge(&self, token: SubscriptionToken, granted_qos: Option<Qos>) -> bool {
        let mut subscription = lock(&self.subscription);
        if subscription.token != Some(token) {
            return false;
        }
        subscription.acknowledged = granted_qos.is_some();
        subscription.granted_qos = granted_qos;
        true
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        if !connected {
            *lock(&self.subscription) = SubscriptionStatus::default();
        }
    }

    /// Deliver a decoded message to every registered listener.
    ///
    /// Listeners run against a snapshot, so they may add or remove listeners
    /// freely. A panicking listener is logged and does not stop the others.
    /// Returns the number of listeners that completed.
    pub(crate) fn dispatch(&self, topic: &str, payload: &Payload) -> usize {
        let listeners = read(&self.listeners).clone();
        let mut delivered = 0;
        for listener in &listeners {
            match catch_unwind(AssertUnwindSafe(|| listener.call(topic, payload))) {
                Ok(()) => delivered += 1,
                Err(_) => error!(
                    "Listener on input plug {} panicked while handling a message on {}",
                    self.name, topic
                ),
            }
        }
        delivered
    }
}

impl Plug for InputPlug {
    fn name(&self) -> &str {
        &self.name
    }

    fn topic(&self) -> &str {
        &self.topic
    }

    fn qos(&self) -> Qos {
        self.qos
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for InputPlug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputPlug")
            .field("name", &self.name)
            .field("topic", &self.topic)
            .field("qos", &self.qos)
            .field("connected", &self.is_connected())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn plug(session: Arc<MockTransport>) -> InputPlug {
        InputPlug::new(
            "temp".to_string(),
            "+/+/temp".to_string(),
            Qos::AtLeastOnce,
            session,
        )
    }

    fn counting_listener(counter: &Arc<AtomicUsize>) -> Listener {
        let counter = counter.clone();
        Listener::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_duplicate_listener_rejected() {
        let plug = plug(Arc::new(MockTransport::new()));
        let listener = Listener::new(|_, _| {});

        plug.add_listener(listener.clone()).unwrap();
        assert!(matches!(
            plug.add_listener(listener.clone()),
            Err(AgentError::DuplicateListener { .. })
        ));
        assert_eq!(plug.listener_count(), 1);
    }

    #[test]
    fn test_remove_unknown_listener_is_noop() {
        let plug = plug(Arc::new(MockTransport::new()));
        let kept = Listener::new(|_, _| {});
        plug.add_listener(kept.clone()).unwrap();

        plug.remove_listener(&Listener::new(|_, _| {}));
        assert_eq!(plug.listener_count(), 1);

        plug.remove_listener(&kept);
        assert_eq!(plug.listener_count(), 0);
    }

    #[test]
    fn test_dispatch_reaches_every_listener() {
        let plug = plug(Arc::new(MockTransport::new()));
        let counter = Arc::new(AtomicUsize::new(0));
        plug.add_listener(counting_listener(&counter)).unwrap();
        plug.add_listener(counting_listener(&counter)).unwrap();

        assert_eq!(plug.dispatch("robot/r1/temp", &Payload::Float(21.5)), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let plug = plug(Arc::new(MockTransport::new()));
        let counter = Arc::new(AtomicUsize::new(0));
        plug.add_listener(Listener::new(|_, _| panic!("listener failure")))
            .unwrap();
        plug.add_listener(counting_listener(&counter)).unwrap();

        assert_eq!(plug.dispatch("robot/r1/temp", &Payload::Nil), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscribe_requires_connected_session() {
        let session = Arc::new(MockTransport::new());
        let plug = plug(session.clone());

        assert!(!plug.subscribe());
        assert!(session.subscriptions().is_empty());

        session.set_connected(true);
        assert!(plug.subscribe());
        assert_eq!(
            session.subscriptions(),
            vec![("+/+/temp".to_string(), Qos::AtLeastOnce)]
        );
        assert!(plug.subscription_token().is_some());
        assert!(!plug.is_subscribed());
    }

    #[test]
    fn test_acknowledge_matches_current_token() {
        let session = Arc::new(MockTransport::new());
        session.set_connected(true);
        let plug = plug(session);
        plug.subscribe();
        let token = plug.subscription_token().unwrap();

        assert!(!plug.acknowledge(SubscriptionToken(token.0 + 100), Some(Qos::AtMostOnce)));
        assert!(plug.acknowledge(token, Some(Qos::AtLeastOnce)));
        assert!(plug.is_subscribed());
        assert_eq!(plug.granted_qos(), Some(Qos::AtLeastOnce));

        plug.set_connected(false);
        assert!(!plug.is_subscribed());
        assert!(plug.subscription_token().is_none());
    }

    #[test]
    fn test_subscribe_failure_is_not_an_error() {
        let session = Arc::new(MockTransport::new());
        session.set_connected(true);
        session.fail_subscriptions(true);
        let plug = plug(session);

        assert!(!plug.subscribe());
        assert!(plug.subscription_token().is_none());
    }

    #[test]
    fn test_topic_matching() {
        let plug = plug(Arc::new(MockTransport::new()));
        assert!(plug.matches("test/abc123/temp"));
        assert!(!plug.matches("test/abc123/humidity"));
    }
}
