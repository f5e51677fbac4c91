//! rumqttc-backed broker transport
//!
//! `connect` spawns an event loop task on the ambient tokio runtime. The task
//! routes every rumqttc event through [`route_mqtt_event`] and forwards the
//! interesting ones to the installed [`EventHandler`]. Network failures are
//! retried with the backoff from [`ReconnectConfig`] until a disconnect is
//! requested.
//!
//! Subscribe requests go through a second task that feeds the bounded client
//! queue with awaiting sends. The agent resubscribes every input from inside
//! the event loop, which cannot drain that queue until the handler returns.

use super::connection::{configure_mqtt_options, to_mqtt_qos, ReconnectConfig, ReconnectionDecision};
use super::message_handler::{route_mqtt_event, EventRoute, SubscribeTracker};
use crate::sync::lock;
use crate::transport::{
    BrokerTransport, ConnectOptions, EventHandler, Qos, SubscriptionToken, TransportError,
    TransportEvent,
};
use rumqttc::{AsyncClient, EventLoop, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Capacity of the rumqttc request queue
const REQUEST_CHANNEL_CAPACITY: usize = 64;
/// How long a graceful disconnect may take to flush
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// MQTT broker transport built on rumqttc
pub struct MqttTransport {
    client_id: String,
    reconnect_config: ReconnectConfig,
    client: Mutex<Option<AsyncClient>>,
    connected: Arc<AtomicBool>,
    tracker: Arc<Mutex<SubscribeTracker>>,
    subscribe_tx: Mutex<Option<mpsc::UnboundedSender<SubscribeRequest>>>,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    event_loop_handle: Mutex<Option<JoinHandle<()>>>,
    forwarder_handle: Mutex<Option<JoinHandle<()>>>,
}

/// A subscribe request waiting for room in the client queue
#[derive(Debug)]
struct SubscribeRequest {
    token: SubscriptionToken,
    topic: String,
    qos: QoS,
}

impl MqttTransport {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self::with_reconnect_config(client_id, ReconnectConfig::default())
    }

    pub fn with_reconnect_config(client_id: impl Into<String>, reconnect_config: ReconnectConfig) -> Self {
        Self {
            client_id: client_id.into(),
            reconnect_config,
            client: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            tracker: Arc::new(Mutex::new(SubscribeTracker::new())),
            subscribe_tx: Mutex::new(None),
            shutdown_tx: Mutex::new(None),
            event_loop_handle: Mutex::new(None),
            forwarder_handle: Mutex::new(None),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Stop a previous event loop, if any, without a graceful disconnect
    fn stop_event_loop(&self) {
        if let Some(shutdown_tx) = lock(&self.shutdown_tx).take() {
            let _ = shutdown_tx.send(true);
        }
        self.abort_tasks();
        lock(&self.client).take();
        lock(&self.subscribe_tx).take();
        self.connected.store(false, Ordering::SeqCst);
        lock(&self.tracker).reset();
    }

    fn abort_tasks(&self) {
        if let Some(handle) = lock(&self.event_loop_handle).take() {
            handle.abort();
        }
        if let Some(handle) = lock(&self.forwarder_handle).take() {
            handle.abort();
        }
    }

    fn current_client(&self) -> Result<AsyncClient, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        lock(&self.client).clone().ok_or(TransportError::NotConnected)
    }
}

impl BrokerTransport for MqttTransport {
    fn connect(
        &self,
        options: &ConnectOptions,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), TransportError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| TransportError::NoRuntime)?;

        if let Some(interface) = &options.network_interface {
            warn!(
                "Binding to network interface {} is not supported by this transport; using the default route",
                interface
            );
        }

        self.stop_event_loop();

        let mqtt_options = configure_mqtt_options(&self.client_id, options);
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (subscribe_tx, subscribe_rx) = mpsc::unbounded_channel();

        // the first CONNACK may be handled before spawn returns
        *lock(&self.client) = Some(client.clone());
        *lock(&self.subscribe_tx) = Some(subscribe_tx);
        *lock(&self.shutdown_tx) = Some(shutdown_tx);

        let forwarder = runtime.spawn(forward_subscriptions(client, subscribe_rx, self.tracker.clone()));
        *lock(&self.forwarder_handle) = Some(forwarder);

        let session = EventLoopSession {
            handler,
            connected: self.connected.clone(),
            tracker: self.tracker.clone(),
            reconnect_config: self.reconnect_config.clone(),
            broker_uri: options.broker_uri(),
        };
        let handle = runtime.spawn(session.run(event_loop, shutdown_rx));
        *lock(&self.event_loop_handle) = Some(handle);
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        // ends the forwarder once it has drained
        lock(&self.subscribe_tx).take();
        let client = lock(&self.client).take();
        let result = match client {
            Some(client) if self.is_connected() => client
                .try_disconnect()
                .map_err(|e| TransportError::DisconnectFailed(Box::new(e))),
            _ => Ok(()),
        };

        if let Some(shutdown_tx) = lock(&self.shutdown_tx).take() {
            let _ = shutdown_tx.send(true);
        }
        result
    }

    fn subscribe(&self, topic: &str, qos: Qos) -> Result<SubscriptionToken, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let subscribe_tx = lock(&self.subscribe_tx)
            .clone()
            .ok_or(TransportError::NotConnected)?;

        // held across the send so tokens reach the client queue in issue order
        let mut tracker = lock(&self.tracker);
        let token = tracker.issue();
        let request = SubscribeRequest {
            token,
            topic: topic.to_string(),
            qos: to_mqtt_qos(qos),
        };
        if subscribe_tx.send(request).is_err() {
            tracker.withdraw(token);
            return Err(TransportError::NotConnected);
        }
        Ok(token)
    }

    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: Qos,
        retain: bool,
    ) -> Result<(), TransportError> {
        let client = self.current_client()?;
        client
            .try_publish(topic, to_mqtt_qos(qos), retain, payload)
            .map_err(|e| TransportError::PublishFailed(Box::new(e)))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = lock(&self.shutdown_tx).take() {
            let _ = shutdown_tx.send(true);
        }
        self.abort_tasks();
    }
}

/// Move subscribe requests into the client queue, waiting for room
async fn forward_subscriptions(
    client: AsyncClient,
    mut requests: mpsc::UnboundedReceiver<SubscribeRequest>,
    tracker: Arc<Mutex<SubscribeTracker>>,
) {
    while let Some(request) = requests.recv().await {
        if let Err(e) = client.subscribe(request.topic.as_str(), request.qos).await {
            warn!("Failed to queue subscription to {}: {}", request.topic, e);
            lock(&tracker).withdraw(request.token);
        }
    }
    trace!("Subscription forwarder stopped");
}

/// State owned by one spawned event loop
struct EventLoopSession {
    handler: Arc<dyn EventHandler>,
    connected: Arc<AtomicBool>,
    tracker: Arc<Mutex<SubscribeTracker>>,
    reconnect_config: ReconnectConfig,
    broker_uri: String,
}

impl EventLoopSession {
    async fn run(self, mut event_loop: EventLoop, mut shutdown_rx: watch::Receiver<bool>) {
        info!("Starting MQTT event loop for {}", self.broker_uri);
        let mut reconnect_attempts = 0u32;
        let mut close_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                changed = shutdown_rx.changed(), if close_deadline.is_none() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        if self.connected.load(Ordering::SeqCst) {
                            // keep polling so the queued DISCONNECT is flushed
                            close_deadline = Some(Instant::now() + DISCONNECT_GRACE);
                            continue;
                        }
                        self.finish("disconnect requested");
                        break;
                    }
                }

                _ = tokio::time::sleep_until(close_deadline.unwrap_or_else(Instant::now)), if close_deadline.is_some() => {
                    warn!("Broker did not complete the disconnect in time; closing the session");
                    self.finish("disconnect timed out");
                    break;
                }

                event = event_loop.poll() => match event {
                    Ok(event) => {
                        if !self.process_event_route(route_mqtt_event(&event), &mut reconnect_attempts) {
                            break;
                        }
                    }
                    Err(e) => {
                        if close_deadline.is_some() {
                            self.finish("disconnect requested");
                            break;
                        }
                        if !self
                            .handle_event_loop_error(e, &mut reconnect_attempts, shutdown_rx.clone())
                            .await
                        {
                            break;
                        }
                    }
                },
            }
        }
        info!("MQTT event loop stopped for {}", self.broker_uri);
    }

    /// Returns false when the loop should stop
    fn process_event_route(&self, route: EventRoute, reconnect_attempts: &mut u32) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged { result_code } => {
                *reconnect_attempts = 0;
                self.connected.store(result_code == 0, Ordering::SeqCst);
                self.handler
                    .handle_event(TransportEvent::Connected { result_code });
                true
            }
            EventRoute::MessageReceived { topic, payload } => {
                trace!("Received MQTT message on topic: {}", topic);
                self.handler
                    .handle_event(TransportEvent::Message { topic, payload });
                true
            }
            EventRoute::SubscribeSent { pkid } => {
                if lock(&self.tracker).assign(pkid).is_none() {
                    debug!("SUBSCRIBE {} was not requested through this transport", pkid);
                }
                true
            }
            EventRoute::SubscriptionAcknowledged { pkid, granted_qos } => {
                let token = lock(&self.tracker).acknowledge(pkid);
                match token {
                    Some(token) => self
                        .handler
                        .handle_event(TransportEvent::Subscribed { token, granted_qos }),
                    None => debug!("Ignoring SUBACK for unknown packet {}", pkid),
                }
                true
            }
            EventRoute::Disconnected => {
                self.session_lost("broker closed the session");
                true
            }
            EventRoute::DisconnectSent => {
                self.finish("disconnect requested");
                false
            }
            EventRoute::InfrastructureEvent(event) => {
                trace!("MQTT event: {}", event);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    /// Returns false when the loop should stop
    async fn handle_event_loop_error(
        &self,
        error: rumqttc::ConnectionError,
        reconnect_attempts: &mut u32,
        shutdown_rx: watch::Receiver<bool>,
    ) -> bool {
        if self.connected.load(Ordering::SeqCst) {
            self.session_lost(&error.to_string());
        } else {
            debug!("MQTT connection attempt failed: {}", error);
        }

        let shutdown_requested = *shutdown_rx.borrow();
        match self
            .reconnect_config
            .should_attempt_reconnection(*reconnect_attempts, shutdown_requested)
        {
            ReconnectionDecision::Proceed { attempt, delay_ms } => {
                *reconnect_attempts = attempt;
                debug!("Reconnection attempt {} in {}ms", attempt, delay_ms);
                if interruptible_sleep(shutdown_rx, delay_ms).await {
                    true
                } else {
                    self.finish("disconnect requested");
                    false
                }
            }
            ReconnectionDecision::AbortShutdownRequested => {
                self.finish("disconnect requested");
                false
            }
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                error!(
                    "Giving up on {} after {} reconnection attempts",
                    self.broker_uri, reconnect_attempts
                );
                self.handler.handle_event(TransportEvent::Disconnected {
                    expected: false,
                    reason: "reconnection attempts exhausted".to_string(),
                });
                false
            }
        }
    }

    fn session_lost(&self, reason: &str) {
        if self.connected.swap(false, Ordering::SeqCst) {
            warn!("MQTT connection lost: {}", reason);
            lock(&self.tracker).connection_lost();
            self.handler.handle_event(TransportEvent::Disconnected {
                expected: false,
                reason: reason.to_string(),
            });
        }
    }

    fn finish(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        lock(&self.tracker).reset();
        self.handler.handle_event(TransportEvent::Disconnected {
            expected: true,
            reason: reason.to_string(),
        });
    }
}

/// Sleep unless shutdown is requested first.
/// Returns true if the sleep completed, false on shutdown.
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
