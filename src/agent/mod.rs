//! The agent: identity, plug registry and connection lifecycle
//!
//! An [`Agent`] owns one broker session and every plug created through it.
//! Transport events arrive on the transport's own context and are applied
//! through a weak handle, so dropping the agent tears the session down.

pub mod dispatch;
pub mod state;

pub use dispatch::DispatchOutcome;
pub use state::{ConnectionState, StateTrigger};

use crate::config::AgentConfig;
use crate::error::{AgentError, AgentResult, PlugKind};
use crate::plugs::{InputPlug, Listener, OutputPlug, Plug};
use crate::protocol::{resolve_input_topic, resolve_output_topic};
use crate::sync::{lock, read, write};
use crate::transport::{
    BrokerSession, ConnectOptions, EventHandler, MqttTransport, Qos, SubscriptionToken,
    TransportEvent,
};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A Tether agent
pub struct Agent {
    core: Arc<AgentCore>,
}

struct AgentCore {
    agent_type: String,
    agent_id: String,
    session: BrokerSession,
    /// Creation order is dispatch order
    inputs: RwLock<Vec<Arc<InputPlug>>>,
    outputs: RwLock<Vec<Arc<OutputPlug>>>,
    /// Serialises state changes with plug registration
    state: Mutex<ConnectionState>,
    broker_uri: Mutex<Option<String>>,
}

impl Agent {
    /// Create an agent over the given broker session.
    ///
    /// A random identifier is generated when `agent_id` is `None`.
    pub fn new(agent_type: &str, agent_id: Option<&str>, session: BrokerSession) -> AgentResult<Self> {
        if agent_type.is_empty() {
            return Err(AgentError::invalid_argument("agent type must not be empty"));
        }
        let agent_id = match agent_id {
            Some("") => return Err(AgentError::invalid_argument("agent id must not be empty")),
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };

        info!("Tether Agent with type {}, id {}", agent_type, agent_id);

        Ok(Self {
            core: Arc::new(AgentCore {
                agent_type: agent_type.to_string(),
                agent_id,
                session,
                inputs: RwLock::new(Vec::new()),
                outputs: RwLock::new(Vec::new()),
                state: Mutex::new(ConnectionState::Disconnected),
                broker_uri: Mutex::new(None),
            }),
        })
    }

    /// Create an agent over the MQTT transport from a configuration file
    pub fn from_config(config: &AgentConfig) -> AgentResult<Self> {
        config.validate()?;
        let agent_id = config
            .agent
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let client_id = format!(
            "{}-{}-{}",
            config.agent.agent_type,
            agent_id,
            &Uuid::new_v4().simple().to_string()[..8]
        );
        Self::new(
            &config.agent.agent_type,
            Some(&agent_id),
            Arc::new(MqttTransport::new(client_id)),
        )
    }

    pub fn agent_type(&self) -> &str {
        &self.core.agent_type
    }

    pub fn agent_id(&self) -> &str {
        &self.core.agent_id
    }

    /// Agent type, agent id and the broker URI of the last connect request
    pub fn description(&self) -> (String, String, Option<String>) {
        (
            self.core.agent_type.clone(),
            self.core.agent_id.clone(),
            lock(&self.core.broker_uri).clone(),
        )
    }

    pub fn connection_state(&self) -> ConnectionState {
        *lock(&self.core.state)
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state().is_connected()
    }

    /// Create an input plug.
    ///
    /// Without a non-empty `override_topic` the plug listens on `+/+/{name}`.
    /// When the agent is already connected the subscription is requested
    /// immediately.
    pub fn create_input(
        &self,
        name: &str,
        qos: Qos,
        override_topic: Option<&str>,
        listener: Option<Listener>,
    ) -> AgentResult<Arc<InputPlug>> {
        let topic = resolve_input_topic(name, override_topic)?;

        let state = lock(&self.core.state);
        let plug = {
            let mut inputs = write(&self.core.inputs);
            if inputs.iter().any(|p| p.name() == name) {
                return Err(AgentError::duplicate_name(PlugKind::Input, name));
            }
            let plug = Arc::new(InputPlug::new(
                name.to_string(),
                topic,
                qos,
                self.core.session.clone(),
            ));
            if let Some(listener) = listener {
                plug.add_listener(listener)?;
            }
            inputs.push(plug.clone());
            plug
        };
        debug!("Created input plug {} on topic {}", name, plug.topic());

        if state.is_connected() {
            plug.set_connected(true);
            plug.subscribe();
        }
        Ok(plug)
    }

    /// Create an output plug.
    ///
    /// Without a non-empty `override_topic` the plug publishes on
    /// `{agent_type}/{agent_id}/{name}`.
    pub fn create_output(
        &self,
        name: &str,
        qos: Qos,
        retain: bool,
        override_topic: Option<&str>,
    ) -> AgentResult<Arc<OutputPlug>> {
        let topic = resolve_output_topic(&self.core.agent_type, &self.core.agent_id, name, override_topic)?;

        let state = lock(&self.core.state);
        let mut outputs = write(&self.core.outputs);
        if outputs.iter().any(|p| p.name() == name) {
            return Err(AgentError::duplicate_name(PlugKind::Output, name));
        }
        let plug = Arc::new(OutputPlug::new(
            name.to_string(),
            topic,
            qos,
            retain,
            self.core.session.clone(),
        ));
        plug.set_connected(state.is_connected());
        outputs.push(plug.clone());
        debug!("Created output plug {} on topic {}", name, plug.topic());
        Ok(plug)
    }

    pub fn get_input(&self, name: &str) -> Option<Arc<InputPlug>> {
        read(&self.core.inputs).iter().find(|p| p.name() == name).cloned()
    }

    pub fn get_output(&self, name: &str) -> Option<Arc<OutputPlug>> {
        read(&self.core.outputs).iter().find(|p| p.name() == name).cloned()
    }

    /// All input plugs in creation order
    pub fn inputs(&self) -> Vec<Arc<InputPlug>> {
        read(&self.core.inputs).clone()
    }

    /// All output plugs in creation order
    pub fn outputs(&self) -> Vec<Arc<OutputPlug>> {
        read(&self.core.outputs).clone()
    }

    /// Issue an asynchronous connect request.
    ///
    /// Returns once the request is issued; the agent becomes connected when
    /// the broker accepts the session.
    pub fn connect(&self, options: &ConnectOptions) -> AgentResult<()> {
        let broker_uri = options.broker_uri();
        let _span = crate::lifecycle_span!(
            operation = "connect",
            agent_type = %self.core.agent_type,
            agent_id = %self.core.agent_id,
            broker = %broker_uri
        )
        .entered();

        {
            let mut state = lock(&self.core.state);
            *state = state.next(StateTrigger::ConnectRequested)?;
        }

        if let Some(credentials) = &options.credentials {
            debug!(
                "Setting username{}",
                if credentials.password.is_some() { " and password" } else { "" }
            );
        }
        match &options.network_interface {
            Some(interface) => info!("Connecting to MQTT at {} via {}", broker_uri, interface),
            None => info!("Connecting to MQTT at {}", broker_uri),
        }
        *lock(&self.core.broker_uri) = Some(broker_uri);

        let handler: Arc<dyn EventHandler> = Arc::new(EventSink {
            core: Arc::downgrade(&self.core),
        });
        if let Err(e) = self.core.session.connect(options, handler) {
            error!("Failed to connect to MQTT broker: {}", e);
            let mut state = lock(&self.core.state);
            *state = state.next(StateTrigger::ConnectFailed)?;
            return Err(e.into());
        }
        Ok(())
    }

    /// Issue a graceful disconnect request.
    ///
    /// Calling it while already disconnected or disconnecting has no effect
    /// on the agent's state.
    pub fn disconnect(&self) -> AgentResult<()> {
        let _span = crate::lifecycle_span!(operation = "disconnect", agent_id = %self.core.agent_id).entered();

        let previous = {
            let mut state = lock(&self.core.state);
            let previous = *state;
            *state = state.next(StateTrigger::DisconnectRequested)?;
            previous
        };

        match previous {
            ConnectionState::Disconnecting => Ok(()),
            _ => {
                info!("Disconnecting from MQTT broker");
                // also stops any reconnect attempts the transport is running
                self.core.session.disconnect().map_err(AgentError::from)
            }
        }
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        // plugs can keep the session alive, and a transport may still be
        // retrying after a lost connection
        if let Err(e) = self.core.session.disconnect() {
            warn!("Failed to disconnect while dropping agent: {}", e);
        }
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("agent_type", &self.core.agent_type)
            .field("agent_id", &self.core.agent_id)
            .field("state", &self.connection_state())
            .field("inputs", &read(&self.core.inputs).len())
            .field("outputs", &read(&self.core.outputs).len())
            .finish()
    }
}

impl AgentCore {
    fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected { result_code } => self.on_connected(result_code),
            TransportEvent::Disconnected { expected, reason } => self.on_disconnected(expected, &reason),
            TransportEvent::Subscribed { token, granted_qos } => self.on_subscribed(token, granted_qos),
            TransportEvent::Message { topic, payload } => {
                let inputs = read(&self.inputs).clone();
                dispatch::dispatch_message(&inputs, &topic, &payload);
            }
        }
    }

    fn on_connected(&self, result_code: u8) {
        let mut state = lock(&self.state);

        if result_code != 0 {
            warn!("Broker refused the connection with result code {}", result_code);
            if let Ok(next) = state.next(StateTrigger::ConnectRefused) {
                *state = next;
            }
            self.mark_plugs(false);
            return;
        }

        match state.next(StateTrigger::ConnectAccepted) {
            Ok(ConnectionState::Connected) => {}
            _ => {
                debug!("Ignoring connection acknowledgement while {}", *state);
                return;
            }
        }

        info!(
            "Connected to MQTT broker at {} with result code {}",
            lock(&self.broker_uri).as_deref().unwrap_or("unknown broker"),
            result_code
        );
        *state = ConnectionState::Connected;

        // every connect, including reconnects, re-requests each subscription
        for plug in read(&self.inputs).iter() {
            plug.set_connected(true);
            plug.subscribe();
        }
        for plug in read(&self.outputs).iter() {
            plug.set_connected(true);
        }
    }

    fn on_disconnected(&self, expected: bool, reason: &str) {
        let mut state = lock(&self.state);
        if expected {
            info!("Disconnected from MQTT broker");
        } else {
            info!("Disconnected from MQTT broker unexpectedly: {}", reason);
        }
        if let Ok(next) = state.next(StateTrigger::SessionClosed) {
            *state = next;
        }
        self.mark_plugs(false);
    }

    fn on_subscribed(&self, token: SubscriptionToken, granted_qos: Option<Qos>) {
        let inputs = read(&self.inputs).clone();
        match inputs.iter().find(|plug| plug.acknowledge(token, granted_qos)) {
            Some(plug) if granted_qos.is_some() => {
                debug!("Subscribed to topic {} (request {})", plug.topic(), token)
            }
            Some(plug) => warn!("Broker rejected subscription to topic {}", plug.topic()),
            None => debug!("Subscribe acknowledgement {} matches no input plug", token),
        }
    }

    fn mark_plugs(&self, connected: bool) {
        for plug in read(&self.inputs).iter() {
            plug.set_connected(connected);
        }
        for plug in read(&self.outputs).iter() {
            plug.set_connected(connected);
        }
    }
}

/// Event handler installed on the transport
struct EventSink {
    core: Weak<AgentCore>,
}

impl EventHandler for EventSink {
    fn handle_event(&self, event: TransportEvent) {
        match self.core.upgrade() {
            Some(core) => core.handle_event(event),
            None => debug!("Dropping transport event for a discarded agent"),
        }
    }
}
