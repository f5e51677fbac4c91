//! Broker transport abstraction
//!
//! The agent core never talks to the network directly. It drives a
//! [`BrokerTransport`] through non-blocking calls and reacts to the
//! [`TransportEvent`]s the transport delivers from its own event-delivery
//! context through an installed [`EventHandler`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub mod mqtt;

/// Default MQTT port for plain TCP
pub const DEFAULT_PORT: u16 = 1883;
/// Default MQTT port for TLS
pub const DEFAULT_TLS_PORT: u16 = 8883;
/// Default keep-alive interval
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(60);
/// Username of a stock Tether broker
pub const DEFAULT_USERNAME: &str = "tether";
/// Password of a stock Tether broker
pub const DEFAULT_PASSWORD: &str = "sp_ceB0ss!";

/// Delivery guarantee for a subscription or publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Qos {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl Qos {
    pub fn level(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Qos {
    type Error = TransportError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Qos::AtMostOnce),
            1 => Ok(Qos::AtLeastOnce),
            2 => Ok(Qos::ExactlyOnce),
            other => Err(TransportError::InvalidQos(other)),
        }
    }
}

/// Correlates a subscribe request with its asynchronous acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionToken(pub u64);

impl fmt::Display for SubscriptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Broker credentials
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Everything needed to open a broker session
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub credentials: Option<Credentials>,
    pub keepalive: Duration,
    /// Local network interface to route the connection through
    pub network_interface: Option<String>,
    pub tls: bool,
}

impl ConnectOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            credentials: None,
            keepalive: DEFAULT_KEEPALIVE,
            network_interface: None,
            tls: false,
        }
    }

    /// Parse `mqtt://host[:port]` or `mqtts://host[:port]`.
    ///
    /// User info embedded in the URL becomes the session credentials.
    pub fn from_broker_url(broker_url: &str) -> Result<Self, TransportError> {
        let url = Url::parse(broker_url)
            .map_err(|_| TransportError::InvalidBrokerUrl(broker_url.to_string()))?;

        let tls = match url.scheme() {
            "mqtt" | "tcp" => false,
            "mqtts" | "ssl" => true,
            _ => return Err(TransportError::InvalidBrokerUrl(broker_url.to_string())),
        };
        let host = url
            .host_str()
            .ok_or_else(|| TransportError::InvalidBrokerUrl(broker_url.to_string()))?;
        let port = url
            .port()
            .unwrap_or(if tls { DEFAULT_TLS_PORT } else { DEFAULT_PORT });

        let mut options = Self::new(host, port);
        options.tls = tls;
        if !url.username().is_empty() {
            options.credentials = Some(Credentials {
                username: url.username().to_string(),
                password: url.password().map(str::to_string),
            });
        }
        Ok(options)
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password,
        });
        self
    }

    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn with_network_interface(mut self, interface: impl Into<String>) -> Self {
        self.network_interface = Some(interface.into());
        self
    }

    /// Broker URI for display; never contains credentials
    pub fn broker_uri(&self) -> String {
        let scheme = if self.tls { "mqtts" } else { "mqtt" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

/// Local broker with the stock Tether credentials
impl Default for ConnectOptions {
    fn default() -> Self {
        Self::new("127.0.0.1", DEFAULT_PORT)
            .with_credentials(DEFAULT_USERNAME, Some(DEFAULT_PASSWORD.to_string()))
    }
}

/// Events a transport delivers to the agent core
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Broker answered the connect request; zero means accepted
    Connected { result_code: u8 },
    /// Session ended, either on request (`expected`) or through a failure
    Disconnected { expected: bool, reason: String },
    /// Broker acknowledged a subscribe request
    Subscribed {
        token: SubscriptionToken,
        /// `None` when the broker rejected the subscription
        granted_qos: Option<Qos>,
    },
    /// Inbound publish
    Message { topic: String, payload: Vec<u8> },
}

/// Receiver of transport events. Called from the transport's event-delivery context.
pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: TransportEvent);
}

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Not connected to a broker")]
    NotConnected,
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid quality of service level: {0}")]
    InvalidQos(u8),
    #[error("No async runtime available to drive the connection")]
    NoRuntime,
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Disconnect failed")]
    DisconnectFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// A broker session.
///
/// Every call returns without waiting on the network: `connect` only issues the
/// request, and results arrive later as [`TransportEvent`]s.
pub trait BrokerTransport: Send + Sync {
    /// Issue an asynchronous connect request. Events go to `handler`.
    fn connect(
        &self,
        options: &ConnectOptions,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), TransportError>;

    /// Issue a graceful disconnect request
    fn disconnect(&self) -> Result<(), TransportError>;

    /// Request a subscription; the token is echoed in the matching
    /// [`TransportEvent::Subscribed`]
    fn subscribe(&self, topic: &str, qos: Qos) -> Result<SubscriptionToken, TransportError>;

    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: Qos,
        retain: bool,
    ) -> Result<(), TransportError>;

    /// Synchronous readiness query consulted before subscribing
    fn is_connected(&self) -> bool;
}

/// Shared handle to the broker session owned by an agent
pub type BrokerSession = Arc<dyn BrokerTransport>;

/// Type alias for the MQTT transport
pub type MqttTransport = mqtt::MqttTransport;
