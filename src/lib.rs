//! Tether agent
//!
//! A pub/sub agent that exposes named input and output plugs over an MQTT
//! broker and exchanges MessagePack payloads.
//!
//! # Overview
//!
//! - Output plugs publish on `{agent_type}/{agent_id}/{plug_name}`
//! - Input plugs subscribe to `+/+/{plug_name}` unless given an explicit topic
//! - Subscriptions are re-requested on every (re)connect
//! - Inbound payloads are decoded once and fanned out to every matching plug
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tether_agent::plugs::Listener;
//! use tether_agent::transport::{ConnectOptions, MqttTransport, Qos};
//! use tether_agent::Agent;
//!
//! # tokio_test::block_on(async {
//! let agent = Agent::new("thermostat", None, Arc::new(MqttTransport::new("thermostat-1")))?;
//!
//! agent.create_input(
//!     "temperature",
//!     Qos::AtMostOnce,
//!     None,
//!     Some(Listener::new(|topic, payload| {
//!         println!("{topic}: {:?}", payload.as_f64());
//!     })),
//! )?;
//! let setpoint = agent.create_output("setpoint", Qos::AtLeastOnce, true, None)?;
//!
//! agent.connect(&ConnectOptions::from_broker_url("mqtt://localhost:1883")?)?;
//!
//! // connect only issues the request; publishing needs a live session
//! while !agent.is_connected() {
//!     tokio::time::sleep(std::time::Duration::from_millis(50)).await;
//! }
//! setpoint.publish(&21.5)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod observability;
pub mod plugs;
pub mod protocol;
pub mod testing;
pub mod transport;

mod sync;

pub use agent::{Agent, ConnectionState};
pub use config::{AgentConfig, ConfigError};
pub use error::{AgentError, AgentResult, PlugKind};
pub use plugs::{InputPlug, Listener, OutputPlug, Plug};
pub use protocol::{CodecError, Payload};
pub use transport::{
    BrokerSession, BrokerTransport, ConnectOptions, Qos, SubscriptionToken, TransportError,
    TransportEvent,
};
