//! MQTT implementation of the broker transport
//!
//! Split into pure and impure parts:
//!
//! - [`connection`] - option mapping and reconnection policy
//! - [`message_handler`] - routing of rumqttc events and subscribe bookkeeping
//! - [`client`] - the spawned event loop and the [`BrokerTransport`](crate::transport::BrokerTransport) impl
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tether_agent::transport::{ConnectOptions, MqttTransport};
//! use tether_agent::Agent;
//!
//! # tokio_test::block_on(async {
//! let agent = Agent::new("robot", None, Arc::new(MqttTransport::new("robot-1")))?;
//! agent.connect(&ConnectOptions::from_broker_url("mqtt://localhost:1883")?)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::MqttTransport;
pub use connection::{ReconnectConfig, ReconnectionDecision};
pub use message_handler::{EventRoute, SubscribeTracker};
