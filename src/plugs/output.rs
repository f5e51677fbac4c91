//! Output plugs: encode and publish on a fixed topic

use super::Plug;
use crate::error::{AgentError, AgentResult};
use crate::protocol::encode;
use crate::transport::{BrokerSession, Qos};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// A named publication point
pub struct OutputPlug {
    name: String,
    topic: String,
    qos: Qos,
    retain: bool,
    connected: AtomicBool,
    session: BrokerSession,
}

impl OutputPlug {
    pub(crate) fn new(
        name: String,
        topic: String,
        qos: Qos,
        retain: bool,
        session: BrokerSession,
    ) -> Self {
        Self {
            name,
            topic,
            qos,
            retain,
            connected: AtomicBool::new(false),
            session,
        }
    }

    pub fn retain(&self) -> bool {
        self.retain
    }

    /// Encode `value` as MessagePack and publish it. `&()` publishes nil.
    pub fn publish<T: Serialize + ?Sized>(&self, value: &T) -> AgentResult<()> {
        let payload = encode(value)?;
        self.publish_raw(payload)
    }

    /// Publish pre-encoded bytes as-is
    pub fn publish_raw(&self, payload: Vec<u8>) -> AgentResult<()> {
        debug!(
            "Publishing {} bytes on {} (plug {})",
            payload.len(),
            self.topic,
            self.name
        );
        self.session
            .publish(&self.topic, payload, self.qos, self.retain)
            .map_err(|e| {
                warn!("Failed to publish on {}: {}", self.topic, e);
                AgentError::Transport(e)
            })
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl Plug for OutputPlug {
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

impl std::fmt::Debug for OutputPlug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputPlug")
            .field("name", &self.name)
            .field("topic", &self.topic)
            .field("qos", &self.qos)
            .field("retain", &self.retain)
            .field("connected", &self.is_connected())
            .finish()
    }
}
