//! Named input and output endpoints of an agent
//!
//! Plugs are created through [`Agent::create_input`](crate::Agent::create_input)
//! and [`Agent::create_output`](crate::Agent::create_output). The agent owns
//! them; callers get shared handles.

pub mod input;
pub mod output;

pub use input::InputPlug;
pub use output::OutputPlug;

use crate::protocol::Payload;
use crate::transport::Qos;
use std::fmt;
use std::sync::Arc;

/// Properties common to both plug kinds
pub trait Plug {
    fn name(&self) -> &str;
    fn topic(&self) -> &str;
    fn qos(&self) -> Qos;
    /// Whether the owning agent's session is currently connected
    fn is_connected(&self) -> bool;
}

/// Callback invoked with the concrete topic and decoded payload of each message.
///
/// Listener identity is the identity of the wrapped callback: clones of one
/// `Listener` are the same listener, separately constructed ones are not.
#[derive(Clone)]
pub struct Listener(Arc<dyn Fn(&str, &Payload) + Send + Sync>);

impl Listener {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&str, &Payload) + Send + Sync + 'static,
    {
        Self(Arc::new(callback))
    }

    pub fn same_as(&self, other: &Listener) -> bool {
        Arc::as_ptr(&self.0) as *const () == Arc::as_ptr(&other.0) as *const ()
    }

    pub(crate) fn call(&self, topic: &str, payload: &Payload) {
        (self.0)(topic, payload)
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl Eq for Listener {}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({:p})", Arc::as_ptr(&self.0) as *const ())
    }
}
