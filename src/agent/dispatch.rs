//! Routing of inbound messages to input plugs

use crate::plugs::{InputPlug, Plug};
use crate::protocol::decode;
use std::sync::Arc;
use tracing::{debug, error, trace};

/// What happened to one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Payload was not valid MessagePack; nothing was delivered
    DecodeFailed,
    /// No input plug matched the topic
    Unmatched,
    /// Delivered to this many plugs
    Delivered { plugs: usize, listeners: usize },
}

/// Decode `payload` once and hand it to every input plug whose topic matches,
/// in plug creation order.
pub(crate) fn dispatch_message(inputs: &[Arc<InputPlug>], topic: &str, payload: &[u8]) -> DispatchOutcome {
    let matching: Vec<&Arc<InputPlug>> = inputs.iter().filter(|plug| plug.matches(topic)).collect();
    if matching.is_empty() {
        debug!("Received message on {} for no input plug", topic);
        return DispatchOutcome::Unmatched;
    }

    let decoded = match decode(payload) {
        Ok(decoded) => decoded,
        Err(e) => {
            error!("Could not decode message on {}: {}", topic, e);
            return DispatchOutcome::DecodeFailed;
        }
    };

    let mut listeners = 0;
    for plug in &matching {
        trace!("Delivering message on {} to input plug {}", topic, plug.name());
        listeners += plug.dispatch(topic, &decoded);
    }
    DispatchOutcome::Delivered {
        plugs: matching.len(),
        listeners,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugs::Listener;
    use crate::protocol::{encode, Payload};
    use crate::testing::MockTransport;
    use crate::transport::Qos;
    use std::sync::Mutex;

    fn input(name: &str, topic: &str) -> Arc<InputPlug> {
        Arc::new(InputPlug::new(
            name.to_string(),
            topic.to_string(),
            Qos::AtMostOnce,
            Arc::new(MockTransport::new()),
        ))
    }

    #[test]
    fn test_decode_failure_delivers_nothing() {
        let plug = input("temp", "+/+/temp");
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        plug.add_listener(Listener::new(move |_, _| *counter.lock().unwrap() += 1))
            .unwrap();

        let outcome = dispatch_message(&[plug], "a/b/temp", &[0xc1]);
        assert_eq!(outcome, DispatchOutcome::DecodeFailed);
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_unmatched_topic() {
        let plug = input("temp", "+/+/temp");
        let outcome = dispatch_message(&[plug], "a/b/humidity", &[0xc0]);
        assert_eq!(outcome, DispatchOutcome::Unmatched);
    }

    #[test]
    fn test_overlapping_plugs_in_creation_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let wide = input("temp", "+/+/temp");
        let narrow = input("robot-temp", "robot/#");

        for plug in [&wide, &narrow] {
            let order = order.clone();
            let name = plug.name().to_string();
            plug.add_listener(Listener::new(move |_, payload: &Payload| {
                order.lock().unwrap().push((name.clone(), payload.clone()));
            }))
            .unwrap();
        }

        let bytes = encode(&21.5f64).unwrap();
        let outcome = dispatch_message(&[wide, narrow], "robot/r1/temp", &bytes);

        assert_eq!(
            outcome,
            DispatchOutcome::Delivered {
                plugs: 2,
                listeners: 2
            }
        );
        assert_eq!(
            *order.lock().unwrap(),
            vec![
                ("temp".to_string(), Payload::Float(21.5)),
                ("robot-temp".to_string(), Payload::Float(21.5)),
            ]
        );
    }
}
