//! Pure routing of rumqttc events and subscribe acknowledgement bookkeeping

use super::connection::from_mqtt_qos;
use crate::transport::{Qos, SubscriptionToken};
use rumqttc::{ConnectReturnCode, Event, Outgoing, Packet, SubscribeReasonCode};
use std::collections::{HashMap, VecDeque};

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Broker answered the connect request
    ConnectionAcknowledged { result_code: u8 },
    /// Message received on a subscribed topic
    MessageReceived { topic: String, payload: Vec<u8> },
    /// Broker closed the session
    Disconnected,
    /// SUBSCRIBE left the client with this packet id
    SubscribeSent { pkid: u16 },
    /// Broker acknowledged a SUBSCRIBE
    SubscriptionAcknowledged {
        pkid: u16,
        granted_qos: Option<Qos>,
    },
    /// Our own DISCONNECT went out
    DisconnectSent,
    /// Pings, acks and other protocol traffic
    InfrastructureEvent(String),
    OutgoingEvent,
}

/// Route an MQTT event (pure function)
pub fn route_mqtt_event(event: &Event) -> EventRoute {
    match event {
        Event::Incoming(incoming) => match incoming {
            Packet::ConnAck(connack) => EventRoute::ConnectionAcknowledged {
                result_code: connect_result_code(&connack.code),
            },
            Packet::Publish(publish) => EventRoute::MessageReceived {
                topic: publish.topic.clone(),
                payload: publish.payload.to_vec(),
            },
            Packet::Disconnect => EventRoute::Disconnected,
            Packet::SubAck(suback) => EventRoute::SubscriptionAcknowledged {
                pkid: suback.pkid,
                granted_qos: suback.return_codes.first().and_then(granted_qos),
            },
            other => EventRoute::InfrastructureEvent(format!("{other:?}")),
        },
        Event::Outgoing(Outgoing::Subscribe(pkid)) => EventRoute::SubscribeSent { pkid: *pkid },
        Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
        Event::Outgoing(_) => EventRoute::OutgoingEvent,
    }
}

/// MQTT 3.1.1 CONNACK return code
fn connect_result_code(code: &ConnectReturnCode) -> u8 {
    match code {
        ConnectReturnCode::Success => 0,
        ConnectReturnCode::RefusedProtocolVersion => 1,
        ConnectReturnCode::BadClientId => 2,
        ConnectReturnCode::ServiceUnavailable => 3,
        ConnectReturnCode::BadUserNamePassword => 4,
        ConnectReturnCode::NotAuthorized => 5,
        #[allow(unreachable_patterns)]
        _ => 0x80,
    }
}

fn granted_qos(code: &SubscribeReasonCode) -> Option<Qos> {
    match code {
        SubscribeReasonCode::Success(qos) => Some(from_mqtt_qos(*qos)),
        SubscribeReasonCode::Failure => None,
    }
}

/// Correlates subscription tokens with MQTT packet ids.
///
/// The client queue hands out packet ids only when a SUBSCRIBE is actually
/// written, in request order. Tokens issued at request time are therefore
/// bound to packet ids as the outgoing SUBSCRIBE events are observed.
#[derive(Debug, Default)]
pub struct SubscribeTracker {
    next_token: u64,
    unsent: VecDeque<SubscriptionToken>,
    in_flight: HashMap<u16, SubscriptionToken>,
}

impl SubscribeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a token for a newly queued subscribe request
    pub fn issue(&mut self) -> SubscriptionToken {
        self.next_token += 1;
        let token = SubscriptionToken(self.next_token);
        self.unsent.push_back(token);
        token
    }

    /// Bind the oldest unsent request to the packet id it went out with
    pub fn assign(&mut self, pkid: u16) -> Option<SubscriptionToken> {
        let token = self.unsent.pop_front()?;
        self.in_flight.insert(pkid, token);
        Some(token)
    }

    /// Resolve the token for an acknowledged packet id
    pub fn acknowledge(&mut self, pkid: u16) -> Option<SubscriptionToken> {
        self.in_flight.remove(&pkid)
    }

    /// Forget a token whose request never reached the client queue
    pub fn withdraw(&mut self, token: SubscriptionToken) {
        self.unsent.retain(|t| *t != token);
    }

    /// The connection dropped but the client survives.
    ///
    /// SUBSCRIBEs already written will never be acknowledged. Queued ones stay
    /// in the client's request queue and go out after the reconnect, so they
    /// keep their place in `unsent`.
    pub fn connection_lost(&mut self) {
        self.in_flight.clear();
    }

    /// The client and its request queue are gone
    pub fn reset(&mut self) {
        self.unsent.clear();
        self.in_flight.clear();
    }

    pub fn pending(&self) -> usize {
        self.unsent.len() + self.in_flight.len()
    }
}
