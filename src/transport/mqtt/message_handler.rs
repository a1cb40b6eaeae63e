//! Pure mapping from rumqttc events to protocol events

use crate::transport::ProtocolEvent;
use rumqttc::{ConnectReturnCode, Event, Incoming, Outgoing, SubscribeReasonCode};

/// Routing decision for one rumqttc event
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Forward to the dispatcher
    Forward(ProtocolEvent),
    /// Our own DISCONNECT went out; the event loop should stop
    LocalDisconnect,
    /// Pings, outgoing packets and other bookkeeping
    Ignore,
}

/// Numeric CONNACK return code as sent on the wire
pub fn return_code_value(code: ConnectReturnCode) -> u8 {
    match code {
        ConnectReturnCode::Success => 0,
        ConnectReturnCode::RefusedProtocolVersion => 1,
        ConnectReturnCode::BadClientId => 2,
        ConnectReturnCode::ServiceUnavailable => 3,
        ConnectReturnCode::BadUserNamePassword => 4,
        ConnectReturnCode::NotAuthorized => 5,
    }
}

/// Route a rumqttc event (pure function)
pub fn route_event(event: &Event) -> EventRoute {
    match event {
        Event::Incoming(incoming) => match incoming {
            Incoming::ConnAck(ack) => EventRoute::Forward(ProtocolEvent::ConnAck {
                code: return_code_value(ack.code),
                session_present: ack.session_present,
            }),
            Incoming::Publish(publish) => EventRoute::Forward(ProtocolEvent::Message {
                topic: publish.topic.clone(),
                payload: publish.payload.clone(),
                qos: publish.qos,
                retain: publish.retain,
            }),
            Incoming::PubAck(ack) => {
                EventRoute::Forward(ProtocolEvent::PublishAck { pkid: ack.pkid })
            }
            Incoming::PubComp(comp) => {
                EventRoute::Forward(ProtocolEvent::PublishAck { pkid: comp.pkid })
            }
            Incoming::SubAck(suback) => EventRoute::Forward(ProtocolEvent::SubscribeAck {
                pkid: suback.pkid,
                granted: suback
                    .return_codes
                    .iter()
                    .map(|code| match code {
                        SubscribeReasonCode::Success(qos) => Some(*qos),
                        SubscribeReasonCode::Failure => None,
                    })
                    .collect(),
            }),
            Incoming::Disconnect => EventRoute::Forward(ProtocolEvent::ConnectionLost {
                reason: "Broker sent DISCONNECT".to_string(),
            }),
            _ => EventRoute::Ignore,
        },
        Event::Outgoing(Outgoing::Disconnect) => EventRoute::LocalDisconnect,
        Event::Outgoing(_) => EventRoute::Ignore,
    }
}
