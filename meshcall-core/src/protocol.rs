//! The signaling wire protocol.
//!
//! Every WebSocket text frame is a [Frame]: an event name, a JSON payload and an optional
//! acknowledgement id. Requests that carry an `ack` id are answered with an `ack` frame
//! carrying the same id and an [Ack] payload.
//!
//! Session descriptions and candidates are opaque to the server and travel as raw JSON.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use crate::PeerId;

/// Sends messages from a client towards the server.
pub type ClientSender = UnboundedSender<ClientMessage>;

/// Queues everything the server writes to one connected client, in wire order.
pub type Outbox = UnboundedSender<Outbound>;

/// A session description, passed through verbatim.
pub type SessionDescription = Value;

/// A connectivity candidate, passed through verbatim.
pub type IceCandidate = Value;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// The envelope of every message on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,
}

/// The payload of `host-room` and `join-room`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRequest {
    pub room_id: String,
    pub password: String,
}

/// The payload of `welcome`, `peer-joined` and `peer-left`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerNotice {
    pub peer_id: PeerId,
}

/// The payload of `webrtc-offer` and `webrtc-answer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptionSignal {
    pub to: PeerId,
    pub from: PeerId,
    pub sdp: SessionDescription,
}

/// The payload of `webrtc-ice`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSignal {
    pub to: PeerId,
    pub from: PeerId,
    pub candidate: IceCandidate,
}

/// The acknowledgement of a `host-room` or `join-room` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Only present on a successful join, in join order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peers: Option<Vec<PeerId>>,
}

/// Messages sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    HostRoom(RoomRequest),
    JoinRoom(RoomRequest),
    LeaveRoom,
    WebrtcOffer(DescriptionSignal),
    WebrtcAnswer(DescriptionSignal),
    WebrtcIce(CandidateSignal),
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Tells a freshly connected client its own peer id
    Welcome(PeerNotice),
    PeerJoined(PeerNotice),
    PeerLeft(PeerNotice),
    WebrtcOffer(DescriptionSignal),
    WebrtcAnswer(DescriptionSignal),
    WebrtcIce(CandidateSignal),
}

/// One entry of a connection's [Outbox].
///
/// Acknowledgements share the queue with notifications, so a client reads the answer to
/// its request before anything that happened after the request was applied.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(ServerMessage),
    /// The answer to the request carrying this ack id
    Ack(u64, Ack),
}

/// A relayed negotiation message, as it travels between two peers.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Offer(DescriptionSignal),
    Answer(DescriptionSignal),
    Ice(CandidateSignal),
}

impl Frame {
    pub const ACK_EVENT: &'static str = "ack";

    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_text(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Creates the acknowledgement frame for the request with the given id.
    pub fn ack(id: u64, ack: &Ack) -> Self {
        Self {
            event: Self::ACK_EVENT.to_string(),
            data: serde_json::to_value(ack).unwrap_or_default(),
            ack: Some(id),
        }
    }

    /// Returns the acknowledgement carried by this frame, if it is one.
    pub fn into_ack(self) -> Option<(u64, Ack)> {
        if self.event != Self::ACK_EVENT {
            return None;
        }

        let id = self.ack?;
        serde_json::from_value(self.data).ok().map(|ack| (id, ack))
    }

    fn encode<T: Serialize>(message: &T, ack: Option<u64>) -> Self {
        let mut object = match serde_json::to_value(message) {
            Ok(Value::Object(object)) => object,
            _ => Map::new(),
        };

        let event = match object.remove("event") {
            Some(Value::String(event)) => event,
            _ => String::new(),
        };

        Self {
            event,
            data: object.remove("data").unwrap_or_default(),
            ack,
        }
    }

    fn decode<T: DeserializeOwned>(self) -> Result<T, ProtocolError> {
        let mut object = Map::new();
        object.insert("event".to_string(), Value::String(self.event));

        // Unit messages are only accepted without content
        if !self.data.is_null() {
            object.insert("data".to_string(), self.data);
        }

        Ok(serde_json::from_value(Value::Object(object))?)
    }
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            ok: true,
            error: None,
            peers: None,
        }
    }

    pub fn with_peers(peers: Vec<PeerId>) -> Self {
        Self {
            ok: true,
            error: None,
            peers: Some(peers),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
            peers: None,
        }
    }
}

impl ClientMessage {
    pub fn into_frame(self, ack: Option<u64>) -> Frame {
        Frame::encode(&self, ack)
    }

    pub fn from_frame(frame: Frame) -> Result<Self, ProtocolError> {
        frame.decode()
    }

    /// Returns the negotiation part of this message, if any
    pub fn into_signal(self) -> Option<Signal> {
        match self {
            Self::WebrtcOffer(x) => Some(Signal::Offer(x)),
            Self::WebrtcAnswer(x) => Some(Signal::Answer(x)),
            Self::WebrtcIce(x) => Some(Signal::Ice(x)),
            _ => None,
        }
    }
}

impl ServerMessage {
    pub fn into_frame(self) -> Frame {
        Frame::encode(&self, None)
    }

    pub fn from_frame(frame: Frame) -> Result<Self, ProtocolError> {
        frame.decode()
    }
}

impl Outbound {
    pub fn into_frame(self) -> Frame {
        match self {
            Self::Message(message) => message.into_frame(),
            Self::Ack(id, ack) => Frame::ack(id, &ack),
        }
    }
}

impl From<ServerMessage> for Outbound {
    fn from(value: ServerMessage) -> Self {
        Self::Message(value)
    }
}

impl Signal {
    pub fn to(&self) -> &PeerId {
        match self {
            Self::Offer(x) | Self::Answer(x) => &x.to,
            Self::Ice(x) => &x.to,
        }
    }

    pub fn from(&self) -> &PeerId {
        match self {
            Self::Offer(x) | Self::Answer(x) => &x.from,
            Self::Ice(x) => &x.from,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::Ice(_) => "ice",
        }
    }
}

impl From<Signal> for ServerMessage {
    fn from(value: Signal) -> Self {
        match value {
            Signal::Offer(x) => Self::WebrtcOffer(x),
            Signal::Answer(x) => Self::WebrtcAnswer(x),
            Signal::Ice(x) => Self::WebrtcIce(x),
        }
    }
}

impl From<Signal> for ClientMessage {
    fn from(value: Signal) -> Self {
        match value {
            Signal::Offer(x) => Self::WebrtcOffer(x),
            Signal::Answer(x) => Self::WebrtcAnswer(x),
            Signal::Ice(x) => Self::WebrtcIce(x),
        }
    }
}
