//! Wire event definitions
//!
//! Every protocol exchange is a `Metadata` record naming an event tag,
//! immediately followed by one payload record. Payloads are plain Serde
//! structs; `ClientEvent` and `ServerEvent` are the closed variant sets
//! the codec decodes into, with unknown tags surfaced as an explicit
//! error instead of silent fallthrough.

use serde::{Deserialize, Serialize};

use crate::codec::WireEvent;
use crate::error::CodecError;
use crate::types::UserId;

/// Event tags carried in `Metadata.event_type`
pub mod tags {
    pub const JOIN: &str = "join";
    pub const LEAVE: &str = "leave";
    pub const DIRECT_MESSAGE: &str = "direct_message";
    pub const BROADCAST: &str = "broadcast";
    pub const JOIN_RESPONSE: &str = "join_response";
    pub const NEW_USER_JOINED: &str = "new_user_joined";
    pub const NEW_DIRECT_MESSAGE: &str = "new_direct_message";
    pub const NEW_BROADCAST_MESSAGE: &str = "new_broadcast_message";
    pub const DELIVERY_FAILED: &str = "delivery_failed";
    pub const PROTOCOL_ERROR: &str = "protocol_error";
}

/// Metadata record sent before every payload record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub event_type: String,
}

/// Public view of a chatroom member, as reported in `JoinResponse`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: UserId,
    pub nickname: String,
}

/// Join a chatroom under a nickname
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Join {
    pub nickname: String,
    pub chatroom: String,
}

/// Leave a chatroom
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leave {
    pub chatroom: String,
}

/// Private message addressed to one member of a chatroom
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectMessage {
    pub from_id: UserId,
    pub to_id: UserId,
    pub chatroom: String,
    pub text: String,
}

/// Message addressed to every other member of a chatroom
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Broadcast {
    pub chatroom: String,
    pub from_id: UserId,
    pub text: String,
}

/// Reply to `Join`: the members present before this join, plus the
/// id the server issued to the joiner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinResponse {
    pub members: Vec<UserInfo>,
    pub your_id: UserId,
}

/// Fired to prior members whenever a user joins their chatroom
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUserJoined {
    pub nickname: String,
}

/// A direct message arriving at its recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDirectMessage {
    pub from_id: UserId,
    pub text: String,
}

/// A broadcast arriving at a chatroom member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBroadcastMessage {
    pub from_id: UserId,
    pub text: String,
}

/// A direct message could not be delivered; sent back to the sender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryFailed {
    pub to_id: UserId,
    pub reason: String,
}

/// The peer sent something this server does not understand
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolError {
    pub message: String,
}

/// Client → Server events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Join(Join),
    Leave(Leave),
    DirectMessage(DirectMessage),
    Broadcast(Broadcast),
}

impl WireEvent for ClientEvent {
    fn tag(&self) -> &'static str {
        match self {
            Self::Join(_) => tags::JOIN,
            Self::Leave(_) => tags::LEAVE,
            Self::DirectMessage(_) => tags::DIRECT_MESSAGE,
            Self::Broadcast(_) => tags::BROADCAST,
        }
    }

    fn encode_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Self::Join(p) => serde_json::to_vec(p),
            Self::Leave(p) => serde_json::to_vec(p),
            Self::DirectMessage(p) => serde_json::to_vec(p),
            Self::Broadcast(p) => serde_json::to_vec(p),
        }
    }

    fn decode_payload(tag: &str, payload: &[u8]) -> Result<Self, CodecError> {
        match tag {
            tags::JOIN => Ok(Self::Join(serde_json::from_slice(payload)?)),
            tags::LEAVE => Ok(Self::Leave(serde_json::from_slice(payload)?)),
            tags::DIRECT_MESSAGE => Ok(Self::DirectMessage(serde_json::from_slice(payload)?)),
            tags::BROADCAST => Ok(Self::Broadcast(serde_json::from_slice(payload)?)),
            other => Err(CodecError::UnknownTag(other.to_string())),
        }
    }
}

/// Server → Client events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    JoinResponse(JoinResponse),
    NewUserJoined(NewUserJoined),
    NewDirectMessage(NewDirectMessage),
    NewBroadcastMessage(NewBroadcastMessage),
    DeliveryFailed(DeliveryFailed),
    ProtocolError(ProtocolError),
}

impl WireEvent for ServerEvent {
    fn tag(&self) -> &'static str {
        match self {
            Self::JoinResponse(_) => tags::JOIN_RESPONSE,
            Self::NewUserJoined(_) => tags::NEW_USER_JOINED,
            Self::NewDirectMessage(_) => tags::NEW_DIRECT_MESSAGE,
            Self::NewBroadcastMessage(_) => tags::NEW_BROADCAST_MESSAGE,
            Self::DeliveryFailed(_) => tags::DELIVERY_FAILED,
            Self::ProtocolError(_) => tags::PROTOCOL_ERROR,
        }
    }

    fn encode_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Self::JoinResponse(p) => serde_json::to_vec(p),
            Self::NewUserJoined(p) => serde_json::to_vec(p),
            Self::NewDirectMessage(p) => serde_json::to_vec(p),
            Self::NewBroadcastMessage(p) => serde_json::to_vec(p),
            Self::DeliveryFailed(p) => serde_json::to_vec(p),
            Self::ProtocolError(p) => serde_json::to_vec(p),
        }
    }

    fn decode_payload(tag: &str, payload: &[u8]) -> Result<Self, CodecError> {
        match tag {
            tags::JOIN_RESPONSE => Ok(Self::JoinResponse(serde_json::from_slice(payload)?)),
            tags::NEW_USER_JOINED => Ok(Self::NewUserJoined(serde_json::from_slice(payload)?)),
            tags::NEW_DIRECT_MESSAGE => {
                Ok(Self::NewDirectMessage(serde_json::from_slice(payload)?))
            }
            tags::NEW_BROADCAST_MESSAGE => {
                Ok(Self::NewBroadcastMessage(serde_json::from_slice(payload)?))
            }
            tags::DELIVERY_FAILED => Ok(Self::DeliveryFailed(serde_json::from_slice(payload)?)),
            tags::PROTOCOL_ERROR => Ok(Self::ProtocolError(serde_json::from_slice(payload)?)),
            other => Err(CodecError::UnknownTag(other.to_string())),
        }
    }
}
