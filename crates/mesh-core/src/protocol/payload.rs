//! Payload shapes, one per envelope type.

use crate::error::ErrorKind;
use crate::id::{NodeId, SessionId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// The closed set of envelope types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvelopeType {
    Register,
    RegisterAck,
    Heartbeat,
    HeartbeatAck,
    Message,
    Response,
    StreamChunk,
    StreamEnd,
    Broadcast,
    Event,
    Error,
    Welcome,
}

impl EnvelopeType {
    pub const ALL: [EnvelopeType; 12] = [
        Self::Register,
        Self::RegisterAck,
        Self::Heartbeat,
        Self::HeartbeatAck,
        Self::Message,
        Self::Response,
        Self::StreamChunk,
        Self::StreamEnd,
        Self::Broadcast,
        Self::Event,
        Self::Error,
        Self::Welcome,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Register => "REGISTER",
            Self::RegisterAck => "REGISTER_ACK",
            Self::Heartbeat => "HEARTBEAT",
            Self::HeartbeatAck => "HEARTBEAT_ACK",
            Self::Message => "MESSAGE",
            Self::Response => "RESPONSE",
            Self::StreamChunk => "STREAM_CHUNK",
            Self::StreamEnd => "STREAM_END",
            Self::Broadcast => "BROADCAST",
            Self::Event => "EVENT",
            Self::Error => "ERROR",
            Self::Welcome => "WELCOME",
        }
    }

    /// Types only the server may emit.
    pub fn is_server_only(&self) -> bool {
        matches!(self, Self::RegisterAck | Self::HeartbeatAck | Self::Welcome)
    }
}

impl fmt::Display for EnvelopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvelopeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    pub token: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAckPayload {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatPayload {
    /// Sender's clock, echoed back for RTT measurement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<u64>,
}

/// A message for another client, or a completion request when untargeted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePayload {
    pub content: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunkPayload {
    pub content: Value,
    pub index: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEndPayload {
    /// Number of chunks that preceded this marker
    #[serde(default)]
    pub chunks: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastPayload {
    pub content: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub error_message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomePayload {
    pub node_id: NodeId,
    pub is_main_node: bool,
    pub version: u32,
    pub heartbeat_interval_ms: u64,
}

/// Typed payload. The variant decides the envelope's `type`.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Register(RegisterPayload),
    RegisterAck(RegisterAckPayload),
    Heartbeat(HeartbeatPayload),
    HeartbeatAck(HeartbeatPayload),
    Message(MessagePayload),
    Response(ResponsePayload),
    StreamChunk(StreamChunkPayload),
    StreamEnd(StreamEndPayload),
    Broadcast(BroadcastPayload),
    Event(EventPayload),
    Error(ErrorPayload),
    Welcome(WelcomePayload),
}

impl Payload {
    pub fn envelope_type(&self) -> EnvelopeType {
        match self {
            Self::Register(_) => EnvelopeType::Register,
            Self::RegisterAck(_) => EnvelopeType::RegisterAck,
            Self::Heartbeat(_) => EnvelopeType::Heartbeat,
            Self::HeartbeatAck(_) => EnvelopeType::HeartbeatAck,
            Self::Message(_) => EnvelopeType::Message,
            Self::Response(_) => EnvelopeType::Response,
            Self::StreamChunk(_) => EnvelopeType::StreamChunk,
            Self::StreamEnd(_) => EnvelopeType::StreamEnd,
            Self::Broadcast(_) => EnvelopeType::Broadcast,
            Self::Event(_) => EnvelopeType::Event,
            Self::Error(_) => EnvelopeType::Error,
            Self::Welcome(_) => EnvelopeType::Welcome,
        }
    }

    /// Parse the JSON payload for a given type. `null` reads as `{}`.
    pub fn from_value(ty: EnvelopeType, value: Value) -> Result<Self, serde_json::Error> {
        let value = match value {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        Ok(match ty {
            EnvelopeType::Register => Self::Register(parse(value)?),
            EnvelopeType::RegisterAck => Self::RegisterAck(parse(value)?),
            EnvelopeType::Heartbeat => Self::Heartbeat(parse(value)?),
            EnvelopeType::HeartbeatAck => Self::HeartbeatAck(parse(value)?),
            EnvelopeType::Message => Self::Message(parse(value)?),
            EnvelopeType::Response => Self::Response(parse(value)?),
            EnvelopeType::StreamChunk => Self::StreamChunk(parse(value)?),
            EnvelopeType::StreamEnd => Self::StreamEnd(parse(value)?),
            EnvelopeType::Broadcast => Self::Broadcast(parse(value)?),
            EnvelopeType::Event => Self::Event(parse(value)?),
            EnvelopeType::Error => Self::Error(parse(value)?),
            EnvelopeType::Welcome => Self::Welcome(parse(value)?),
        })
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Register(p) => serde_json::to_value(p),
            Self::RegisterAck(p) => serde_json::to_value(p),
            Self::Heartbeat(p) | Self::HeartbeatAck(p) => serde_json::to_value(p),
            Self::Message(p) => serde_json::to_value(p),
            Self::Response(p) => serde_json::to_value(p),
            Self::StreamChunk(p) => serde_json::to_value(p),
            Self::StreamEnd(p) => serde_json::to_value(p),
            Self::Broadcast(p) => serde_json::to_value(p),
            Self::Event(p) => serde_json::to_value(p),
            Self::Error(p) => serde_json::to_value(p),
            Self::Welcome(p) => serde_json::to_value(p),
        }
    }
}

fn parse<T: DeserializeOwned>(value: Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_names() {
        for ty in EnvelopeType::ALL {
            let json = serde_json::to_string(&ty).unwrap();
            assert_eq!(json, format!("\"{}\"", ty.as_str()));
            assert_eq!(ty.as_str().parse::<EnvelopeType>(), Ok(ty));
        }
        assert!("PONG".parse::<EnvelopeType>().is_err());
    }

    #[test]
    fn test_null_payload_reads_as_empty() {
        let payload = Payload::from_value(EnvelopeType::Heartbeat, Value::Null).unwrap();
        assert_eq!(payload, Payload::Heartbeat(HeartbeatPayload::default()));
    }

    #[test]
    fn test_missing_required_field_rejected() {
        assert!(Payload::from_value(EnvelopeType::Message, json!({"provider": "x"})).is_err());
        assert!(Payload::from_value(EnvelopeType::Register, json!({})).is_err());
    }

    #[test]
    fn test_error_payload_wire_shape() {
        let payload = Payload::Error(ErrorPayload {
            kind: ErrorKind::UnknownTarget,
            error_message: "no such client".into(),
        });
        assert_eq!(
            payload.to_value().unwrap(),
            json!({"kind": "unknown_target", "errorMessage": "no such client"})
        );
    }

    #[test]
    fn test_server_only_types() {
        assert!(EnvelopeType::Welcome.is_server_only());
        assert!(EnvelopeType::RegisterAck.is_server_only());
        assert!(!EnvelopeType::Message.is_server_only());
    }
}
