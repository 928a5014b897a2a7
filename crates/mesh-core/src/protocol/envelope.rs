//! Client envelope: the unit of exchange between clients and the mesh.
//!
//! Two layers:
//! - [`WireEnvelope`] mirrors the JSON exactly (`type` is a string, `payload`
//!   is free-form). Anything JSON-shaped parses into it.
//! - [`Envelope`] is the validated form: the type is closed, the payload is
//!   typed, ids are checked and at most one target is set. The router only
//!   ever sees this one.
//!
//! Wire format (camelCase):
//! `{"messageId":"..","version":1,"type":"MESSAGE","source":{..},"target":{..},
//!   "timestamp":0,"priority":0,"payload":{..}}`

use super::payload::{EnvelopeType, Payload};
use crate::id::{ClientId, IdError, SessionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Current envelope protocol version. A mismatch is logged, not rejected.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest envelope accepted from a client, in bytes.
pub const MAX_ENVELOPE_SIZE: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("envelope exceeds {MAX_ENVELOPE_SIZE} bytes")]
    TooLarge,
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown envelope type: {0}")]
    UnknownType(String),
    #[error("invalid {ty} payload: {source}")]
    InvalidPayload {
        ty: EnvelopeType,
        source: serde_json::Error,
    },
    #[error("invalid {field}: {source}")]
    InvalidId {
        field: &'static str,
        source: IdError,
    },
    #[error("missing messageId")]
    MissingMessageId,
    #[error("target must set at most one of clientId, group, all")]
    ConflictingTargets,
}

// ==================== Wire form ====================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEnvelope {
    #[serde(default)]
    pub message_id: String,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub source: WireSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<WireTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

fn default_version() -> u32 {
    PROTOCOL_VERSION
}

// ==================== Typed form ====================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Source {
    pub client_id: Option<ClientId>,
    pub session_id: Option<SessionId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Client(ClientId),
    Group(String),
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub message_id: String,
    pub version: u32,
    pub source: Source,
    pub target: Option<Target>,
    pub correlation_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub timestamp: u64,
    /// Higher is more urgent
    pub priority: i32,
    pub payload: Payload,
    pub metadata: Option<Value>,
}

impl Envelope {
    /// A fresh envelope with a new message id.
    pub fn new(payload: Payload, now_ms: u64) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            version: PROTOCOL_VERSION,
            source: Source::default(),
            target: None,
            correlation_id: None,
            in_reply_to: None,
            timestamp: now_ms,
            priority: 0,
            payload,
            metadata: None,
        }
    }

    pub fn kind(&self) -> EnvelopeType {
        self.payload.envelope_type()
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.source = source;
        self
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_in_reply_to(mut self, message_id: Option<String>) -> Self {
        self.in_reply_to = message_id;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// The id a reply should reference: the correlation id if the sender set
    /// one, else the message id.
    pub fn reply_reference(&self) -> String {
        self.correlation_id
            .clone()
            .unwrap_or_else(|| self.message_id.clone())
    }

    /// Parse and validate a JSON envelope.
    pub fn from_json(raw: &str) -> Result<Self, EnvelopeError> {
        if raw.len() > MAX_ENVELOPE_SIZE {
            return Err(EnvelopeError::TooLarge);
        }
        let wire: WireEnvelope = serde_json::from_str(raw)?;
        Self::try_from(wire)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Best-effort extraction of `messageId` from input that failed to parse.
    pub fn peek_message_id(raw: &str) -> Option<String> {
        if raw.len() > MAX_ENVELOPE_SIZE {
            return None;
        }
        let value: Value = serde_json::from_str(raw).ok()?;
        value
            .get("messageId")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

fn parse_id<T>(field: &'static str, value: Option<String>) -> Result<Option<T>, EnvelopeError>
where
    T: TryFrom<String, Error = IdError>,
{
    value
        .map(|s| T::try_from(s).map_err(|source| EnvelopeError::InvalidId { field, source }))
        .transpose()
}

impl TryFrom<WireEnvelope> for Envelope {
    type Error = EnvelopeError;

    fn try_from(wire: WireEnvelope) -> Result<Self, Self::Error> {
        let ty: EnvelopeType = wire
            .msg_type
            .parse()
            .map_err(EnvelopeError::UnknownType)?;

        if wire.message_id.trim().is_empty() {
            return Err(EnvelopeError::MissingMessageId);
        }

        let source = Source {
            client_id: parse_id("source.clientId", wire.source.client_id)?,
            session_id: parse_id("source.sessionId", wire.source.session_id)?,
        };

        let target = match wire.target {
            None => None,
            Some(t) => {
                let all = t.all.unwrap_or(false);
                let set = [t.client_id.is_some(), t.group.is_some(), all]
                    .iter()
                    .filter(|b| **b)
                    .count();
                if set > 1 {
                    return Err(EnvelopeError::ConflictingTargets);
                }
                if let Some(client) = parse_id("target.clientId", t.client_id)? {
                    Some(Target::Client(client))
                } else if let Some(group) = t.group {
                    Some(Target::Group(group))
                } else if all {
                    Some(Target::All)
                } else {
                    None
                }
            }
        };

        let payload = Payload::from_value(ty, wire.payload)
            .map_err(|source| EnvelopeError::InvalidPayload { ty, source })?;

        Ok(Self {
            message_id: wire.message_id,
            version: wire.version,
            source,
            target,
            correlation_id: wire.correlation_id,
            in_reply_to: wire.in_reply_to,
            timestamp: wire.timestamp,
            priority: wire.priority,
            payload,
            metadata: wire.metadata,
        })
    }
}

impl TryFrom<&Envelope> for WireEnvelope {
    type Error = serde_json::Error;

    fn try_from(envelope: &Envelope) -> Result<Self, Self::Error> {
        let target = envelope.target.as_ref().map(|t| match t {
            Target::Client(id) => WireTarget {
                client_id: Some(id.to_string()),
                ..Default::default()
            },
            Target::Group(group) => WireTarget {
                group: Some(group.clone()),
                ..Default::default()
            },
            Target::All => WireTarget {
                all: Some(true),
                ..Default::default()
            },
        });

        Ok(Self {
            message_id: envelope.message_id.clone(),
            version: envelope.version,
            msg_type: envelope.kind().as_str().to_string(),
            source: WireSource {
                client_id: envelope.source.client_id.as_ref().map(|c| c.to_string()),
                session_id: envelope.source.session_id.as_ref().map(|s| s.to_string()),
            },
            target,
            correlation_id: envelope.correlation_id.clone(),
            in_reply_to: envelope.in_reply_to.clone(),
            timestamp: envelope.timestamp,
            priority: envelope.priority,
            payload: envelope.payload.to_value()?,
            metadata: envelope.metadata.clone(),
        })
    }
}

// Persisted pending messages store the wire form.
impl Serialize for Envelope {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireEnvelope::try_from(self)
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireEnvelope::deserialize(deserializer)?;
        Envelope::try_from(wire).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::payload::{MessagePayload, RegisterPayload};
    use serde_json::json;

    fn raw(value: Value) -> String {
        value.to_string()
    }

    // ==================== Parsing ====================

    #[test]
    fn test_parse_message_to_client() {
        let envelope = Envelope::from_json(&raw(json!({
            "messageId": "m1",
            "type": "MESSAGE",
            "source": {"clientId": "c1", "sessionId": "s1"},
            "target": {"clientId": "c2"},
            "correlationId": "corr",
            "timestamp": 5,
            "priority": 2,
            "payload": {"content": "hi"}
        })))
        .unwrap();

        assert_eq!(envelope.kind(), EnvelopeType::Message);
        assert_eq!(envelope.version, PROTOCOL_VERSION);
        assert_eq!(envelope.target, Some(Target::Client("c2".parse().unwrap())));
        assert_eq!(envelope.source.session_id.as_ref().unwrap().as_str(), "s1");
        assert_eq!(envelope.priority, 2);
        assert_eq!(envelope.reply_reference(), "corr");
        match envelope.payload {
            Payload::Message(MessagePayload { content, .. }) => assert_eq!(content, json!("hi")),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = Envelope::from_json(&raw(json!({"messageId": "m1", "type": "PONG"})));
        assert!(matches!(err, Err(EnvelopeError::UnknownType(t)) if t == "PONG"));
    }

    #[test]
    fn test_missing_message_id_rejected() {
        let err = Envelope::from_json(&raw(json!({"type": "HEARTBEAT"})));
        assert!(matches!(err, Err(EnvelopeError::MissingMessageId)));
    }

    #[test]
    fn test_conflicting_targets_rejected() {
        let err = Envelope::from_json(&raw(json!({
            "messageId": "m1",
            "type": "MESSAGE",
            "target": {"clientId": "c2", "all": true},
            "payload": {"content": 1}
        })));
        assert!(matches!(err, Err(EnvelopeError::ConflictingTargets)));
    }

    #[test]
    fn test_all_false_is_no_target() {
        let envelope = Envelope::from_json(&raw(json!({
            "messageId": "m1",
            "type": "MESSAGE",
            "target": {"all": false},
            "payload": {"content": 1}
        })))
        .unwrap();
        assert_eq!(envelope.target, None);
    }

    #[test]
    fn test_invalid_payload_rejected() {
        let err = Envelope::from_json(&raw(json!({
            "messageId": "m1",
            "type": "REGISTER",
            "payload": {"capabilities": []}
        })));
        assert!(matches!(
            err,
            Err(EnvelopeError::InvalidPayload {
                ty: EnvelopeType::Register,
                ..
            })
        ));
    }

    #[test]
    fn test_invalid_client_id_rejected() {
        let err = Envelope::from_json(&raw(json!({
            "messageId": "m1",
            "type": "HEARTBEAT",
            "source": {"clientId": ""}
        })));
        assert!(matches!(err, Err(EnvelopeError::InvalidId { field: "source.clientId", .. })));
    }

    #[test]
    fn test_not_json_rejected() {
        assert!(matches!(Envelope::from_json("hello"), Err(EnvelopeError::Json(_))));
    }

    // ==================== Serialization ====================

    #[test]
    fn test_serialized_shape_is_camel_case() {
        let envelope = Envelope::new(
            Payload::Register(RegisterPayload {
                token: "t".into(),
                capabilities: vec!["chat".into()],
            }),
            42,
        )
        .with_target(Target::All);

        let value: Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "REGISTER");
        assert_eq!(value["target"], json!({"all": true}));
        assert_eq!(value["timestamp"], 42);
        assert!(value["messageId"].as_str().is_some());
        assert_eq!(value["payload"]["capabilities"], json!(["chat"]));
    }

    #[test]
    fn test_peek_message_id() {
        assert_eq!(
            Envelope::peek_message_id(r#"{"messageId":"abc","type":"NOPE"}"#),
            Some("abc".to_string())
        );
        assert_eq!(Envelope::peek_message_id("not json"), None);
    }
}
