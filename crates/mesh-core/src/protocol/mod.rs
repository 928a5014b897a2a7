//! Client envelope protocol.
//!
//! Envelopes are JSON text frames exchanged between clients and the mesh.
//! Parsing validates at the boundary so the router works on typed values.

pub mod envelope;
pub mod payload;

pub use envelope::{
    Envelope, EnvelopeError, MAX_ENVELOPE_SIZE, PROTOCOL_VERSION, Source, Target, WireEnvelope,
};
pub use payload::{
    BroadcastPayload, EnvelopeType, ErrorPayload, EventPayload, HeartbeatPayload, MessagePayload,
    Payload, RegisterAckPayload, RegisterPayload, ResponsePayload, StreamChunkPayload,
    StreamEndPayload, WelcomePayload,
};
