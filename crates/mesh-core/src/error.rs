//! Error taxonomy for the mesh core.
//!
//! None of these are fatal. Protocol-level errors become `ERROR` envelopes
//! when a reply path exists; everything else is logged and swallowed.

use crate::id::{ClientId, SessionId};
use crate::transport::ConnectionId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the session registry, offline queue and router.
#[derive(Debug, Error)]
pub enum MeshError {
    #[error("registration rejected: {0}")]
    AuthRejected(String),

    #[error("unknown session: {0}")]
    UnknownSession(SessionId),

    #[error("unknown target: {0}")]
    UnknownTarget(String),

    #[error("delivery to {client} exhausted after {retries} retries")]
    DeliveryExhausted { client: ClientId, retries: u32 },

    #[error("probe failed: {0}")]
    ProbeFailure(String),

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("session {0} is not registered")]
    NotRegistered(SessionId),

    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("completion failed: {0}")]
    Provider(#[from] crate::collaborators::ProviderError),

    #[error("transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),
}

/// Machine-readable error kind carried by `ERROR` envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AuthRejected,
    UnknownSession,
    UnknownTarget,
    DeliveryExhausted,
    MalformedEnvelope,
    NotRegistered,
    ProviderError,
    Internal,
}

impl MeshError {
    /// The wire kind reported to clients for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AuthRejected(_) => ErrorKind::AuthRejected,
            Self::UnknownSession(_) => ErrorKind::UnknownSession,
            Self::UnknownTarget(_) => ErrorKind::UnknownTarget,
            Self::DeliveryExhausted { .. } => ErrorKind::DeliveryExhausted,
            Self::MalformedEnvelope(_) => ErrorKind::MalformedEnvelope,
            Self::NotRegistered(_) | Self::UnknownConnection(_) => ErrorKind::NotRegistered,
            Self::Provider(_) => ErrorKind::ProviderError,
            // Never reaches clients in practice
            Self::ProbeFailure(_) | Self::Transport(_) | Self::Store(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, MeshError>;
