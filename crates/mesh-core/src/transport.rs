//! SessionTransport trait: the router's handle on one client connection.
//!
//! Implementations:
//! - WebSocket (mesh-daemon)
//! - In-memory recorder (tests)

use crate::protocol::Envelope;
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Identifies one accepted transport connection. Unique per process.
pub type ConnectionId = u64;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection closed")]
    Closed,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client closed the transport
    ClientClosed,
    /// A newer registration for the same client took over
    Superseded,
    /// No heartbeat within the timeout
    HeartbeatTimeout,
    /// Never registered within the timeout
    RegistrationTimeout,
    AuthRejected,
    /// Too many malformed envelopes
    ProtocolViolation,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::Superseded => "superseded",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::RegistrationTimeout => "registration_timeout",
            Self::AuthRejected => "auth_rejected",
            Self::ProtocolViolation => "protocol_violation",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One live client connection.
///
/// Sends must be bounded in time; a slow or dead peer yields an error rather
/// than blocking the caller.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    fn connection_id(&self) -> ConnectionId;

    /// Deliver one envelope.
    async fn send(&self, envelope: &Envelope) -> Result<()>;

    /// Close the connection. Idempotent.
    async fn close(&self, reason: CloseReason);
}

#[cfg(test)]
pub(crate) mod memory {
    use super::*;
    use crate::protocol::{EnvelopeType, Payload};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::Notify;

    /// Records everything sent to it.
    pub struct MemoryTransport {
        id: ConnectionId,
        sent: Mutex<Vec<Envelope>>,
        closed: Mutex<Option<CloseReason>>,
        fail_sends: AtomicBool,
        /// Next send of this type parks until the gate is opened
        held: Mutex<Option<(EnvelopeType, Arc<Notify>)>>,
    }

    impl MemoryTransport {
        pub fn new(id: ConnectionId) -> std::sync::Arc<Self> {
            std::sync::Arc::new(Self {
                id,
                sent: Mutex::new(Vec::new()),
                closed: Mutex::new(None),
                fail_sends: AtomicBool::new(false),
                held: Mutex::new(None),
            })
        }

        pub fn sent(&self) -> Vec<Envelope> {
            self.sent.lock().unwrap().clone()
        }

        pub fn sent_of(&self, ty: EnvelopeType) -> Vec<Envelope> {
            self.sent().into_iter().filter(|e| e.kind() == ty).collect()
        }

        pub fn clear(&self) {
            self.sent.lock().unwrap().clear();
        }

        pub fn closed(&self) -> Option<CloseReason> {
            *self.closed.lock().unwrap()
        }

        pub fn fail_sends(&self, fail: bool) {
            self.fail_sends.store(fail, Ordering::SeqCst);
        }

        /// Park the next send of `ty` until the returned gate is notified.
        pub fn hold_next(&self, ty: EnvelopeType) -> Arc<Notify> {
            let gate = Arc::new(Notify::new());
            *self.held.lock().unwrap() = Some((ty, Arc::clone(&gate)));
            gate
        }

        /// Contents of MESSAGE envelopes received, in order.
        pub fn message_contents(&self) -> Vec<serde_json::Value> {
            self.sent()
                .into_iter()
                .filter_map(|e| match e.payload {
                    Payload::Message(m) => Some(m.content),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl SessionTransport for MemoryTransport {
        fn connection_id(&self) -> ConnectionId {
            self.id
        }

        async fn send(&self, envelope: &Envelope) -> Result<()> {
            let gate = {
                let mut held = self.held.lock().unwrap();
                if held.as_ref().is_some_and(|(ty, _)| *ty == envelope.kind()) {
                    held.take().map(|(_, gate)| gate)
                } else {
                    None
                }
            };
            if let Some(gate) = gate {
                gate.notified().await;
            }
            if self.fail_sends.load(Ordering::SeqCst) || self.closed().is_some() {
                return Err(TransportError::Closed);
            }
            self.sent.lock().unwrap().push(envelope.clone());
            Ok(())
        }

        async fn close(&self, reason: CloseReason) {
            let mut closed = self.closed.lock().unwrap();
            if closed.is_none() {
                *closed = Some(reason);
            }
        }
    }
}
