//! mesh-core: coordination engine for a mesh of heterogeneous clients.
//!
//! This crate provides:
//! - SWIM membership and failure detection between mesh nodes
//! - Main-node election over membership snapshots
//! - The client envelope protocol
//! - Session registry, offline queue and the mesh router
//! - Collaborator, transport and store trait abstractions
//!
//! Nothing here owns a runtime or a socket. State machines take `now_ms`
//! explicitly; the daemon drives them.

pub mod clock;
pub mod collaborators;
pub mod config;
pub mod coordinator;
pub mod dedup;
pub mod error;
pub mod id;
pub mod offline_queue;
pub mod protocol;
pub mod router;
pub mod session;
pub mod store;
pub mod swim;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborators::{
    AuthRejected, AuthValidator, CompletionOutput, CompletionProvider, CompletionRequest,
    GroupResolver, Principal, ProviderError,
};
pub use config::{MeshConfig, OfflineQueueConfig};
pub use coordinator::{NodeCoordinator, SwimCommand};
pub use error::{ErrorKind, MeshError};
pub use id::{ClientId, IdError, NodeId, SessionId};
pub use offline_queue::{OfflineQueue, PendingMessage};
pub use protocol::{Envelope, EnvelopeType, Payload};
pub use router::{Collaborators, Disposition, MeshRouter, MeshStatus};
pub use session::{SessionRegistry, SessionState};
pub use store::{ClientRecord, InMemoryStore, PersistentStore};
pub use swim::{MembershipSnapshot, Node, NodeState, SwimEngine};
pub use transport::{CloseReason, ConnectionId, SessionTransport, TransportError};
