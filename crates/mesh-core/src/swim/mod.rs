//! SWIM (Scalable Weakly-consistent Infection-style Membership) between mesh nodes.
//!
//! # Protocol Overview
//!
//! **Failure Detection:**
//! 1. Each protocol period, ping one random alive peer
//! 2. If no ack within `probe_timeout_ms`, ask K other peers to ping it (PING_REQ)
//! 3. If nothing answers within `suspect_timeout_ms` of the missed probe, mark the target SUSPECT
//! 4. If the suspicion is not refuted within `dead_timeout_ms`, mark it DEAD
//!
//! **Gossip Dissemination:**
//! - Membership changes are piggybacked on every PING/ACK/PING_REQ
//! - Each change is retransmitted a bounded number of times
//! - Only a node itself bumps its incarnation, to refute suspicion

pub mod engine;
pub mod failure;
pub mod gossip;
pub mod membership;
pub mod messages;

pub use engine::{MembershipSnapshot, Outgoing, SwimCounters, SwimEngine};
pub use failure::{FailureDetector, FailureDetectorConfig, ProbeEvent};
pub use gossip::GossipQueue;
pub use membership::{MembershipView, MergeOutcome, Node};
pub use messages::{GossipUpdate, MAX_DATAGRAM_SIZE, NodeState, SwimCodecError, SwimMessage};
