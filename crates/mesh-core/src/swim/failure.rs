//! SWIM failure detection.
//!
//! One probe round at a time:
//! 1. Ping the target directly
//! 2. No ack within `probe_timeout_ms` → ask K other peers to ping it (PING_REQ)
//! 3. No ack, direct or relayed, within `suspect_timeout_ms` of the missed
//!    direct probe (so `probe_timeout_ms + suspect_timeout_ms` after the
//!    ping) → the round fails and the target becomes suspect
//!
//! The detector only tracks timers and sequence numbers. Picking targets,
//! sending datagrams and touching the membership view is the engine's job.

use crate::config::MeshConfig;
use crate::id::NodeId;
use std::collections::HashMap;
use std::net::SocketAddr;

/// Configuration for failure detection.
#[derive(Debug, Clone)]
pub struct FailureDetectorConfig {
    /// How long to wait for a direct ack before probing indirectly
    pub probe_timeout_ms: u64,
    /// How long after the missed direct probe the round may stay
    /// unanswered before the target is suspected
    pub suspect_timeout_ms: u64,
}

impl Default for FailureDetectorConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 500,
            suspect_timeout_ms: 5000,
        }
    }
}

impl From<&MeshConfig> for FailureDetectorConfig {
    fn from(config: &MeshConfig) -> Self {
        Self {
            probe_timeout_ms: config.probe_timeout_ms,
            suspect_timeout_ms: config.suspect_timeout_ms,
        }
    }
}

/// The probe round in flight.
#[derive(Debug, Clone)]
pub struct ProbeRound {
    /// Sequence number shared by the direct ping and all PING_REQs
    pub seq: u64,
    pub target: NodeId,
    pub target_addr: SocketAddr,
    pub started_at: u64,
    pub indirect_sent: bool,
}

/// Timer-driven step the engine must act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeEvent {
    /// Direct ping went unanswered: send PING_REQs for this round.
    StartIndirect {
        seq: u64,
        target: NodeId,
        target_addr: SocketAddr,
    },
    /// The round failed: the target should be suspected.
    Suspect { target: NodeId },
}

/// A ping we sent on behalf of another node.
#[derive(Debug, Clone)]
struct Relay {
    requester: SocketAddr,
    requester_seq: u64,
    created_at: u64,
}

/// Failure detector for the SWIM protocol.
pub struct FailureDetector {
    config: FailureDetectorConfig,
    next_seq: u64,
    round: Option<ProbeRound>,
    relays: HashMap<u64, Relay>,
}

impl FailureDetector {
    pub fn new(config: FailureDetectorConfig) -> Self {
        Self {
            config,
            next_seq: 1,
            round: None,
            relays: HashMap::new(),
        }
    }

    pub fn config(&self) -> &FailureDetectorConfig {
        &self.config
    }

    /// Allocate a sequence number.
    pub fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        seq
    }

    pub fn round(&self) -> Option<&ProbeRound> {
        self.round.as_ref()
    }

    pub fn is_probing(&self) -> bool {
        self.round.is_some()
    }

    /// Begin a new round. Returns the sequence number to ping with.
    ///
    /// Callers must not start a round while one is active.
    pub fn start_round(&mut self, target: NodeId, target_addr: SocketAddr, now_ms: u64) -> u64 {
        let seq = self.next_seq();
        self.round = Some(ProbeRound {
            seq,
            target,
            target_addr,
            started_at: now_ms,
            indirect_sent: false,
        });
        seq
    }

    /// Record an ack. Returns the probed node if this ack completes the round.
    pub fn receive_ack(&mut self, seq: u64) -> Option<NodeId> {
        if self.round.as_ref().is_some_and(|r| r.seq == seq) {
            return self.round.take().map(|r| r.target);
        }
        None
    }

    /// Abandon the round if it targets `id` (e.g. the node was declared dead
    /// by someone else meanwhile).
    pub fn cancel_round(&mut self, id: &NodeId) -> bool {
        if self.round.as_ref().is_some_and(|r| &r.target == id) {
            self.round = None;
            return true;
        }
        false
    }

    /// Time from the direct ping until the round is declared failed.
    fn round_deadline_ms(&self) -> u64 {
        self.config.probe_timeout_ms + self.config.suspect_timeout_ms
    }

    /// Advance timers.
    pub fn poll(&mut self, now_ms: u64) -> Option<ProbeEvent> {
        let relay_ttl = self.round_deadline_ms();
        self.relays
            .retain(|_, relay| now_ms.saturating_sub(relay.created_at) < relay_ttl);

        let deadline = self.round_deadline_ms();
        let round = self.round.as_mut()?;
        let elapsed = now_ms.saturating_sub(round.started_at);

        if elapsed >= deadline {
            let target = round.target.clone();
            self.round = None;
            return Some(ProbeEvent::Suspect { target });
        }

        if !round.indirect_sent && elapsed >= self.config.probe_timeout_ms {
            round.indirect_sent = true;
            return Some(ProbeEvent::StartIndirect {
                seq: round.seq,
                target: round.target.clone(),
                target_addr: round.target_addr,
            });
        }

        None
    }

    /// Earliest time at which [`poll`](Self::poll) has something to do.
    pub fn next_deadline(&self) -> Option<u64> {
        let round = self.round.as_ref()?;
        if round.indirect_sent {
            Some(round.started_at + self.round_deadline_ms())
        } else {
            Some(round.started_at + self.config.probe_timeout_ms)
        }
    }

    /// Remember that we are pinging someone for `requester`. Returns the
    /// sequence number for our own ping.
    pub fn start_relay(&mut self, requester: SocketAddr, requester_seq: u64, now_ms: u64) -> u64 {
        let seq = self.next_seq();
        self.relays.insert(
            seq,
            Relay {
                requester,
                requester_seq,
                created_at: now_ms,
            },
        );
        seq
    }

    /// Resolve an ack to a relay: where to forward it and with which seq.
    pub fn take_relay(&mut self, seq: u64) -> Option<(SocketAddr, u64)> {
        self.relays
            .remove(&seq)
            .map(|r| (r.requester, r.requester_seq))
    }

    pub fn relay_count(&self) -> usize {
        self.relays.len()
    }
}
