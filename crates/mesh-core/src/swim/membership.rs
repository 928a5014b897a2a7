//! Membership view: the local picture of every known node.
//!
//! Pure data structure, no I/O. Owned by the SWIM engine; everyone else sees
//! immutable snapshots.
//!
//! # Merge rule
//!
//! An incoming claim replaces the stored one iff its `(incarnation, state)`
//! is strictly greater, with states ordered `Alive < Suspect < Dead`. This is
//! a lattice max, so applying the same set of updates in any order converges
//! to the same view. Claims that the local node is suspect or dead are never
//! stored; the local node refutes them by bumping its incarnation.

use super::{GossipUpdate, NodeState};
use crate::id::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;

/// One mesh participant as seen by the local node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub address: SocketAddr,
    pub incarnation: u64,
    pub state: NodeState,
    /// Local timestamp of the last state transition (ms)
    pub state_changed_at: u64,
    pub is_local: bool,
    pub is_main_node: bool,
}

impl Node {
    /// The claim this entry represents, for gossiping.
    pub fn to_update(&self) -> GossipUpdate {
        GossipUpdate {
            node_id: self.id.clone(),
            address: self.address,
            incarnation: self.incarnation,
            state: self.state,
            is_main_node: self.is_main_node,
        }
    }

    fn rank(&self) -> (u64, NodeState) {
        (self.incarnation, self.state)
    }
}

/// What a merge did to the view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The update was not newer than what we hold.
    Stale,
    /// First time we hear about this node.
    Inserted,
    /// The stored entry was replaced.
    Updated { previous: NodeState },
    /// The update accused the local node; it now carries this incarnation.
    Refuted { incarnation: u64 },
}

impl MergeOutcome {
    /// Whether the update should be passed on to other nodes.
    pub fn is_news(&self) -> bool {
        matches!(self, Self::Inserted | Self::Updated { .. })
    }
}

#[derive(Debug, Clone)]
pub struct MembershipView {
    local: Node,
    peers: HashMap<NodeId, Node>,
}

impl MembershipView {
    pub fn new(local_id: NodeId, address: SocketAddr, incarnation: u64, now_ms: u64) -> Self {
        let local = Node {
            id: local_id,
            address,
            incarnation,
            state: NodeState::Alive,
            state_changed_at: now_ms,
            is_local: true,
            is_main_node: false,
        };
        Self {
            local,
            peers: HashMap::new(),
        }
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local.id
    }

    pub fn local(&self) -> &Node {
        &self.local
    }

    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        if *id == self.local.id {
            Some(&self.local)
        } else {
            self.peers.get(id)
        }
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Every entry, the local node first.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        std::iter::once(&self.local).chain(self.peers.values())
    }

    /// Number of entries, including the local node.
    pub fn len(&self) -> usize {
        self.peers.len() + 1
    }

    /// Always false: the local node is part of the view.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn count(&self, state: NodeState) -> usize {
        self.nodes().filter(|n| n.state == state).count()
    }

    /// Alive nodes other than ourselves.
    pub fn alive_peers(&self) -> impl Iterator<Item = &Node> {
        self.peers
            .values()
            .filter(|n| n.state == NodeState::Alive)
    }

    /// Apply one incoming claim.
    pub fn merge(&mut self, update: &GossipUpdate, now_ms: u64) -> MergeOutcome {
        if update.node_id == self.local.id {
            return self.merge_local(update, now_ms);
        }

        match self.peers.get_mut(&update.node_id) {
            None => {
                self.peers.insert(
                    update.node_id.clone(),
                    Node {
                        id: update.node_id.clone(),
                        address: update.address,
                        incarnation: update.incarnation,
                        state: update.state,
                        state_changed_at: now_ms,
                        is_local: false,
                        is_main_node: update.is_main_node,
                    },
                );
                MergeOutcome::Inserted
            }
            Some(node) if update.rank() > node.rank() => {
                let previous = node.state;
                // A new incarnation restarts the suspicion and tombstone clocks
                if node.state != update.state || node.incarnation != update.incarnation {
                    node.state_changed_at = now_ms;
                }
                node.address = update.address;
                node.incarnation = update.incarnation;
                node.is_main_node = update.is_main_node;
                node.state = update.state;
                MergeOutcome::Updated { previous }
            }
            Some(_) => MergeOutcome::Stale,
        }
    }

    fn merge_local(&mut self, update: &GossipUpdate, now_ms: u64) -> MergeOutcome {
        let local = &mut self.local;
        // After leaving we stop defending ourselves.
        if local.state == NodeState::Dead {
            return MergeOutcome::Stale;
        }

        let accused = update.state != NodeState::Alive && update.incarnation >= local.incarnation;
        let outdated = update.incarnation > local.incarnation;
        if !accused && !outdated {
            return MergeOutcome::Stale;
        }

        let incarnation = local.incarnation.max(update.incarnation).saturating_add(1);
        local.incarnation = incarnation;
        local.state_changed_at = now_ms;
        MergeOutcome::Refuted { incarnation }
    }

    /// Mark an alive node as suspect. Returns the claim to gossip.
    pub fn suspect(&mut self, id: &NodeId, now_ms: u64) -> Option<GossipUpdate> {
        self.transition(id, NodeState::Alive, NodeState::Suspect, now_ms)
    }

    /// Mark a suspect node as dead. Returns the claim to gossip.
    pub fn mark_dead(&mut self, id: &NodeId, now_ms: u64) -> Option<GossipUpdate> {
        self.transition(id, NodeState::Suspect, NodeState::Dead, now_ms)
    }

    fn transition(
        &mut self,
        id: &NodeId,
        from: NodeState,
        to: NodeState,
        now_ms: u64,
    ) -> Option<GossipUpdate> {
        let node = self.peers.get_mut(id)?;
        if node.state != from {
            return None;
        }
        node.state = to;
        node.state_changed_at = now_ms;
        Some(node.to_update())
    }

    /// Change the local main-node nomination. Bumps the incarnation so the
    /// new flag wins over older claims.
    pub fn set_local_main(&mut self, is_main: bool, now_ms: u64) -> Option<GossipUpdate> {
        let local = &mut self.local;
        if local.is_main_node == is_main || local.state == NodeState::Dead {
            return None;
        }
        local.is_main_node = is_main;
        local.incarnation = local.incarnation.saturating_add(1);
        local.state_changed_at = now_ms;
        Some(local.to_update())
    }

    /// Declare the local node dead at a fresh incarnation.
    pub fn leave(&mut self, now_ms: u64) -> GossipUpdate {
        let local = &mut self.local;
        if local.state != NodeState::Dead {
            local.incarnation = local.incarnation.saturating_add(1);
            local.state = NodeState::Dead;
            local.is_main_node = false;
            local.state_changed_at = now_ms;
        }
        local.to_update()
    }

    /// Suspect nodes whose suspicion is older than `timeout_ms`.
    pub fn expired_suspects(&self, now_ms: u64, timeout_ms: u64) -> Vec<NodeId> {
        self.peers
            .values()
            .filter(|n| {
                n.state == NodeState::Suspect
                    && now_ms.saturating_sub(n.state_changed_at) >= timeout_ms
            })
            .map(|n| n.id.clone())
            .collect()
    }

    /// Drop dead entries older than `ttl_ms`. Returns the removed ids.
    pub fn gc_tombstones(&mut self, now_ms: u64, ttl_ms: u64) -> Vec<NodeId> {
        let expired: Vec<NodeId> = self
            .peers
            .values()
            .filter(|n| {
                n.state == NodeState::Dead
                    && now_ms.saturating_sub(n.state_changed_at) >= ttl_ms
            })
            .map(|n| n.id.clone())
            .collect();
        for id in &expired {
            self.peers.remove(id);
        }
        expired
    }
}
