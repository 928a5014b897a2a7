//! Node coordinator: derives the "main node" from membership snapshots.
//!
//! Election is best-effort and local: a node is eligible while ALIVE; the
//! pinned id wins if it is alive, then the smallest self-nominated id, then
//! the smallest id overall. Nodes may disagree briefly during a partition.
//!
//! The coordinator never touches the membership view. It reads snapshots
//! published by the SWIM driver and sends [`SwimCommand`]s back to it.

use crate::id::NodeId;
use crate::swim::{MembershipSnapshot, Node, NodeState};
use futures::channel::mpsc;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Requests from the mesh side to the SWIM driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwimCommand {
    SetMainNode(bool),
    Leave,
}

struct Published {
    snapshot: Arc<MembershipSnapshot>,
    main: Option<NodeId>,
}

pub struct NodeCoordinator {
    pinned: Option<NodeId>,
    state: RwLock<Published>,
    commands: mpsc::UnboundedSender<SwimCommand>,
}

impl NodeCoordinator {
    /// Create a coordinator and the command stream the SWIM driver consumes.
    pub fn new(
        initial: MembershipSnapshot,
        pinned: Option<NodeId>,
    ) -> (Self, mpsc::UnboundedReceiver<SwimCommand>) {
        let (tx, rx) = mpsc::unbounded();
        let main = elect_main(&initial, pinned.as_ref());
        let coordinator = Self {
            pinned,
            state: RwLock::new(Published {
                snapshot: Arc::new(initial),
                main,
            }),
            commands: tx,
        };
        (coordinator, rx)
    }

    /// Replace the current snapshot and re-run the election.
    pub fn observe(&self, snapshot: MembershipSnapshot) {
        let main = elect_main(&snapshot, self.pinned.as_ref());
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if state.main != main {
            info!(
                main_node = ?main.as_ref().map(|m| m.as_str()),
                previous = ?state.main.as_ref().map(|m| m.as_str()),
                "Main node changed"
            );
        }
        state.snapshot = Arc::new(snapshot);
        state.main = main;
    }

    pub fn snapshot(&self) -> Arc<MembershipSnapshot> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&state.snapshot)
    }

    pub fn local_id(&self) -> NodeId {
        self.snapshot().local_id.clone()
    }

    /// Nominate (or withdraw) the local node and gossip the change.
    ///
    /// The local snapshot is updated right away; peers learn about it on the
    /// next SWIM exchange.
    pub fn set_main_node(&self, is_main: bool) {
        if self
            .commands
            .unbounded_send(SwimCommand::SetMainNode(is_main))
            .is_err()
        {
            debug!("SWIM driver not running; nomination only applied locally");
        }

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let mut snapshot = (*state.snapshot).clone();
        let local_id = snapshot.local_id.clone();
        if let Some(local) = snapshot.nodes.iter_mut().find(|n| n.id == local_id) {
            local.is_main_node = is_main;
        }
        state.main = elect_main(&snapshot, self.pinned.as_ref());
        state.snapshot = Arc::new(snapshot);
    }

    /// Ask the SWIM driver to gossip our departure.
    pub fn request_leave(&self) {
        let _ = self.commands.unbounded_send(SwimCommand::Leave);
    }

    /// Whether the local node is the elected main node.
    pub fn is_main_node(&self) -> bool {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.main.as_ref() == Some(&state.snapshot.local_id)
    }

    pub fn main_node(&self) -> Option<NodeId> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.main.clone()
    }

    pub fn get_node_count(&self, node_state: NodeState) -> usize {
        self.snapshot().count(node_state)
    }

    pub fn find_node(&self, id: &NodeId) -> Option<Node> {
        self.snapshot().find(id).cloned()
    }
}

/// Pick the main node for a snapshot.
pub fn elect_main(snapshot: &MembershipSnapshot, pinned: Option<&NodeId>) -> Option<NodeId> {
    if let Some(pinned) = pinned
        && snapshot
            .find(pinned)
            .is_some_and(|n| n.state == NodeState::Alive)
    {
        return Some(pinned.clone());
    }

    // Nodes are sorted by id, so the first match is the smallest.
    snapshot
        .alive()
        .find(|n| n.is_main_node)
        .or_else(|| snapshot.alive().next())
        .map(|n| n.id.clone())
}
