//! Gossip dissemination queue.
//!
//! Each membership change is piggybacked on outgoing messages a bounded
//! number of times. Only the newest claim per node is kept; least-sent
//! updates go out first.

use super::GossipUpdate;
use crate::id::NodeId;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct QueuedUpdate {
    update: GossipUpdate,
    transmits: u32,
    /// Insertion order, breaks ties between equally-sent updates
    order: u64,
}

#[derive(Debug)]
pub struct GossipQueue {
    entries: HashMap<NodeId, QueuedUpdate>,
    retransmit_limit: u32,
    next_order: u64,
}

impl GossipQueue {
    pub fn new(retransmit_limit: u32) -> Self {
        Self {
            entries: HashMap::new(),
            retransmit_limit: retransmit_limit.max(1),
            next_order: 0,
        }
    }

    /// Queue an update, replacing any older claim about the same node.
    pub fn push(&mut self, update: GossipUpdate) {
        let order = self.next_order;
        self.next_order += 1;
        self.entries.insert(
            update.node_id.clone(),
            QueuedUpdate {
                update,
                transmits: 0,
                order,
            },
        );
    }

    /// Take up to `max` updates for one outgoing message.
    ///
    /// Selected updates count one transmission; those that reach the
    /// retransmit limit are retired.
    pub fn select(&mut self, max: usize) -> Vec<GossipUpdate> {
        if max == 0 || self.entries.is_empty() {
            return Vec::new();
        }

        let mut candidates: Vec<(u32, u64, NodeId)> = self
            .entries
            .iter()
            .map(|(id, q)| (q.transmits, q.order, id.clone()))
            .collect();
        candidates.sort();
        candidates.truncate(max);

        let mut out = Vec::with_capacity(candidates.len());
        for (_, _, id) in candidates {
            let retire = match self.entries.get_mut(&id) {
                Some(queued) => {
                    queued.transmits += 1;
                    out.push(queued.update.clone());
                    queued.transmits >= self.retransmit_limit
                }
                None => false,
            };
            if retire {
                self.entries.remove(&id);
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swim::NodeState;

    fn update(id: &str, inc: u64) -> GossipUpdate {
        GossipUpdate {
            node_id: id.parse().unwrap(),
            address: "127.0.0.1:1".parse().unwrap(),
            incarnation: inc,
            state: NodeState::Alive,
            is_main_node: false,
        }
    }

    #[test]
    fn test_select_respects_fanout() {
        let mut queue = GossipQueue::new(4);
        for i in 0..10 {
            queue.push(update(&format!("n{i}"), 0));
        }
        assert_eq!(queue.select(3).len(), 3);
        assert_eq!(queue.len(), 10);
    }

    #[test]
    fn test_updates_retire_after_limit() {
        let mut queue = GossipQueue::new(2);
        queue.push(update("a", 0));
        assert_eq!(queue.select(8).len(), 1);
        assert_eq!(queue.select(8).len(), 1);
        assert!(queue.select(8).is_empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_least_sent_first() {
        let mut queue = GossipQueue::new(10);
        queue.push(update("a", 0));
        queue.select(1);
        queue.push(update("b", 0));
        let picked = queue.select(1);
        assert_eq!(picked[0].node_id.as_str(), "b");
    }

    #[test]
    fn test_newer_claim_replaces_older() {
        let mut queue = GossipQueue::new(4);
        queue.push(update("a", 1));
        queue.push(update("a", 2));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.select(8)[0].incarnation, 2);
    }
}
