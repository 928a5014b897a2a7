//! SWIM engine: membership view + failure detector + gossip queue.
//!
//! Sans-I/O. The owner feeds it datagrams and clock ticks and sends whatever
//! [`Outgoing`] messages come back. Sending is fire-and-forget; a lost
//! datagram simply shows up later as a missing ACK.
//!
//! The engine has exactly one owner (the driver task), so the membership view
//! has a single writer. Everyone else reads [`MembershipSnapshot`]s.

use super::failure::{FailureDetector, FailureDetectorConfig, ProbeEvent};
use super::membership::{MembershipView, MergeOutcome, Node};
use super::{GossipQueue, GossipUpdate, NodeState, SwimMessage};
use crate::config::MeshConfig;
use crate::id::NodeId;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tracing::{debug, info, trace, warn};

/// Cap on entries sent when introducing the whole view to a newcomer.
const MAX_FULL_GOSSIP: usize = 512;

/// Process-lifetime counters. Monotonic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwimCounters {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub probes_succeeded: u64,
    pub probes_failed: u64,
    /// Protocol ticks that found the previous round still running
    pub ticks_skipped: u64,
    /// Datagrams that could not be decoded
    pub decode_failures: u64,
}

/// A datagram the owner should send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub to: SocketAddr,
    pub message: SwimMessage,
}

/// Immutable copy of the membership view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipSnapshot {
    pub local_id: NodeId,
    /// All known nodes, sorted by id
    pub nodes: Vec<Node>,
    pub counters: SwimCounters,
    pub taken_at: u64,
}

impl MembershipSnapshot {
    /// A snapshot holding only the local node, alive.
    pub fn solo(local_id: NodeId, address: SocketAddr, now_ms: u64) -> Self {
        let view = MembershipView::new(local_id.clone(), address, 0, now_ms);
        Self {
            local_id,
            nodes: view.nodes().cloned().collect(),
            counters: SwimCounters::default(),
            taken_at: now_ms,
        }
    }

    pub fn find(&self, id: &NodeId) -> Option<&Node> {
        self.nodes
            .binary_search_by(|n| n.id.cmp(id))
            .ok()
            .map(|i| &self.nodes[i])
    }

    pub fn local(&self) -> Option<&Node> {
        self.find(&self.local_id)
    }

    pub fn count(&self, state: NodeState) -> usize {
        self.nodes.iter().filter(|n| n.state == state).count()
    }

    pub fn alive(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.state == NodeState::Alive)
    }
}

pub struct SwimEngine {
    view: MembershipView,
    detector: FailureDetector,
    gossip: GossipQueue,
    seeds: Vec<SocketAddr>,
    counters: SwimCounters,
    indirect_probes: usize,
    gossip_fanout: usize,
    dead_timeout_ms: u64,
    tombstone_ttl_ms: u64,
    self_gossip_interval_ms: u64,
    last_self_gossip: u64,
    last_join_attempt: Option<u64>,
    changed: bool,
    left: bool,
}

impl SwimEngine {
    pub fn new(local_id: NodeId, address: SocketAddr, config: &MeshConfig, now_ms: u64) -> Self {
        let mut view = MembershipView::new(local_id, address, 0, now_ms);
        if config.is_main_node {
            view.set_local_main(true, now_ms);
        }

        let mut gossip = GossipQueue::new(config.gossip_retransmit);
        gossip.push(view.local().to_update());

        Self {
            view,
            detector: FailureDetector::new(FailureDetectorConfig::from(config)),
            gossip,
            seeds: config
                .seeds
                .iter()
                .copied()
                .filter(|s| *s != address)
                .collect(),
            counters: SwimCounters::default(),
            indirect_probes: config.indirect_probes,
            gossip_fanout: config.gossip_fanout,
            dead_timeout_ms: config.dead_timeout_ms,
            tombstone_ttl_ms: config.tombstone_ttl_ms,
            self_gossip_interval_ms: config.self_gossip_interval_ms,
            last_self_gossip: now_ms,
            last_join_attempt: None,
            changed: true,
            left: false,
        }
    }

    pub fn local_id(&self) -> &NodeId {
        self.view.local_id()
    }

    pub fn view(&self) -> &MembershipView {
        &self.view
    }

    pub fn counters(&self) -> SwimCounters {
        self.counters
    }

    pub fn has_left(&self) -> bool {
        self.left
    }

    /// Target of the round in flight, if any.
    pub fn probe_target(&self) -> Option<&NodeId> {
        self.detector.round().map(|r| &r.target)
    }

    /// Earliest time a timer inside the engine fires.
    pub fn next_deadline(&self) -> Option<u64> {
        self.detector.next_deadline()
    }

    /// Protocol-period tick: run timers, then start a probe round unless the
    /// previous one is still running.
    pub fn tick(&mut self, now_ms: u64) -> Vec<Outgoing> {
        if self.left {
            return Vec::new();
        }

        let mut out = Vec::new();
        self.run_timers(now_ms, &mut out);

        if self.detector.is_probing() {
            self.counters.ticks_skipped += 1;
            debug!(
                target_node = ?self.probe_target().map(|t| t.as_str()),
                "Probe round still running, skipping tick"
            );
        } else {
            self.start_round(now_ms, &mut out);
        }

        let isolated = self.view.alive_peers().next().is_none();
        let join_due = self
            .last_join_attempt
            .is_none_or(|at| now_ms.saturating_sub(at) >= self.self_gossip_interval_ms);
        if isolated && join_due && !self.seeds.is_empty() {
            self.join_into(now_ms, &mut out);
        }

        self.finish(out)
    }

    /// Run timers only (probe timeouts, suspicion expiry, tombstones).
    pub fn poll(&mut self, now_ms: u64) -> Vec<Outgoing> {
        if self.left {
            return Vec::new();
        }
        let mut out = Vec::new();
        self.run_timers(now_ms, &mut out);
        self.finish(out)
    }

    /// Handle a raw datagram.
    pub fn handle_datagram(&mut self, from: SocketAddr, data: &[u8], now_ms: u64) -> Vec<Outgoing> {
        match SwimMessage::decode(data) {
            Ok(message) => self.handle_message(from, message, now_ms),
            Err(e) => {
                self.counters.messages_received += 1;
                self.counters.decode_failures += 1;
                debug!(%from, error = %e, "Dropping undecodable SWIM datagram");
                Vec::new()
            }
        }
    }

    /// Handle a decoded message.
    pub fn handle_message(
        &mut self,
        from_addr: SocketAddr,
        message: SwimMessage,
        now_ms: u64,
    ) -> Vec<Outgoing> {
        if self.left {
            return Vec::new();
        }
        self.counters.messages_received += 1;
        trace!(kind = message.kind(), from = %message.sender(), "SWIM message");

        let sender_known = self.view.contains(message.sender());
        self.apply_gossip(message.gossip(), now_ms);

        let mut out = Vec::new();
        match message {
            SwimMessage::Ping { seq, .. } => {
                // Strangers get the whole view so they converge in one step.
                let gossip = if sender_known {
                    self.gossip.select(self.gossip_fanout)
                } else {
                    self.full_gossip()
                };
                out.push(Outgoing {
                    to: from_addr,
                    message: SwimMessage::Ack {
                        seq,
                        from: self.local_id().clone(),
                        gossip,
                    },
                });
            }
            SwimMessage::Ack { seq, from, .. } => {
                if let Some(target) = self.detector.receive_ack(seq) {
                    self.counters.probes_succeeded += 1;
                    trace!(node = %target, "Probe acknowledged");
                } else if let Some((requester, requester_seq)) = self.detector.take_relay(seq) {
                    out.push(Outgoing {
                        to: requester,
                        message: SwimMessage::Ack {
                            seq: requester_seq,
                            from,
                            gossip: self.gossip.select(self.gossip_fanout),
                        },
                    });
                }
            }
            SwimMessage::PingReq {
                seq,
                target,
                target_addr,
                ..
            } => {
                let relay_seq = self.detector.start_relay(from_addr, seq, now_ms);
                trace!(node = %target, "Probing on behalf of {from_addr}");
                out.push(Outgoing {
                    to: target_addr,
                    message: self.ping(relay_seq),
                });
            }
        }

        self.finish(out)
    }

    /// Ping every seed with our own entry.
    pub fn join(&mut self, now_ms: u64) -> Vec<Outgoing> {
        let mut out = Vec::new();
        self.join_into(now_ms, &mut out);
        self.finish(out)
    }

    /// Declare ourselves dead to every alive peer. The engine goes quiet
    /// afterwards.
    pub fn leave(&mut self, now_ms: u64) -> Vec<Outgoing> {
        if self.left {
            return Vec::new();
        }
        let peers: Vec<SocketAddr> = self.view.alive_peers().map(|n| n.address).collect();
        let update = self.view.leave(now_ms);
        info!(incarnation = update.incarnation, peers = peers.len(), "Leaving mesh");

        let out = peers
            .into_iter()
            .map(|to| Outgoing {
                to,
                message: SwimMessage::Ping {
                    seq: self.detector.next_seq(),
                    from: update.node_id.clone(),
                    gossip: vec![update.clone()],
                },
            })
            .collect();
        self.left = true;
        self.changed = true;
        self.finish(out)
    }

    /// Change the local main-node nomination and gossip it.
    pub fn set_main_node(&mut self, is_main: bool, now_ms: u64) {
        if let Some(update) = self.view.set_local_main(is_main, now_ms) {
            info!(is_main, incarnation = update.incarnation, "Main node nomination changed");
            self.gossip.push(update);
            self.changed = true;
        }
    }

    pub fn snapshot(&self, now_ms: u64) -> MembershipSnapshot {
        let mut nodes: Vec<Node> = self.view.nodes().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        MembershipSnapshot {
            local_id: self.local_id().clone(),
            nodes,
            counters: self.counters,
            taken_at: now_ms,
        }
    }

    /// A snapshot if the view changed since the last call.
    pub fn snapshot_if_changed(&mut self, now_ms: u64) -> Option<MembershipSnapshot> {
        if !self.changed {
            return None;
        }
        self.changed = false;
        Some(self.snapshot(now_ms))
    }

    // ==================== Internals ====================

    fn finish(&mut self, out: Vec<Outgoing>) -> Vec<Outgoing> {
        self.counters.messages_sent += out.len() as u64;
        out
    }

    fn ping(&mut self, seq: u64) -> SwimMessage {
        SwimMessage::Ping {
            seq,
            from: self.local_id().clone(),
            gossip: self.gossip.select(self.gossip_fanout),
        }
    }

    fn full_gossip(&self) -> Vec<GossipUpdate> {
        self.view
            .nodes()
            .take(MAX_FULL_GOSSIP)
            .map(Node::to_update)
            .collect()
    }

    fn start_round(&mut self, now_ms: u64, out: &mut Vec<Outgoing>) {
        use rand::seq::IndexedRandom;

        let alive: Vec<&Node> = self.view.alive_peers().collect();
        let Some((target, addr)) = alive
            .choose(&mut rand::rng())
            .map(|n| (n.id.clone(), n.address))
        else {
            return;
        };

        let seq = self.detector.start_round(target.clone(), addr, now_ms);
        trace!(node = %target, seq, "Starting probe round");
        let message = self.ping(seq);
        out.push(Outgoing { to: addr, message });
    }

    fn run_timers(&mut self, now_ms: u64, out: &mut Vec<Outgoing>) {
        match self.detector.poll(now_ms) {
            Some(ProbeEvent::StartIndirect {
                seq,
                target,
                target_addr,
            }) => self.send_ping_reqs(seq, target, target_addr, out),
            Some(ProbeEvent::Suspect { target }) => {
                self.counters.probes_failed += 1;
                if let Some(update) = self.view.suspect(&target, now_ms) {
                    warn!(node = %target, incarnation = update.incarnation, "Node suspected");
                    self.gossip.push(update);
                    self.changed = true;
                }
            }
            None => {}
        }

        for id in self.view.expired_suspects(now_ms, self.dead_timeout_ms) {
            if let Some(update) = self.view.mark_dead(&id, now_ms) {
                warn!(node = %id, incarnation = update.incarnation, "Node declared dead");
                self.gossip.push(update);
                self.changed = true;
            }
        }

        let removed = self.view.gc_tombstones(now_ms, self.tombstone_ttl_ms);
        if !removed.is_empty() {
            debug!(count = removed.len(), "Removed dead tombstones");
            self.changed = true;
        }

        if now_ms.saturating_sub(self.last_self_gossip) >= self.self_gossip_interval_ms {
            self.gossip.push(self.view.local().to_update());
            self.last_self_gossip = now_ms;
        }
    }

    fn send_ping_reqs(
        &mut self,
        seq: u64,
        target: NodeId,
        target_addr: SocketAddr,
        out: &mut Vec<Outgoing>,
    ) {
        use rand::seq::SliceRandom;

        let mut helpers: Vec<SocketAddr> = self
            .view
            .alive_peers()
            .filter(|n| n.id != target)
            .map(|n| n.address)
            .collect();
        helpers.shuffle(&mut rand::rng());
        helpers.truncate(self.indirect_probes);

        debug!(node = %target, helpers = helpers.len(), "Direct probe timed out, probing indirectly");
        for helper in helpers {
            out.push(Outgoing {
                to: helper,
                message: SwimMessage::PingReq {
                    seq,
                    from: self.local_id().clone(),
                    target: target.clone(),
                    target_addr,
                    gossip: self.gossip.select(self.gossip_fanout),
                },
            });
        }
    }

    fn join_into(&mut self, now_ms: u64, out: &mut Vec<Outgoing>) {
        self.last_join_attempt = Some(now_ms);
        let local = self.view.local().to_update();
        for seed in self.seeds.clone() {
            debug!(%seed, "Pinging seed");
            out.push(Outgoing {
                to: seed,
                message: SwimMessage::Ping {
                    seq: self.detector.next_seq(),
                    from: local.node_id.clone(),
                    gossip: vec![local.clone()],
                },
            });
        }
    }

    fn apply_gossip(&mut self, updates: &[GossipUpdate], now_ms: u64) {
        for update in updates {
            match self.view.merge(update, now_ms) {
                MergeOutcome::Stale => {}
                MergeOutcome::Refuted { incarnation } => {
                    info!(
                        incarnation,
                        claimed = %update.state,
                        "Refuting claim about local node"
                    );
                    self.gossip.push(self.view.local().to_update());
                    self.changed = true;
                }
                MergeOutcome::Inserted => {
                    info!(node = %update.node_id, state = %update.state, "Discovered node");
                    self.on_news(update);
                }
                MergeOutcome::Updated { previous } => {
                    if previous != update.state {
                        info!(
                            node = %update.node_id,
                            from = %previous,
                            to = %update.state,
                            incarnation = update.incarnation,
                            "Node state changed"
                        );
                    }
                    self.on_news(update);
                }
            }
        }
    }

    fn on_news(&mut self, update: &GossipUpdate) {
        if update.state == NodeState::Dead {
            self.detector.cancel_round(&update.node_id);
        }
        self.gossip.push(update.clone());
        self.changed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config() -> MeshConfig {
        MeshConfig::default()
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn engine(id: &str, port: u16) -> SwimEngine {
        SwimEngine::new(id.parse().unwrap(), addr(port), &config(), 0)
    }

    /// Deliver messages between in-memory engines until quiet, dropping
    /// anything addressed to `down`.
    fn pump(
        engines: &mut HashMap<SocketAddr, SwimEngine>,
        mut queue: Vec<(SocketAddr, Outgoing)>,
        down: &[SocketAddr],
        now: u64,
    ) {
        while let Some((from, out)) = queue.pop() {
            if down.contains(&out.to) {
                continue;
            }
            let Some(engine) = engines.get_mut(&out.to) else {
                continue;
            };
            let bytes = out.message.encode().unwrap();
            let replies = engine.handle_datagram(from, &bytes, now);
            queue.extend(replies.into_iter().map(|r| (out.to, r)));
        }
    }

    fn cluster(ids: &[(&str, u16)]) -> HashMap<SocketAddr, SwimEngine> {
        let mut engines: HashMap<SocketAddr, SwimEngine> = ids
            .iter()
            .map(|(id, port)| (addr(*port), engine(id, *port)))
            .collect();
        // Everyone learns everyone through gossip
        let updates: Vec<GossipUpdate> = engines
            .values()
            .map(|e| e.view().local().to_update())
            .collect();
        for engine in engines.values_mut() {
            engine.apply_gossip(&updates, 0);
        }
        engines
    }

    fn id(s: &str) -> NodeId {
        s.parse().unwrap()
    }

    // ==================== Join ====================

    #[test]
    fn test_join_via_seed() {
        let mut cfg = config();
        cfg.seeds = vec![addr(2)];
        let a = SwimEngine::new(id("a"), addr(1), &cfg, 0);
        let b = engine("b", 2);
        let mut engines: HashMap<_, _> = [(addr(1), a), (addr(2), b)].into_iter().collect();

        let out = engines.get_mut(&addr(1)).unwrap().join(0);
        assert_eq!(out.len(), 1);
        pump(
            &mut engines,
            out.into_iter().map(|o| (addr(1), o)).collect(),
            &[],
            0,
        );

        assert!(engines[&addr(1)].view().contains(&id("b")));
        assert!(engines[&addr(2)].view().contains(&id("a")));
    }

    #[test]
    fn test_isolated_tick_retries_seeds() {
        let mut cfg = config();
        cfg.seeds = vec![addr(2), addr(1)];
        let mut a = SwimEngine::new(id("a"), addr(1), &cfg, 0);
        // Own address filtered out of the seed list
        let out = a.tick(1000);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to, addr(2));
        // Not again until the retry interval passes
        assert!(a.tick(2000).is_empty());
        assert_eq!(a.tick(6000).len(), 1);
    }

    // ==================== Probing ====================

    #[test]
    fn test_probe_success() {
        let mut engines = cluster(&[("a", 1), ("b", 2)]);
        let out = engines.get_mut(&addr(1)).unwrap().tick(1000);
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0].message, SwimMessage::Ping { .. }));
        pump(
            &mut engines,
            out.into_iter().map(|o| (addr(1), o)).collect(),
            &[],
            1000,
        );

        let a = &engines[&addr(1)];
        assert_eq!(a.counters().probes_succeeded, 1);
        assert!(a.probe_target().is_none());
    }

    #[test]
    fn test_tick_skipped_while_round_active() {
        let mut engines = cluster(&[("a", 1), ("b", 2)]);
        let a = engines.get_mut(&addr(1)).unwrap();
        a.tick(1000);
        assert!(a.probe_target().is_some());
        a.tick(2000);
        assert_eq!(a.counters().ticks_skipped, 1);
    }

    #[test]
    fn test_unresponsive_node_suspected_then_refuted() {
        let mut engines = cluster(&[("a", 1), ("n1", 2)]);
        let a = engines.get_mut(&addr(1)).unwrap();

        // Direct probe lost
        a.tick(0);
        // No helpers in a two-node mesh: the indirect phase sends nothing
        assert!(a.poll(500).is_empty());
        a.poll(5499);
        assert_eq!(a.view().get(&id("n1")).unwrap().state, NodeState::Alive);

        a.poll(5500);
        assert_eq!(a.view().get(&id("n1")).unwrap().state, NodeState::Suspect);
        assert_eq!(a.counters().probes_failed, 1);

        // n1 refutes with a higher incarnation
        let refutation = GossipUpdate {
            node_id: id("n1"),
            address: addr(2),
            incarnation: 1,
            state: NodeState::Alive,
            is_main_node: false,
        };
        a.apply_gossip(&[refutation], 6000);
        assert_eq!(a.view().get(&id("n1")).unwrap().state, NodeState::Alive);
        assert_eq!(a.view().get(&id("n1")).unwrap().incarnation, 1);
    }

    #[test]
    fn test_dead_only_after_suspicion_expires() {
        let mut engines = cluster(&[("a", 1), ("n1", 2)]);
        let a = engines.get_mut(&addr(1)).unwrap();
        a.tick(0);
        a.poll(500);
        a.poll(5500);
        a.poll(15_499);
        assert_eq!(a.view().get(&id("n1")).unwrap().state, NodeState::Suspect);
        a.poll(15_500);
        assert_eq!(a.view().get(&id("n1")).unwrap().state, NodeState::Dead);

        // Tombstone removed after its TTL
        a.poll(75_500);
        assert!(!a.view().contains(&id("n1")));
    }

    #[test]
    fn test_indirect_probe_relay_saves_target() {
        let mut engines = cluster(&[("a", 1), ("b", 2), ("c", 3)]);

        let out = engines.get_mut(&addr(1)).unwrap().tick(0);
        let target = engines[&addr(1)].probe_target().cloned().unwrap();
        let target_addr = engines[&addr(1)].view().get(&target).unwrap().address;
        let helper_addr = if target_addr == addr(2) { addr(3) } else { addr(2) };

        // The direct ping is lost
        assert_eq!(out[0].to, target_addr);

        let out = engines.get_mut(&addr(1)).unwrap().poll(500);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to, helper_addr);
        assert!(matches!(out[0].message, SwimMessage::PingReq { .. }));

        pump(
            &mut engines,
            out.into_iter().map(|o| (addr(1), o)).collect(),
            &[],
            600,
        );

        let a = &engines[&addr(1)];
        assert_eq!(a.counters().probes_succeeded, 1);
        assert!(a.probe_target().is_none());
        assert_eq!(a.view().get(&target).unwrap().state, NodeState::Alive);
    }

    #[test]
    fn test_suspected_node_refutes_through_gossip() {
        let mut engines = cluster(&[("a", 1), ("b", 2)]);
        // a suspects b
        let a = engines.get_mut(&addr(1)).unwrap();
        a.tick(0);
        a.poll(500);
        a.poll(5500);
        assert_eq!(a.view().get(&id("b")).unwrap().state, NodeState::Suspect);

        // b pings a; a's ACK carries the suspicion; b refutes in its next ping
        for now in [6000, 7000] {
            let out = engines.get_mut(&addr(2)).unwrap().tick(now);
            pump(
                &mut engines,
                out.into_iter().map(|o| (addr(2), o)).collect(),
                &[],
                now,
            );
        }

        let b = &engines[&addr(2)];
        assert_eq!(b.view().local().incarnation, 1);
        let a = &engines[&addr(1)];
        assert_eq!(a.view().get(&id("b")).unwrap().state, NodeState::Alive);
    }

    // ==================== Leave / main node ====================

    #[test]
    fn test_leave_is_gossiped_as_dead() {
        let mut engines = cluster(&[("a", 1), ("b", 2)]);
        let out = engines.get_mut(&addr(1)).unwrap().leave(100);
        assert_eq!(out.len(), 1);
        pump(
            &mut engines,
            out.into_iter().map(|o| (addr(1), o)).collect(),
            &[],
            100,
        );
        let node = engines[&addr(2)].view().get(&id("a")).cloned().unwrap();
        assert_eq!(node.state, NodeState::Dead);
        assert_eq!(node.incarnation, 1);
        assert!(engines.get_mut(&addr(1)).unwrap().tick(1000).is_empty());
    }

    #[test]
    fn test_main_node_flag_gossiped() {
        let mut engines = cluster(&[("a", 1), ("b", 2)]);
        engines.get_mut(&addr(1)).unwrap().set_main_node(true, 10);
        let out = engines.get_mut(&addr(1)).unwrap().tick(1000);
        pump(
            &mut engines,
            out.into_iter().map(|o| (addr(1), o)).collect(),
            &[],
            1000,
        );
        assert!(engines[&addr(2)].view().get(&id("a")).unwrap().is_main_node);
    }

    // ==================== Counters / snapshots ====================

    #[test]
    fn test_decode_failure_counted() {
        let mut a = engine("a", 1);
        assert!(a.handle_datagram(addr(9), b"garbage", 0).is_empty());
        let counters = a.counters();
        assert_eq!(counters.decode_failures, 1);
        assert_eq!(counters.messages_received, 1);
    }

    #[test]
    fn test_snapshot_sorted_and_dirty_tracking() {
        let mut engines = cluster(&[("c", 3), ("a", 1), ("b", 2)]);
        let a = engines.get_mut(&addr(1)).unwrap();
        let snap = a.snapshot_if_changed(0).unwrap();
        let ids: Vec<&str> = snap.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(snap.find(&id("b")).unwrap().address, addr(2));
        assert_eq!(snap.count(NodeState::Alive), 3);
        assert!(a.snapshot_if_changed(0).is_none());
    }
}
