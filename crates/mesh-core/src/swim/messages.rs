//! SWIM control messages and their datagram codec.
//!
//! Messages travel as single UDP datagrams encoded with bincode. Every message
//! can carry a bounded batch of piggybacked gossip updates.

use crate::id::NodeId;
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use thiserror::Error;

/// Largest datagram we send or accept.
pub const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// Liveness state of a node.
///
/// Variant order is the severity order used by the merge rule:
/// `Alive < Suspect < Dead`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    Alive,
    Suspect,
    Dead,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Alive => f.write_str("ALIVE"),
            Self::Suspect => f.write_str("SUSPECT"),
            Self::Dead => f.write_str("DEAD"),
        }
    }
}

/// One membership claim: "node `node_id` at `incarnation` is `state`".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipUpdate {
    pub node_id: NodeId,
    pub address: SocketAddr,
    pub incarnation: u64,
    pub state: NodeState,
    /// Whether the node has nominated itself as main node.
    pub is_main_node: bool,
}

impl GossipUpdate {
    /// The ordering key used by the merge rule.
    pub fn rank(&self) -> (u64, NodeState) {
        (self.incarnation, self.state)
    }
}

/// SWIM protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwimMessage {
    /// Direct probe.
    Ping {
        seq: u64,
        from: NodeId,
        gossip: Vec<GossipUpdate>,
    },

    /// Answer to a ping. When relayed for an indirect probe, `from` is the
    /// probed node and `seq` is the requester's sequence number.
    Ack {
        seq: u64,
        from: NodeId,
        gossip: Vec<GossipUpdate>,
    },

    /// Ask the recipient to ping `target` on the sender's behalf.
    PingReq {
        seq: u64,
        from: NodeId,
        target: NodeId,
        target_addr: SocketAddr,
        gossip: Vec<GossipUpdate>,
    },
}

impl SwimMessage {
    pub fn gossip(&self) -> &[GossipUpdate] {
        match self {
            Self::Ping { gossip, .. } | Self::Ack { gossip, .. } | Self::PingReq { gossip, .. } => {
                gossip
            }
        }
    }

    pub fn sender(&self) -> &NodeId {
        match self {
            Self::Ping { from, .. } | Self::Ack { from, .. } | Self::PingReq { from, .. } => from,
        }
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ping { .. } => "PING",
            Self::Ack { .. } => "ACK",
            Self::PingReq { .. } => "PING_REQ",
        }
    }

    /// Encode into a single datagram.
    pub fn encode(&self) -> Result<Vec<u8>, SwimCodecError> {
        let bytes = codec().serialize(self)?;
        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(SwimCodecError::TooLarge(bytes.len()));
        }
        Ok(bytes)
    }

    /// Decode a datagram.
    pub fn decode(data: &[u8]) -> Result<Self, SwimCodecError> {
        if data.len() > MAX_DATAGRAM_SIZE {
            return Err(SwimCodecError::TooLarge(data.len()));
        }
        Ok(codec().deserialize(data)?)
    }
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_DATAGRAM_SIZE as u64)
}

#[derive(Debug, Error)]
pub enum SwimCodecError {
    #[error("datagram of {0} bytes exceeds the maximum size")]
    TooLarge(usize),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(id: &str, inc: u64, state: NodeState) -> GossipUpdate {
        GossipUpdate {
            node_id: id.parse().unwrap(),
            address: "127.0.0.1:7946".parse().unwrap(),
            incarnation: inc,
            state,
            is_main_node: false,
        }
    }

    #[test]
    fn test_state_severity_order() {
        assert!(NodeState::Alive < NodeState::Suspect);
        assert!(NodeState::Suspect < NodeState::Dead);
        assert!(update("a", 2, NodeState::Alive).rank() > update("a", 1, NodeState::Dead).rank());
    }

    #[test]
    fn test_codec_preserves_ping_req() {
        let msg = SwimMessage::PingReq {
            seq: 42,
            from: "node-a".parse().unwrap(),
            target: "node-b".parse().unwrap(),
            target_addr: "10.0.0.2:7946".parse().unwrap(),
            gossip: vec![update("node-c", 3, NodeState::Suspect)],
        };
        let bytes = msg.encode().unwrap();
        assert_eq!(SwimMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(SwimMessage::decode(&[0xff, 0xff, 0xff, 0xff, 0xff]).is_err());
        assert!(SwimMessage::decode(&[]).is_err());
    }

    #[test]
    fn test_decode_rejects_invalid_node_id() {
        let msg = SwimMessage::Ack {
            seq: 1,
            from: "node-a".parse().unwrap(),
            gossip: vec![],
        };
        let mut bytes = msg.encode().unwrap();
        // Corrupt the id into whitespace
        let pos = bytes.iter().position(|&b| b == b'n').unwrap();
        bytes[pos] = b' ';
        assert!(SwimMessage::decode(&bytes).is_err());
    }

    #[test]
    fn test_oversized_datagram_rejected() {
        let data = vec![0u8; MAX_DATAGRAM_SIZE + 1];
        assert!(matches!(
            SwimMessage::decode(&data),
            Err(SwimCodecError::TooLarge(_))
        ));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(NodeState::Suspect.to_string(), "SUSPECT");
        assert_eq!(serde_json::to_string(&NodeState::Dead).unwrap(), "\"DEAD\"");
    }
}
