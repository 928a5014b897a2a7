//! Configuration values consumed by the mesh core.
//!
//! Loading is the caller's job (the daemon reads `config.json`); this module
//! only defines the shape and the defaults.

use crate::id::NodeId;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    /// UDP port for SWIM traffic
    #[serde(default = "default_swim_port")]
    pub swim_port: u16,

    /// Probe round period
    #[serde(default = "default_swim_interval_ms")]
    pub swim_interval_ms: u64,

    /// How long to wait for a direct ACK before probing indirectly
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Time from the first missed probe until the target is suspected
    #[serde(default = "default_suspect_timeout_ms")]
    pub suspect_timeout_ms: u64,

    /// Time a node may stay suspected before it is declared dead
    #[serde(default = "default_dead_timeout_ms")]
    pub dead_timeout_ms: u64,

    /// How long dead entries are kept before removal from the view
    #[serde(default = "default_tombstone_ttl_ms")]
    pub tombstone_ttl_ms: u64,

    /// Number of peers asked to probe on our behalf (k)
    #[serde(default = "default_indirect_probes")]
    pub indirect_probes: usize,

    /// Maximum gossip updates piggybacked per SWIM message
    #[serde(default = "default_gossip_fanout")]
    pub gossip_fanout: usize,

    /// Times each gossip update is piggybacked before it is retired
    #[serde(default = "default_gossip_retransmit")]
    pub gossip_retransmit: u32,

    /// How often the local node re-gossips its own entry
    #[serde(default = "default_self_gossip_interval_ms")]
    pub self_gossip_interval_ms: u64,

    /// Local hint: nominate this node as main node on startup
    #[serde(default)]
    pub is_main_node: bool,

    /// Always elect this node as main while it is alive
    #[serde(default)]
    pub pinned_main_node: Option<NodeId>,

    /// SWIM addresses to join on startup
    #[serde(default)]
    pub seeds: Vec<SocketAddr>,

    /// Expected client heartbeat period
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Silence after which a session is force-disconnected
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,

    /// Time a disconnected session is kept before eviction
    #[serde(default = "default_disconnect_grace_ms")]
    pub disconnect_grace_ms: u64,

    /// Consecutive malformed envelopes tolerated before closing a connection
    #[serde(default = "default_max_malformed")]
    pub max_malformed: u32,

    /// Size of the duplicate message-id window
    #[serde(default = "default_max_recent_ids")]
    pub max_recent_ids: usize,

    #[serde(default)]
    pub offline_queue: OfflineQueueConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineQueueConfig {
    /// First retry delay; doubles on every retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for the retry delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Failed retries before a message is dropped
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Lifetime of a queued message (0 = no expiry)
    #[serde(default = "default_message_ttl_ms")]
    pub message_ttl_ms: u64,
}

impl Default for OfflineQueueConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_retries: default_max_retries(),
            message_ttl_ms: default_message_ttl_ms(),
        }
    }
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            swim_port: default_swim_port(),
            swim_interval_ms: default_swim_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            suspect_timeout_ms: default_suspect_timeout_ms(),
            dead_timeout_ms: default_dead_timeout_ms(),
            tombstone_ttl_ms: default_tombstone_ttl_ms(),
            indirect_probes: default_indirect_probes(),
            gossip_fanout: default_gossip_fanout(),
            gossip_retransmit: default_gossip_retransmit(),
            self_gossip_interval_ms: default_self_gossip_interval_ms(),
            is_main_node: false,
            pinned_main_node: None,
            seeds: Vec::new(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            disconnect_grace_ms: default_disconnect_grace_ms(),
            max_malformed: default_max_malformed(),
            max_recent_ids: default_max_recent_ids(),
            offline_queue: OfflineQueueConfig::default(),
        }
    }
}

impl MeshConfig {
    pub fn swim_interval(&self) -> Duration {
        Duration::from_millis(self.swim_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

fn default_swim_port() -> u16 {
    7946
}

fn default_swim_interval_ms() -> u64 {
    1000
}

fn default_probe_timeout_ms() -> u64 {
    500
}

fn default_suspect_timeout_ms() -> u64 {
    5000
}

fn default_dead_timeout_ms() -> u64 {
    10_000
}

fn default_tombstone_ttl_ms() -> u64 {
    60_000
}

fn default_indirect_probes() -> usize {
    3
}

fn default_gossip_fanout() -> usize {
    8
}

fn default_gossip_retransmit() -> u32 {
    4
}

fn default_self_gossip_interval_ms() -> u64 {
    5000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    90_000 // three missed beats
}

fn default_disconnect_grace_ms() -> u64 {
    60_000
}

fn default_max_malformed() -> u32 {
    5
}

fn default_max_recent_ids() -> usize {
    10_000
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    300_000
}

fn default_max_retries() -> u32 {
    5
}

fn default_message_ttl_ms() -> u64 {
    24 * 3600 * 1000 // 1 day
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_uses_defaults() {
        let config: MeshConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.swim_port, 7946);
        assert_eq!(config.suspect_timeout_ms, 5000);
        assert_eq!(config.offline_queue.max_retries, 5);
        assert!(config.seeds.is_empty());
    }

    #[test]
    fn test_partial_nested_override() {
        let json = r#"{"swimIntervalMs": 1, "offline_queue": {"max_retries": 3}}"#;
        let config: MeshConfig = serde_json::from_str(json).unwrap();
        // Unknown keys are ignored, known nested keys override
        assert_eq!(config.swim_interval_ms, 1000);
        assert_eq!(config.offline_queue.max_retries, 3);
        assert_eq!(config.offline_queue.base_delay_ms, 1000);
    }

    #[test]
    fn test_seeds_parse_as_socket_addrs() {
        let json = r#"{"seeds": ["127.0.0.1:7946", "10.0.0.2:7000"]}"#;
        let config: MeshConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.seeds.len(), 2);
        assert_eq!(config.seeds[1].port(), 7000);
    }
}
