//! Daemon configuration, loaded from `config.json` in the config directory.
//!
//! A missing file is replaced by the defaults, written back for reference.

use anyhow::{Context, Result};
use mesh_core::{ClientId, MeshConfig, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Node id (generated at startup if not set)
    #[serde(default)]
    pub node_id: Option<NodeId>,

    /// Address the client WebSocket server listens on
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Address the SWIM socket binds to; the port comes from `mesh.swim_port`
    #[serde(default = "default_swim_host")]
    pub swim_host: String,

    /// SWIM address announced to peers, if different from the bound one
    #[serde(default)]
    pub advertise: Option<SocketAddr>,

    /// Where `sessions.json` and `pending.json` live
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// How often sessions are swept and pending messages retried
    #[serde(default = "default_maintenance_interval_ms")]
    pub maintenance_interval_ms: u64,

    /// Keys clients present in REGISTER
    #[serde(default)]
    pub api_keys: Vec<ApiKey>,

    /// Static client groups, by name
    #[serde(default)]
    pub groups: BTreeMap<String, Vec<ClientId>>,

    #[serde(default)]
    pub mesh: MeshConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    /// The key value (should be a secure random string)
    pub key: String,
    /// Human-readable name; becomes the principal's subject
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Restrict the key to a single client id
    #[serde(default)]
    pub client_id: Option<ClientId>,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_swim_host() -> String {
    "0.0.0.0".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_maintenance_interval_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            listen: default_listen(),
            swim_host: default_swim_host(),
            advertise: None,
            data_dir: default_data_dir(),
            maintenance_interval_ms: default_maintenance_interval_ms(),
            api_keys: Vec::new(),
            groups: BTreeMap::new(),
            mesh: MeshConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the config directory.
    pub fn load(config_dir: &Path) -> Result<Self> {
        let config_file = config_dir.join("config.json");

        if config_file.exists() {
            let content = std::fs::read_to_string(&config_file)
                .with_context(|| format!("Failed to read config file: {:?}", config_file))?;
            let mut config: DaemonConfig =
                serde_json::from_str(&content).with_context(|| "Failed to parse config.json")?;
            if config.data_dir.is_relative() {
                config.data_dir = config_dir.join(&config.data_dir);
            }
            tracing::info!("Loaded configuration from {:?}", config_file);
            Ok(config)
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_file);
            let mut config = DaemonConfig::default();

            std::fs::create_dir_all(config_dir)
                .with_context(|| format!("Failed to create config directory: {:?}", config_dir))?;

            let content = serde_json::to_string_pretty(&config)?;
            std::fs::write(&config_file, content)
                .with_context(|| format!("Failed to write default config: {:?}", config_file))?;
            tracing::info!("Created default config at {:?}", config_file);

            config.data_dir = config_dir.join(&config.data_dir);
            Ok(config)
        }
    }

    /// The active key matching `key`, if any.
    pub fn find_api_key(&self, key: &str) -> Option<&ApiKey> {
        self.api_keys.iter().find(|k| k.active && k.key == key)
    }

    pub fn swim_bind_addr(&self) -> String {
        format!("{}:{}", self.swim_host, self.mesh.swim_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_config_writes_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = DaemonConfig::load(temp_dir.path()).unwrap();

        assert_eq!(config.listen, "0.0.0.0:8080");
        assert_eq!(config.mesh.swim_port, 7946);
        assert_eq!(config.data_dir, temp_dir.path().join("data"));
        assert!(temp_dir.path().join("config.json").exists());

        // The written file loads back the same way
        let again = DaemonConfig::load(temp_dir.path()).unwrap();
        assert_eq!(again.data_dir, config.data_dir);
    }

    #[test]
    fn test_partial_config() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join("config.json"),
            r#"{
                "listen": "127.0.0.1:9000",
                "api_keys": [
                    {"key": "k1", "name": "laptop"},
                    {"key": "k2", "name": "old", "active": false},
                    {"key": "k3", "name": "phone", "client_id": "phone-1"}
                ],
                "groups": {"team": ["a", "b"]},
                "mesh": {"swim_interval_ms": 250, "offline_queue": {"max_retries": 3}}
            }"#,
        )
        .unwrap();

        let config = DaemonConfig::load(temp_dir.path()).unwrap();
        assert_eq!(config.listen, "127.0.0.1:9000");
        assert_eq!(config.mesh.swim_interval_ms, 250);
        assert_eq!(config.mesh.offline_queue.max_retries, 3);
        assert_eq!(config.mesh.offline_queue.base_delay_ms, 1000);
        assert_eq!(config.groups["team"].len(), 2);

        assert_eq!(config.find_api_key("k1").unwrap().name, "laptop");
        assert!(config.find_api_key("k2").is_none());
        assert_eq!(
            config.find_api_key("k3").unwrap().client_id.as_ref().map(|c| c.as_str()),
            Some("phone-1")
        );
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("config.json"), "[1, 2").unwrap();
        assert!(DaemonConfig::load(temp_dir.path()).is_err());
    }
}
