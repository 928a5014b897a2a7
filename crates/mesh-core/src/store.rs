//! PersistentStore trait: durability for known clients and pending messages.
//!
//! Implementations:
//! - `InMemoryStore` - For testing and single-run deployments
//! - `JsonFileStore` (in mesh-daemon) - JSON files under the data directory

use crate::id::{ClientId, SessionId};
use crate::offline_queue::PendingMessage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A client that has registered at least once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRecord {
    pub client_id: ClientId,
    /// Principal that owns this client id
    pub subject: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_session_id: Option<SessionId>,
    pub last_seen_at: u64,
}

#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Insert or replace a client record.
    async fn save_client(&self, record: &ClientRecord) -> Result<()>;

    async fn load_clients(&self) -> Result<Vec<ClientRecord>>;

    /// Insert or replace a pending message, keyed by message id and target.
    async fn save_pending(&self, message: &PendingMessage) -> Result<()>;

    /// Remove a pending message. Missing entries are not an error.
    async fn remove_pending(&self, message_id: &str, target: &ClientId) -> Result<()>;

    async fn load_pending(&self) -> Result<Vec<PendingMessage>>;
}

type PendingKey = (String, ClientId);

/// In-memory store. Nothing survives a restart.
#[derive(Default)]
pub struct InMemoryStore {
    clients: RwLock<HashMap<ClientId, ClientRecord>>,
    pending: RwLock<HashMap<PendingKey, PendingMessage>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl PersistentStore for InMemoryStore {
    async fn save_client(&self, record: &ClientRecord) -> Result<()> {
        let mut clients = self.clients.write().unwrap_or_else(|e| e.into_inner());
        clients.insert(record.client_id.clone(), record.clone());
        Ok(())
    }

    async fn load_clients(&self) -> Result<Vec<ClientRecord>> {
        let clients = self.clients.read().unwrap_or_else(|e| e.into_inner());
        let mut records: Vec<_> = clients.values().cloned().collect();
        records.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        Ok(records)
    }

    async fn save_pending(&self, message: &PendingMessage) -> Result<()> {
        let mut pending = self.pending.write().unwrap_or_else(|e| e.into_inner());
        pending.insert(
            (message.message_id.clone(), message.target_client_id.clone()),
            message.clone(),
        );
        Ok(())
    }

    async fn remove_pending(&self, message_id: &str, target: &ClientId) -> Result<()> {
        let mut pending = self.pending.write().unwrap_or_else(|e| e.into_inner());
        pending.remove(&(message_id.to_string(), target.clone()));
        Ok(())
    }

    async fn load_pending(&self) -> Result<Vec<PendingMessage>> {
        let pending = self.pending.read().unwrap_or_else(|e| e.into_inner());
        let mut messages: Vec<_> = pending.values().cloned().collect();
        messages.sort_by_key(|m| (m.created_at, m.sequence));
        Ok(messages)
    }
}
