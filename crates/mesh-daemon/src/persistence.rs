//! JSON-file persistence for known clients and pending messages.
//!
//! Files live in the data directory:
//! - `sessions.json` - one record per client that ever registered
//! - `pending.json` - messages waiting for offline clients
//!
//! The whole file is rewritten on every change (write to a temp file, then
//! rename). Volumes are small: a few thousand clients, bounded queues.

use async_trait::async_trait;
use mesh_core::ClientId;
use mesh_core::offline_queue::PendingMessage;
use mesh_core::store::{ClientRecord, PersistentStore, Result, StoreError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

const SESSIONS_FILE: &str = "sessions.json";
const PENDING_FILE: &str = "pending.json";

#[derive(Default)]
struct Contents {
    clients: HashMap<ClientId, ClientRecord>,
    pending: HashMap<(String, ClientId), PendingMessage>,
}

/// Store backed by two JSON files.
pub struct JsonFileStore {
    dir: PathBuf,
    contents: Mutex<Contents>,
}

impl JsonFileStore {
    /// Open (or create) the store in `dir`, loading whatever is there.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let clients: Vec<ClientRecord> = read_json(&dir.join(SESSIONS_FILE)).await?;
        let pending: Vec<PendingMessage> = read_json(&dir.join(PENDING_FILE)).await?;
        info!(
            dir = %dir.display(),
            clients = clients.len(),
            pending = pending.len(),
            "Opened store"
        );

        let contents = Contents {
            clients: clients
                .into_iter()
                .map(|c| (c.client_id.clone(), c))
                .collect(),
            pending: pending
                .into_iter()
                .map(|m| ((m.message_id.clone(), m.target_client_id.clone()), m))
                .collect(),
        };
        Ok(Self {
            dir,
            contents: Mutex::new(contents),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn write_clients(&self, contents: &Contents) -> Result<()> {
        let mut records: Vec<&ClientRecord> = contents.clients.values().collect();
        records.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        write_json(&self.dir.join(SESSIONS_FILE), &records).await
    }

    async fn write_pending(&self, contents: &Contents) -> Result<()> {
        let mut messages: Vec<&PendingMessage> = contents.pending.values().collect();
        messages.sort_by_key(|m| (m.created_at, m.sequence));
        write_json(&self.dir.join(PENDING_FILE), &messages).await
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(serde_json::from_str(&text)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(StoreError::Io(e)),
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, text).await?;
    tokio::fs::rename(&tmp, path).await?;
    debug!(path = %path.display(), "Wrote store file");
    Ok(())
}

#[async_trait]
impl PersistentStore for JsonFileStore {
    async fn save_client(&self, record: &ClientRecord) -> Result<()> {
        let mut contents = self.contents.lock().await;
        contents
            .clients
            .insert(record.client_id.clone(), record.clone());
        self.write_clients(&contents).await
    }

    async fn load_clients(&self) -> Result<Vec<ClientRecord>> {
        let contents = self.contents.lock().await;
        let mut records: Vec<ClientRecord> = contents.clients.values().cloned().collect();
        records.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        Ok(records)
    }

    async fn save_pending(&self, message: &PendingMessage) -> Result<()> {
        let mut contents = self.contents.lock().await;
        contents.pending.insert(
            (message.message_id.clone(), message.target_client_id.clone()),
            message.clone(),
        );
        self.write_pending(&contents).await
    }

    async fn remove_pending(&self, message_id: &str, target: &ClientId) -> Result<()> {
        let mut contents = self.contents.lock().await;
        let key = (message_id.to_string(), target.clone());
        if contents.pending.remove(&key).is_none() {
            return Ok(());
        }
        self.write_pending(&contents).await
    }

    async fn load_pending(&self) -> Result<Vec<PendingMessage>> {
        let contents = self.contents.lock().await;
        let mut messages: Vec<PendingMessage> = contents.pending.values().cloned().collect();
        messages.sort_by_key(|m| (m.created_at, m.sequence));
        Ok(messages)
    }
}
