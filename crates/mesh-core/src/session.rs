//! Session registry: live client sessions and their heartbeat deadlines.
//!
//! A session is born when a transport is accepted (`Connecting`), becomes
//! `Authenticated` on a successful REGISTER, `Active` on its first heartbeat
//! and `Disconnected` when the transport goes away or stops beating. Sessions
//! linger in `Disconnected` for a grace period before eviction.
//!
//! At most one session per client id holds a live transport. A newer
//! registration supersedes the older one and hands its transport back to the
//! caller for closing.
//!
//! All maps are `DashMap`s; no operation holds a shard guard while touching
//! another entry of the same map.

use crate::collaborators::Principal;
use crate::config::MeshConfig;
use crate::error::{MeshError, Result};
use crate::id::{ClientId, SessionId};
use crate::offline_queue::ClientDirectory;
use crate::store::ClientRecord;
use crate::transport::{CloseReason, ConnectionId, SessionTransport};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Connecting,
    Authenticated,
    Active,
    Disconnected,
}

impl SessionState {
    /// Registered and not yet disconnected.
    pub fn is_registered(&self) -> bool {
        matches!(self, Self::Authenticated | Self::Active)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "CONNECTING",
            Self::Authenticated => "AUTHENTICATED",
            Self::Active => "ACTIVE",
            Self::Disconnected => "DISCONNECTED",
        };
        f.write_str(s)
    }
}

struct Session {
    client_id: Option<ClientId>,
    state: SessionState,
    connection_id: ConnectionId,
    connected_at: u64,
    last_activity_at: u64,
    last_heartbeat_at: u64,
    disconnected_at: Option<u64>,
    capabilities: BTreeSet<String>,
    transport: Option<Arc<dyn SessionTransport>>,
}

impl Session {
    fn info(&self, session_id: &SessionId) -> SessionInfo {
        SessionInfo {
            session_id: session_id.clone(),
            client_id: self.client_id.clone(),
            state: self.state,
            connection_id: self.connection_id,
            connected_at: self.connected_at,
            last_activity_at: self.last_activity_at,
            capabilities: self.capabilities.clone(),
        }
    }

    fn release(&mut self, now_ms: u64) -> Option<Arc<dyn SessionTransport>> {
        self.state = SessionState::Disconnected;
        self.disconnected_at = Some(now_ms);
        self.transport.take()
    }
}

/// Read-only view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub client_id: Option<ClientId>,
    pub state: SessionState,
    pub connection_id: ConnectionId,
    pub connected_at: u64,
    pub last_activity_at: u64,
    pub capabilities: BTreeSet<String>,
}

/// Result of a successful registration.
pub struct Registration {
    pub session_id: SessionId,
    /// Transport of the session this registration replaced, to be closed
    pub superseded: Option<Arc<dyn SessionTransport>>,
    pub previous_session: Option<SessionId>,
}

/// A live session eligible for delivery.
#[derive(Clone)]
pub struct ActiveSession {
    pub session_id: SessionId,
    pub client_id: ClientId,
    pub transport: Arc<dyn SessionTransport>,
}

/// Outcome of one [`SessionRegistry::sweep`].
#[derive(Default)]
pub struct SweepReport {
    /// Transports to close, with the reason.
    pub timed_out: Vec<(SessionId, CloseReason, Arc<dyn SessionTransport>)>,
    pub evicted: Vec<SessionId>,
}

pub struct SessionRegistry {
    heartbeat_timeout_ms: u64,
    disconnect_grace_ms: u64,
    sessions: DashMap<SessionId, Session>,
    by_connection: DashMap<ConnectionId, SessionId>,
    /// Latest session per client, live or lingering
    by_client: DashMap<ClientId, SessionId>,
    /// Every client that ever registered, with its owning subject
    known_clients: DashMap<ClientId, String>,
}

impl SessionRegistry {
    pub fn new(config: &MeshConfig) -> Self {
        Self {
            heartbeat_timeout_ms: config.heartbeat_timeout_ms,
            disconnect_grace_ms: config.disconnect_grace_ms,
            sessions: DashMap::new(),
            by_connection: DashMap::new(),
            by_client: DashMap::new(),
            known_clients: DashMap::new(),
        }
    }

    /// Track a freshly accepted transport. The provisional session id is
    /// replaced on registration.
    pub fn accept(&self, transport: Arc<dyn SessionTransport>, now_ms: u64) -> SessionId {
        let session_id = SessionId::generate();
        let connection_id = transport.connection_id();
        self.sessions.insert(
            session_id.clone(),
            Session {
                client_id: None,
                state: SessionState::Connecting,
                connection_id,
                connected_at: now_ms,
                last_activity_at: now_ms,
                last_heartbeat_at: now_ms,
                disconnected_at: None,
                capabilities: BTreeSet::new(),
                transport: Some(transport),
            },
        );
        self.by_connection.insert(connection_id, session_id.clone());
        debug!(connection = connection_id, session = %session_id, "Connection accepted");
        session_id
    }

    /// Bind the session on `connection_id` to `client_id`.
    ///
    /// The principal must already be authenticated. Registration is refused
    /// when the principal is bound to another client id, or when the client id
    /// belongs to a different subject.
    pub fn register(
        &self,
        connection_id: ConnectionId,
        client_id: &ClientId,
        principal: &Principal,
        capabilities: impl IntoIterator<Item = String>,
        now_ms: u64,
    ) -> Result<Registration> {
        if let Some(bound) = &principal.client_id
            && bound != client_id
        {
            return Err(MeshError::AuthRejected(format!(
                "credentials are bound to client {bound}"
            )));
        }
        if let Some(owner) = self.known_clients.get(client_id)
            && *owner != principal.subject
        {
            return Err(MeshError::AuthRejected(format!(
                "client {client_id} belongs to another principal"
            )));
        }

        let provisional = self
            .by_connection
            .get(&connection_id)
            .map(|e| e.value().clone())
            .ok_or(MeshError::UnknownConnection(connection_id))?;
        let (_, mut session) = self
            .sessions
            .remove(&provisional)
            .ok_or_else(|| MeshError::UnknownSession(provisional.clone()))?;

        // Re-registering under another client id releases the old binding
        if let Some(old_client) = &session.client_id
            && old_client != client_id
        {
            self.by_client.remove_if(old_client, |_, sid| *sid == provisional);
        }

        let session_id = SessionId::generate();
        session.client_id = Some(client_id.clone());
        session.state = SessionState::Authenticated;
        session.capabilities = capabilities.into_iter().collect();
        session.last_activity_at = now_ms;
        session.last_heartbeat_at = now_ms;
        self.sessions.insert(session_id.clone(), session);
        self.by_connection.insert(connection_id, session_id.clone());

        let previous = self.by_client.insert(client_id.clone(), session_id.clone());
        self.known_clients
            .insert(client_id.clone(), principal.subject.clone());

        let mut superseded = None;
        let previous_session = previous.filter(|sid| *sid != provisional);
        if let Some(old_id) = &previous_session
            && let Some(mut old) = self.sessions.get_mut(old_id)
        {
            let old_connection = old.connection_id;
            if old.state != SessionState::Disconnected {
                info!(client = %client_id, old_session = %old_id, "Session superseded");
                superseded = old.release(now_ms);
            }
            drop(old);
            self.by_connection
                .remove_if(&old_connection, |_, sid| sid == old_id);
        }

        info!(client = %client_id, session = %session_id, "Client registered");
        Ok(Registration {
            session_id,
            superseded,
            previous_session,
        })
    }

    /// Reset the heartbeat deadline. Returns `true` when this heartbeat
    /// activated the session.
    pub fn heartbeat(&self, session_id: &SessionId, now_ms: u64) -> Result<bool> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| MeshError::UnknownSession(session_id.clone()))?;

        match session.state {
            SessionState::Connecting | SessionState::Disconnected => {
                Err(MeshError::NotRegistered(session_id.clone()))
            }
            SessionState::Authenticated | SessionState::Active => {
                let activated = session.state == SessionState::Authenticated;
                session.state = SessionState::Active;
                session.last_heartbeat_at = now_ms;
                session.last_activity_at = now_ms;
                if activated {
                    info!(session = %session_id, "Session active");
                } else {
                    trace!(session = %session_id, "Heartbeat");
                }
                Ok(activated)
            }
        }
    }

    pub fn touch_activity(&self, session_id: &SessionId, now_ms: u64) -> Result<()> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| MeshError::UnknownSession(session_id.clone()))?;
        session.last_activity_at = now_ms;
        Ok(())
    }

    /// Mark a session disconnected and hand back its transport, if it still
    /// had one. Messages for the client queue from here on.
    pub fn disconnect(
        &self,
        session_id: &SessionId,
        reason: CloseReason,
        now_ms: u64,
    ) -> Option<Arc<dyn SessionTransport>> {
        let mut session = self.sessions.get_mut(session_id)?;
        if session.state == SessionState::Disconnected {
            return None;
        }
        let connection_id = session.connection_id;
        let client = session.client_id.clone();
        let transport = session.release(now_ms);
        drop(session);

        self.by_connection
            .remove_if(&connection_id, |_, sid| sid == session_id);
        match client {
            Some(client) => {
                info!(client = %client, session = %session_id, reason = %reason, "Session disconnected")
            }
            // Never registered, nothing worth keeping
            None => {
                self.sessions.remove(session_id);
                debug!(session = %session_id, reason = %reason, "Unregistered connection dropped");
            }
        }
        transport
    }

    /// The transport behind `connection_id` went away.
    pub fn connection_closed(&self, connection_id: ConnectionId, now_ms: u64) -> Option<SessionId> {
        let session_id = self.by_connection.get(&connection_id)?.value().clone();
        self.disconnect(&session_id, CloseReason::ClientClosed, now_ms);
        Some(session_id)
    }

    /// Time out silent sessions and evict lingering ones.
    pub fn sweep(&self, now_ms: u64) -> SweepReport {
        let mut expired = Vec::new();
        let mut stale = Vec::new();

        for entry in self.sessions.iter() {
            let session = entry.value();
            match session.state {
                SessionState::Connecting => {
                    if now_ms.saturating_sub(session.connected_at) >= self.heartbeat_timeout_ms {
                        expired.push((entry.key().clone(), CloseReason::RegistrationTimeout));
                    }
                }
                SessionState::Authenticated | SessionState::Active => {
                    if now_ms.saturating_sub(session.last_heartbeat_at) >= self.heartbeat_timeout_ms
                    {
                        expired.push((entry.key().clone(), CloseReason::HeartbeatTimeout));
                    }
                }
                SessionState::Disconnected => {
                    let since = session.disconnected_at.unwrap_or(now_ms);
                    if now_ms.saturating_sub(since) >= self.disconnect_grace_ms {
                        stale.push(entry.key().clone());
                    }
                }
            }
        }

        let mut report = SweepReport::default();
        for (session_id, reason) in expired {
            warn!(session = %session_id, reason = %reason, "Session timed out");
            if let Some(transport) = self.disconnect(&session_id, reason, now_ms) {
                report.timed_out.push((session_id, reason, transport));
            }
        }
        for session_id in stale {
            if let Some((_, session)) = self.sessions.remove(&session_id) {
                if let Some(client) = session.client_id {
                    self.by_client.remove_if(&client, |_, sid| *sid == session_id);
                }
                debug!(session = %session_id, "Session evicted");
                report.evicted.push(session_id);
            }
        }
        report
    }

    /// Remember clients from an earlier run.
    pub fn restore_known(&self, records: &[ClientRecord]) {
        for record in records {
            self.known_clients
                .insert(record.client_id.clone(), record.subject.clone());
        }
    }

    pub fn session(&self, session_id: &SessionId) -> Option<SessionInfo> {
        self.sessions.get(session_id).map(|s| s.info(session_id))
    }

    pub fn session_for_connection(&self, connection_id: ConnectionId) -> Option<SessionInfo> {
        let session_id = self.by_connection.get(&connection_id)?.value().clone();
        self.session(&session_id)
    }

    /// The client's current session, whatever its state.
    pub fn session_for_client(&self, client: &ClientId) -> Option<SessionInfo> {
        let session_id = self.by_client.get(client)?.value().clone();
        self.session(&session_id)
    }

    /// The client's session if it is `Active`.
    pub fn active_session(&self, client: &ClientId) -> Option<ActiveSession> {
        let session_id = self.by_client.get(client)?.value().clone();
        let session = self.sessions.get(&session_id)?;
        if session.state != SessionState::Active {
            return None;
        }
        let transport = session.transport.clone()?;
        Some(ActiveSession {
            session_id,
            client_id: client.clone(),
            transport,
        })
    }

    /// Transport of a registered session.
    pub fn transport_for_session(&self, session_id: &SessionId) -> Option<Arc<dyn SessionTransport>> {
        let session = self.sessions.get(session_id)?;
        if !session.state.is_registered() {
            return None;
        }
        session.transport.clone()
    }

    pub fn is_online(&self, client: &ClientId) -> bool {
        self.active_session(client).is_some()
    }

    /// Snapshot of every `Active` session.
    pub fn active_sessions(&self) -> Vec<ActiveSession> {
        self.sessions
            .iter()
            .filter(|e| e.state == SessionState::Active)
            .filter_map(|e| {
                Some(ActiveSession {
                    session_id: e.key().clone(),
                    client_id: e.client_id.clone()?,
                    transport: e.transport.clone()?,
                })
            })
            .collect()
    }

    /// Every transport still attached to a session.
    pub fn live_transports(&self) -> Vec<Arc<dyn SessionTransport>> {
        self.sessions
            .iter()
            .filter_map(|e| e.transport.clone())
            .collect()
    }

    pub fn count(&self, state: SessionState) -> usize {
        self.sessions.iter().filter(|e| e.state == state).count()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl ClientDirectory for SessionRegistry {
    fn is_known(&self, client: &ClientId) -> bool {
        self.known_clients.contains_key(client)
    }
}
