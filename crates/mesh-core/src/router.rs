//! Mesh router: the single entry and exit point for client envelopes.
//!
//! Every inbound text frame goes through [`MeshRouter::handle_inbound`]:
//!
//! 1. Parse and validate (closed type set, typed payload, ids)
//! 2. REGISTER is handled without a session; everything else needs one
//! 3. HEARTBEAT is always answered and never routed
//! 4. Message ids a sender already used are acknowledged and dropped
//! 5. Dispatch by target: client, group, all, or (untargeted MESSAGE)
//!    the completion provider
//!
//! Delivery to one client is serialized by a per-client async lock, and a
//! client with queued messages gets new ones queued behind them, so a
//! reconnecting client sees its backlog before anything newer.

use crate::clock::Clock;
use crate::collaborators::{
    AuthValidator, CompletionOutput, CompletionProvider, CompletionRequest, GroupResolver,
};
use crate::config::MeshConfig;
use crate::coordinator::NodeCoordinator;
use crate::dedup::RecentIds;
use crate::error::{ErrorKind, MeshError};
use crate::id::{ClientId, NodeId, SessionId};
use crate::offline_queue::{ClientDirectory, OfflineQueue, PendingMessage};
use crate::protocol::{
    Envelope, ErrorPayload, EventPayload, HeartbeatPayload, MessagePayload,
    PROTOCOL_VERSION, Payload, RegisterAckPayload, RegisterPayload, ResponsePayload, Source,
    StreamChunkPayload, StreamEndPayload, Target, WelcomePayload,
};
use crate::session::{ActiveSession, SessionInfo, SessionRegistry};
use crate::store::{ClientRecord, PersistentStore};
use crate::swim::NodeState;
use crate::transport::{CloseReason, ConnectionId, SessionTransport};
use dashmap::DashMap;
use futures::StreamExt;
use futures::lock::Mutex as AsyncMutex;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// What the connection handler should do after an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    /// The router already closed the transport; stop reading.
    Close(CloseReason),
}

/// How a routed envelope ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Queued,
    /// Target never registered; dropped.
    Unknown,
}

/// External capabilities the router calls into.
#[derive(Clone)]
pub struct Collaborators {
    pub auth: Arc<dyn AuthValidator>,
    pub provider: Arc<dyn CompletionProvider>,
    pub groups: Arc<dyn GroupResolver>,
    pub store: Arc<dyn PersistentStore>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshStatus {
    pub local_node_id: NodeId,
    pub main_node_id: Option<NodeId>,
    pub is_main_node: bool,
    pub alive_nodes: usize,
    pub active_sessions: usize,
    pub pending_messages: usize,
}

pub struct MeshRouter {
    config: MeshConfig,
    registry: SessionRegistry,
    queue: OfflineQueue,
    recent: RecentIds,
    coordinator: Arc<NodeCoordinator>,
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
    delivery_locks: DashMap<ClientId, Arc<AsyncMutex<()>>>,
    /// Consecutive malformed envelopes per connection
    malformed: DashMap<ConnectionId, u32>,
}

impl MeshRouter {
    pub fn new(
        config: MeshConfig,
        coordinator: Arc<NodeCoordinator>,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry: SessionRegistry::new(&config),
            queue: OfflineQueue::new(config.offline_queue.clone()),
            recent: RecentIds::new(config.max_recent_ids),
            config,
            coordinator,
            collaborators,
            clock,
            delivery_locks: DashMap::new(),
            malformed: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    pub fn coordinator(&self) -> &Arc<NodeCoordinator> {
        &self.coordinator
    }

    /// Load known clients and pending messages from the store.
    pub async fn restore(&self) -> crate::error::Result<()> {
        let clients = self.collaborators.store.load_clients().await?;
        self.registry.restore_known(&clients);
        let pending = self.collaborators.store.load_pending().await?;
        let count = pending.len();
        self.queue.restore(pending);
        info!(clients = clients.len(), pending = count, "Restored router state");
        Ok(())
    }

    // ==================== Connection lifecycle ====================

    /// Track a new connection and greet it.
    pub async fn connection_opened(&self, transport: Arc<dyn SessionTransport>) {
        let now = self.clock.now_ms();
        self.registry.accept(Arc::clone(&transport), now);

        let welcome = Envelope::new(
            Payload::Welcome(WelcomePayload {
                node_id: self.coordinator.local_id(),
                is_main_node: self.coordinator.is_main_node(),
                version: PROTOCOL_VERSION,
                heartbeat_interval_ms: self.config.heartbeat_interval_ms,
            }),
            now,
        );
        send_logged(&*transport, &welcome).await;
    }

    /// The transport went away on its own.
    pub fn connection_closed(&self, connection_id: ConnectionId) {
        self.malformed.remove(&connection_id);
        self.registry
            .connection_closed(connection_id, self.clock.now_ms());
    }

    /// Process one inbound text frame.
    pub async fn handle_inbound(&self, transport: &dyn SessionTransport, raw: &str) -> Disposition {
        let now = self.clock.now_ms();
        let connection_id = transport.connection_id();

        let envelope = match Envelope::from_json(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                let in_reply_to = Envelope::peek_message_id(raw);
                return self
                    .malformed(transport, in_reply_to, e.to_string(), now)
                    .await;
            }
        };

        if envelope.kind().is_server_only() {
            let message = format!("{} may only be sent by the mesh", envelope.kind());
            return self
                .malformed(transport, Some(envelope.message_id.clone()), message, now)
                .await;
        }
        self.malformed.remove(&connection_id);

        if envelope.version != PROTOCOL_VERSION {
            warn!(
                connection = connection_id,
                version = envelope.version,
                expected = PROTOCOL_VERSION,
                "Envelope version mismatch"
            );
        }

        if let Payload::Register(payload) = &envelope.payload {
            let payload = payload.clone();
            return self.handle_register(transport, &envelope, payload, now).await;
        }

        let session = match self.authorize(connection_id, &envelope) {
            Ok(session) => session,
            Err(err) => {
                if let Payload::Heartbeat(payload) = &envelope.payload {
                    // Acked without a session; nothing is activated
                    debug!(connection = connection_id, error = %err, "Heartbeat outside a session");
                    let ack = reply_to(&envelope, Payload::HeartbeatAck(payload.clone()), now);
                    send_logged(transport, &ack).await;
                    return Disposition::Continue;
                }
                warn!(connection = connection_id, error = %err, "Rejected envelope");
                self.send_error(transport, &envelope, &err, now).await;
                return Disposition::Continue;
            }
        };
        let _ = self.registry.touch_activity(&session.session_id, now);

        if let Payload::Heartbeat(payload) = &envelope.payload {
            self.handle_heartbeat(transport, &envelope, &session, payload, now)
                .await;
            return Disposition::Continue;
        }

        let sender = session
            .client_id
            .as_ref()
            .map_or(session.session_id.as_str(), ClientId::as_str);
        if !self.recent.check_and_insert(sender, &envelope.message_id) {
            debug!(message_id = %envelope.message_id, "Duplicate envelope");
            let ack = reply_to(
                &envelope,
                Payload::Event(EventPayload {
                    event: "duplicate".into(),
                    data: json!({ "messageId": envelope.message_id }),
                }),
                now,
            );
            send_logged(transport, &ack).await;
            return Disposition::Continue;
        }

        self.dispatch(transport, envelope, &session, now).await;
        Disposition::Continue
    }

    /// Count a malformed envelope and close the connection once the budget
    /// is spent.
    async fn malformed(
        &self,
        transport: &dyn SessionTransport,
        in_reply_to: Option<String>,
        message: String,
        now: u64,
    ) -> Disposition {
        let connection_id = transport.connection_id();
        let count = {
            let mut count = self.malformed.entry(connection_id).or_insert(0);
            *count += 1;
            *count
        };
        warn!(connection = connection_id, count, error = %message, "Malformed envelope");

        let error = Envelope::new(
            Payload::Error(ErrorPayload {
                kind: ErrorKind::MalformedEnvelope,
                error_message: message,
            }),
            now,
        )
        .with_in_reply_to(in_reply_to);
        send_logged(transport, &error).await;

        if count > self.config.max_malformed {
            warn!(connection = connection_id, "Too many malformed envelopes, closing");
            self.malformed.remove(&connection_id);
            transport.close(CloseReason::ProtocolViolation).await;
            return Disposition::Close(CloseReason::ProtocolViolation);
        }
        Disposition::Continue
    }

    /// The registered session behind a connection, checked against the
    /// envelope's claimed source.
    fn authorize(
        &self,
        connection_id: ConnectionId,
        envelope: &Envelope,
    ) -> Result<SessionInfo, MeshError> {
        let session = self
            .registry
            .session_for_connection(connection_id)
            .ok_or(MeshError::UnknownConnection(connection_id))?;

        if let Some(claimed) = &envelope.source.session_id
            && *claimed != session.session_id
        {
            return Err(MeshError::UnknownSession(claimed.clone()));
        }
        if !session.state.is_registered() {
            return Err(MeshError::NotRegistered(session.session_id));
        }
        Ok(session)
    }

    // ==================== REGISTER / HEARTBEAT ====================

    async fn handle_register(
        &self,
        transport: &dyn SessionTransport,
        envelope: &Envelope,
        payload: RegisterPayload,
        now: u64,
    ) -> Disposition {
        let Some(client_id) = envelope.source.client_id.clone() else {
            return self
                .reject_registration(transport, envelope, "source.clientId is required", now)
                .await;
        };

        let principal = match self.collaborators.auth.validate(&payload.token).await {
            Ok(principal) => principal,
            Err(rejected) => {
                info!(client = %client_id, reason = %rejected, "Registration rejected");
                return self
                    .reject_registration(transport, envelope, &rejected.to_string(), now)
                    .await;
            }
        };

        let capabilities = payload.capabilities.clone();
        let registration = match self.registry.register(
            transport.connection_id(),
            &client_id,
            &principal,
            payload.capabilities,
            now,
        ) {
            Ok(registration) => registration,
            Err(err) => {
                info!(client = %client_id, error = %err, "Registration rejected");
                return self
                    .reject_registration(transport, envelope, &err.to_string(), now)
                    .await;
            }
        };

        if let Some(old) = registration.superseded {
            old.close(CloseReason::Superseded).await;
        }

        let ack = reply_to(
            envelope,
            Payload::RegisterAck(RegisterAckPayload {
                success: true,
                session_id: Some(registration.session_id.clone()),
                error_message: None,
            }),
            now,
        );
        send_logged(transport, &ack).await;

        let record = ClientRecord {
            client_id,
            subject: principal.subject,
            capabilities: capabilities
                .into_iter()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
            last_session_id: Some(registration.session_id),
            last_seen_at: now,
        };
        if let Err(e) = self.collaborators.store.save_client(&record).await {
            warn!(client = %record.client_id, error = %e, "Failed to persist client record");
        }
        Disposition::Continue
    }

    async fn reject_registration(
        &self,
        transport: &dyn SessionTransport,
        envelope: &Envelope,
        reason: &str,
        now: u64,
    ) -> Disposition {
        let ack = reply_to(
            envelope,
            Payload::RegisterAck(RegisterAckPayload {
                success: false,
                session_id: None,
                error_message: Some(reason.to_string()),
            }),
            now,
        );
        send_logged(transport, &ack).await;
        transport.close(CloseReason::AuthRejected).await;
        Disposition::Close(CloseReason::AuthRejected)
    }

    async fn handle_heartbeat(
        &self,
        transport: &dyn SessionTransport,
        envelope: &Envelope,
        session: &SessionInfo,
        payload: &HeartbeatPayload,
        now: u64,
    ) {
        let activated = match self.registry.heartbeat(&session.session_id, now) {
            Ok(activated) => activated,
            Err(err) => {
                debug!(session = %session.session_id, error = %err, "Heartbeat did not refresh session");
                false
            }
        };

        let ack = reply_to(envelope, Payload::HeartbeatAck(payload.clone()), now);
        if let Err(e) = transport.send(&ack).await {
            trace!(session = %session.session_id, error = %e, "Heartbeat ack not sent");
        }

        if activated && let Some(client) = &session.client_id {
            self.drain_to(client, now).await;
        }
    }

    // ==================== Dispatch ====================

    async fn dispatch(
        &self,
        transport: &dyn SessionTransport,
        envelope: Envelope,
        session: &SessionInfo,
        now: u64,
    ) {
        // Receivers see who really sent it, not who the client claims to be
        let mut envelope = envelope.with_source(Source {
            client_id: session.client_id.clone(),
            session_id: Some(session.session_id.clone()),
        });

        let target = match &envelope.target {
            Some(target) => target.clone(),
            None => match &envelope.payload {
                Payload::Message(payload) => {
                    let payload = payload.clone();
                    self.complete(transport, &envelope, session, payload, now)
                        .await;
                    return;
                }
                Payload::Broadcast(_) => Target::All,
                _ => {
                    let err =
                        MeshError::UnknownTarget(format!("{} needs a target", envelope.kind()));
                    self.send_error(transport, &envelope, &err, now).await;
                    return;
                }
            },
        };
        envelope.target = Some(target.clone());

        debug!(
            message_id = %envelope.message_id,
            kind = %envelope.kind(),
            session = %session.session_id,
            "Routing envelope"
        );

        match target {
            Target::Client(client) => {
                if self.deliver_to_client(&client, envelope.clone(), now).await == Delivery::Unknown
                {
                    let err = MeshError::UnknownTarget(client.to_string());
                    self.send_error(transport, &envelope, &err, now).await;
                }
            }
            Target::Group(group) => {
                let Some(members) = self.collaborators.groups.members(&group).await else {
                    let err = MeshError::UnknownTarget(format!("group {group}"));
                    self.send_error(transport, &envelope, &err, now).await;
                    return;
                };
                let sender = session.client_id.as_ref();
                let deliveries = members
                    .iter()
                    .filter(|member| Some(*member) != sender)
                    .map(|member| self.deliver_to_client(member, envelope.clone(), now));
                futures::future::join_all(deliveries).await;
            }
            Target::All => self.broadcast(&envelope, &session.session_id, now).await,
        }
    }

    /// Deliver to one client now if it is active with nothing queued ahead,
    /// otherwise queue.
    pub async fn deliver_to_client(&self, client: &ClientId, envelope: Envelope, now: u64) -> Delivery {
        if !self.registry.is_known(client) {
            return Delivery::Unknown;
        }
        let lock = self.delivery_lock(client);
        let _guard = lock.lock().await;

        if self.queue.pending_for(client) == 0
            && let Some(active) = self.registry.active_session(client)
        {
            match active.transport.send(&envelope).await {
                Ok(()) => {
                    trace!(client = %client, message_id = %envelope.message_id, "Delivered");
                    return Delivery::Delivered;
                }
                Err(e) => {
                    warn!(client = %client, error = %e, "Delivery failed, queueing");
                }
            }
        }

        match self.queue.enqueue(&self.registry, client, envelope, now) {
            Some(pending) => {
                self.persist(&pending).await;
                Delivery::Queued
            }
            None => Delivery::Unknown,
        }
    }

    /// Send to every active session except the sender. Failures are logged
    /// per session and do not stop the others.
    async fn broadcast(&self, envelope: &Envelope, sender: &SessionId, now: u64) {
        let recipients = self.registry.active_sessions();
        let sends = recipients
            .iter()
            .filter(|r| r.session_id != *sender)
            .map(|r| self.broadcast_to(r, envelope, now));
        futures::future::join_all(sends).await;
    }

    /// One broadcast recipient. A recipient still owed queued messages gets
    /// the broadcast queued behind them.
    async fn broadcast_to(&self, recipient: &ActiveSession, envelope: &Envelope, now: u64) {
        let client = &recipient.client_id;
        let lock = self.delivery_lock(client);
        let _guard = lock.lock().await;

        if self.queue.pending_for(client) > 0 {
            if let Some(pending) = self.queue.enqueue(&self.registry, client, envelope.clone(), now) {
                trace!(client = %client, message_id = %envelope.message_id, "Broadcast queued behind backlog");
                self.persist(&pending).await;
            }
            return;
        }
        if let Err(e) = recipient.transport.send(envelope).await {
            warn!(client = %client, error = %e, "Broadcast delivery failed");
        }
    }

    async fn complete(
        &self,
        transport: &dyn SessionTransport,
        envelope: &Envelope,
        session: &SessionInfo,
        payload: MessagePayload,
        now: u64,
    ) {
        let Some(client_id) = session.client_id.clone() else {
            return;
        };
        let request = CompletionRequest {
            client_id: client_id.clone(),
            content: payload.content,
            provider: payload.provider,
            model: payload.model,
        };
        debug!(
            client = %client_id,
            provider = ?request.provider,
            model = ?request.model,
            "Completion request"
        );

        let output = match self.collaborators.provider.complete(request).await {
            Ok(output) => output,
            Err(e) => {
                warn!(client = %client_id, error = %e, "Completion failed");
                self.send_error(transport, envelope, &MeshError::Provider(e), now)
                    .await;
                return;
            }
        };

        let reply = |payload| {
            reply_to(envelope, payload, self.clock.now_ms())
                .with_target(Target::Client(client_id.clone()))
        };
        match output {
            CompletionOutput::Complete(content) => {
                send_logged(transport, &reply(Payload::Response(ResponsePayload { content })))
                    .await;
            }
            CompletionOutput::Stream(mut chunks) => {
                let mut index = 0;
                while let Some(chunk) = chunks.next().await {
                    match chunk {
                        Ok(content) => {
                            let chunk = reply(Payload::StreamChunk(StreamChunkPayload {
                                content,
                                index,
                            }));
                            if let Err(e) = transport.send(&chunk).await {
                                warn!(client = %client_id, error = %e, "Stream aborted");
                                return;
                            }
                            index += 1;
                        }
                        Err(e) => {
                            warn!(client = %client_id, error = %e, "Completion stream failed");
                            let err = MeshError::Provider(e);
                            self.send_error(transport, envelope, &err, self.clock.now_ms())
                                .await;
                            return;
                        }
                    }
                }
                let end = reply(Payload::StreamEnd(StreamEndPayload { chunks: index }));
                send_logged(transport, &end).await;
            }
        }
    }

    // ==================== Offline delivery ====================

    /// Hand a client its backlog, oldest first.
    async fn drain_to(&self, client: &ClientId, now: u64) {
        let lock = self.delivery_lock(client);
        let _guard = lock.lock().await;

        let Some(active) = self.registry.active_session(client) else {
            return;
        };
        let drained = self.queue.drain(client, now);
        for message in &drained.expired {
            self.forget(message).await;
            self.notify_failure(message, "expired", now).await;
        }
        if drained.ready.is_empty() {
            return;
        }
        info!(client = %client, count = drained.ready.len(), "Draining offline queue");

        let mut pending = drained.ready.into_iter();
        while let Some(message) = pending.next() {
            match active.transport.send(&message.envelope).await {
                Ok(()) => self.forget(&message).await,
                Err(e) => {
                    warn!(client = %client, error = %e, "Drain interrupted");
                    let mut rest = vec![message];
                    rest.extend(pending);
                    self.queue.restore_front(client, rest);
                    return;
                }
            }
        }
    }

    /// Run one retry pass over the offline queue.
    pub async fn retry_pending(&self) {
        let now = self.clock.now_ms();
        let report = self.queue.retry_tick(now, |client| self.registry.is_online(client));

        for message in &report.rescheduled {
            self.persist(message).await;
        }
        for message in &report.exhausted {
            self.forget(message).await;
            self.notify_failure(message, "retries_exhausted", now).await;
        }
        for message in &report.expired {
            self.forget(message).await;
            self.notify_failure(message, "expired", now).await;
        }

        let online: BTreeSet<&ClientId> = report.ready.iter().map(|m| &m.target_client_id).collect();
        for client in online {
            self.drain_to(client, now).await;
        }
    }

    /// Tell the sender a message will never arrive.
    async fn notify_failure(&self, message: &PendingMessage, reason: &str, now: u64) {
        let err = MeshError::DeliveryExhausted {
            client: message.target_client_id.clone(),
            retries: message.retry_count,
        };
        let source = &message.envelope.source;
        let transport = source
            .session_id
            .as_ref()
            .and_then(|sid| self.registry.transport_for_session(sid))
            .or_else(|| {
                let client = source.client_id.as_ref()?;
                let info = self.registry.session_for_client(client)?;
                self.registry.transport_for_session(&info.session_id)
            });
        let Some(transport) = transport else {
            info!(message_id = %message.message_id, error = %err, "Sender gone, failure dropped");
            return;
        };

        let event = reply_to(
            &message.envelope,
            Payload::Event(EventPayload {
                event: "delivery_failed".into(),
                data: json!({
                    "messageId": message.message_id,
                    "targetClientId": message.target_client_id,
                    "retries": message.retry_count,
                    "reason": reason,
                }),
            }),
            now,
        );
        send_logged(&*transport, &event).await;
    }

    async fn persist(&self, message: &PendingMessage) {
        if let Err(e) = self.collaborators.store.save_pending(message).await {
            warn!(message_id = %message.message_id, error = %e, "Failed to persist pending message");
        }
    }

    async fn forget(&self, message: &PendingMessage) {
        let store = &self.collaborators.store;
        if let Err(e) = store
            .remove_pending(&message.message_id, &message.target_client_id)
            .await
        {
            warn!(message_id = %message.message_id, error = %e, "Failed to remove pending message");
        }
    }

    fn delivery_lock(&self, client: &ClientId) -> Arc<AsyncMutex<()>> {
        self.delivery_locks
            .entry(client.clone())
            .or_default()
            .clone()
    }

    // ==================== Periodic / status ====================

    /// Time out silent sessions and evict old ones.
    pub async fn sweep_sessions(&self) {
        let report = self.registry.sweep(self.clock.now_ms());
        for (session_id, reason, transport) in report.timed_out {
            debug!(session = %session_id, reason = %reason, "Closing timed-out session");
            self.malformed.remove(&transport.connection_id());
            transport.close(reason).await;
        }
        if !report.evicted.is_empty() {
            debug!(count = report.evicted.len(), "Evicted disconnected sessions");
        }
        // Locks nobody holds, for clients that are not online
        self.delivery_locks
            .retain(|client, lock| Arc::strong_count(lock) > 1 || self.registry.is_online(client));
    }

    pub fn mesh_status(&self) -> MeshStatus {
        let snapshot = self.coordinator.snapshot();
        MeshStatus {
            local_node_id: snapshot.local_id.clone(),
            main_node_id: self.coordinator.main_node(),
            is_main_node: self.coordinator.is_main_node(),
            alive_nodes: snapshot.count(NodeState::Alive),
            active_sessions: self.registry.active_sessions().len(),
            pending_messages: self.queue.len(),
        }
    }

    /// Close every client transport and ask the SWIM driver to leave.
    pub async fn shutdown(&self) {
        self.coordinator.request_leave();
        let transports = self.registry.live_transports();
        info!(connections = transports.len(), "Closing client connections");
        let closes = transports
            .iter()
            .map(|t| t.close(CloseReason::Shutdown));
        futures::future::join_all(closes).await;
    }

    async fn send_error(
        &self,
        transport: &dyn SessionTransport,
        envelope: &Envelope,
        err: &MeshError,
        now: u64,
    ) {
        let error = reply_to(
            envelope,
            Payload::Error(ErrorPayload {
                kind: err.kind(),
                error_message: err.to_string(),
            }),
            now,
        );
        send_logged(transport, &error).await;
    }
}

/// A server envelope answering `to`.
fn reply_to(to: &Envelope, payload: Payload, now: u64) -> Envelope {
    let envelope = Envelope::new(payload, now)
        .with_in_reply_to(Some(to.reply_reference()))
        .with_correlation_id(to.correlation_id.clone());
    match &to.source.client_id {
        Some(client) => envelope.with_target(Target::Client(client.clone())),
        None => envelope,
    }
}

async fn send_logged(transport: &dyn SessionTransport, envelope: &Envelope) {
    if let Err(e) = transport.send(envelope).await {
        debug!(
            connection = transport.connection_id(),
            kind = %envelope.kind(),
            error = %e,
            "Send failed"
        );
    }
}
