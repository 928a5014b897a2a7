//! Offline queue: envelopes waiting for a disconnected client.
//!
//! One FIFO per target client, sharded through a `DashMap` so unrelated
//! clients never contend. The queue does no I/O; the router delivers what
//! [`OfflineQueue::drain`] and [`OfflineQueue::retry_tick`] hand back.
//!
//! Retry schedule: the n-th retry happens `base_delay_ms × 2^n` after the
//! previous one (capped at `max_delay_ms`). The retry that brings
//! `retry_count` to `max_retries` drops the message.

use crate::config::OfflineQueueConfig;
use crate::id::{ClientId, SessionId};
use crate::protocol::Envelope;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Answers "has this client ever registered?".
pub trait ClientDirectory {
    fn is_known(&self, client: &ClientId) -> bool;
}

/// A queued envelope awaiting its target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMessage {
    pub message_id: String,
    pub target_client_id: ClientId,
    /// Session that sent the envelope, told about delivery failure
    pub source_session_id: Option<SessionId>,
    pub envelope: Envelope,
    pub retry_count: u32,
    pub next_retry_at: u64,
    pub created_at: u64,
    pub expires_at: Option<u64>,
    /// Enqueue order, breaks `created_at` ties
    #[serde(default)]
    pub sequence: u64,
}

impl PendingMessage {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at.is_some_and(|at| now_ms >= at)
    }

    fn order_key(&self) -> (u64, u64) {
        (self.created_at, self.sequence)
    }
}

/// Messages taken out of a client's queue.
#[derive(Debug, Default)]
pub struct Drain {
    /// Deliverable, FIFO
    pub ready: Vec<PendingMessage>,
    pub expired: Vec<PendingMessage>,
}

/// Outcome of one retry pass.
#[derive(Debug, Default)]
pub struct RetryReport {
    /// Due messages whose target is online again. Still queued; the
    /// caller should drain those targets.
    pub ready: Vec<PendingMessage>,
    /// Retry counter bumped and rescheduled.
    pub rescheduled: Vec<PendingMessage>,
    /// Dropped after the last allowed retry.
    pub exhausted: Vec<PendingMessage>,
    /// Dropped because their TTL passed.
    pub expired: Vec<PendingMessage>,
}

pub struct OfflineQueue {
    config: OfflineQueueConfig,
    queues: DashMap<ClientId, VecDeque<PendingMessage>>,
    next_sequence: AtomicU64,
}

impl OfflineQueue {
    pub fn new(config: OfflineQueueConfig) -> Self {
        Self {
            config,
            queues: DashMap::new(),
            next_sequence: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &OfflineQueueConfig {
        &self.config
    }

    /// Delay before retry number `retry_count + 1`.
    pub fn backoff(&self, retry_count: u32) -> u64 {
        let factor = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
        self.config
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.config.max_delay_ms)
    }

    /// Queue `envelope` for `target`.
    ///
    /// Targets that never registered are dropped with a log line; `None` is
    /// returned in that case.
    pub fn enqueue(
        &self,
        directory: &dyn ClientDirectory,
        target: &ClientId,
        envelope: Envelope,
        now_ms: u64,
    ) -> Option<PendingMessage> {
        if !directory.is_known(target) {
            warn!(
                client = %target,
                message_id = %envelope.message_id,
                "Dropping message for unknown client"
            );
            return None;
        }

        let expires_at = match self.config.message_ttl_ms {
            0 => None,
            ttl => Some(now_ms.saturating_add(ttl)),
        };
        let pending = PendingMessage {
            message_id: envelope.message_id.clone(),
            target_client_id: target.clone(),
            source_session_id: envelope.source.session_id.clone(),
            envelope,
            retry_count: 0,
            next_retry_at: now_ms.saturating_add(self.backoff(0)),
            created_at: now_ms,
            expires_at,
            sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed),
        };

        debug!(client = %target, message_id = %pending.message_id, "Queued for offline client");
        self.queues
            .entry(target.clone())
            .or_default()
            .push_back(pending.clone());
        Some(pending)
    }

    /// Take every queued message for `client`, oldest first.
    ///
    /// Expired messages come back separately and are gone from the queue.
    /// Whatever the caller fails to deliver should go back through
    /// [`restore_front`](Self::restore_front).
    pub fn drain(&self, client: &ClientId, now_ms: u64) -> Drain {
        let Some((_, queue)) = self.queues.remove(client) else {
            return Drain::default();
        };

        let mut messages: Vec<PendingMessage> = queue.into();
        messages.sort_by_key(PendingMessage::order_key);
        let (expired, ready): (Vec<_>, Vec<_>) =
            messages.into_iter().partition(|m| m.is_expired(now_ms));
        if !expired.is_empty() {
            info!(client = %client, dropped = expired.len(), "Discarded expired messages");
        }
        Drain { ready, expired }
    }

    /// Put undelivered messages back ahead of anything queued meanwhile.
    pub fn restore_front(&self, client: &ClientId, messages: Vec<PendingMessage>) {
        if messages.is_empty() {
            return;
        }
        let mut queue = self.queues.entry(client.clone()).or_default();
        for message in messages.into_iter().rev() {
            queue.push_front(message);
        }
    }

    /// Load persisted messages (startup).
    pub fn restore(&self, messages: Vec<PendingMessage>) {
        let mut max_sequence = 0;
        for message in messages {
            max_sequence = max_sequence.max(message.sequence + 1);
            self.queues
                .entry(message.target_client_id.clone())
                .or_default()
                .push_back(message);
        }
        for mut queue in self.queues.iter_mut() {
            queue.make_contiguous().sort_by_key(PendingMessage::order_key);
        }
        self.next_sequence.fetch_max(max_sequence, Ordering::Relaxed);
    }

    /// Remove one delivered message.
    pub fn remove(&self, client: &ClientId, message_id: &str) -> Option<PendingMessage> {
        let mut queue = self.queues.get_mut(client)?;
        let index = queue.iter().position(|m| m.message_id == message_id)?;
        let removed = queue.remove(index);
        let empty = queue.is_empty();
        drop(queue);
        if empty {
            self.queues.remove_if(client, |_, q| q.is_empty());
        }
        removed
    }

    /// Process every message whose retry time has come.
    pub fn retry_tick(&self, now_ms: u64, is_online: impl Fn(&ClientId) -> bool) -> RetryReport {
        let mut report = RetryReport::default();
        let clients: Vec<ClientId> = self.queues.iter().map(|e| e.key().clone()).collect();

        for client in clients {
            let online = is_online(&client);
            let Some(mut queue) = self.queues.get_mut(&client) else {
                continue;
            };

            let mut kept = VecDeque::with_capacity(queue.len());
            while let Some(mut message) = queue.pop_front() {
                if message.is_expired(now_ms) {
                    info!(client = %client, message_id = %message.message_id, "Pending message expired");
                    report.expired.push(message);
                    continue;
                }
                if message.next_retry_at > now_ms {
                    kept.push_back(message);
                    continue;
                }
                if online {
                    report.ready.push(message.clone());
                    kept.push_back(message);
                    continue;
                }

                message.retry_count += 1;
                if message.retry_count >= self.config.max_retries {
                    warn!(
                        client = %client,
                        message_id = %message.message_id,
                        retries = message.retry_count,
                        "Delivery retries exhausted"
                    );
                    report.exhausted.push(message);
                    continue;
                }
                message.next_retry_at = now_ms.saturating_add(self.backoff(message.retry_count));
                debug!(
                    client = %client,
                    message_id = %message.message_id,
                    retry = message.retry_count,
                    next_retry_at = message.next_retry_at,
                    "Target still offline, rescheduled"
                );
                report.rescheduled.push(message.clone());
                kept.push_back(message);
            }

            let empty = kept.is_empty();
            *queue = kept;
            drop(queue);
            if empty {
                self.queues.remove_if(&client, |_, q| q.is_empty());
            }
        }

        report
    }

    /// Number of queued messages across all clients.
    pub fn len(&self) -> usize {
        self.queues.iter().map(|q| q.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_for(&self, client: &ClientId) -> usize {
        self.queues.get(client).map(|q| q.len()).unwrap_or(0)
    }
}
