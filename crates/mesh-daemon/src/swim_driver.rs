//! Drives the SWIM engine over a UDP socket.
//!
//! The driver task is the engine's only owner. It feeds it datagrams and
//! clock ticks, sends whatever comes back, and publishes a fresh membership
//! snapshot to the coordinator whenever the view changes.

use futures::StreamExt;
use futures::channel::mpsc::UnboundedReceiver;
use mesh_core::swim::{MAX_DATAGRAM_SIZE, Outgoing};
use mesh_core::{Clock, NodeCoordinator, SwimCommand, SwimEngine};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// How often engine timers (probe timeouts, suspicion) are checked between
/// protocol ticks.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct SwimDriver {
    socket: UdpSocket,
    engine: SwimEngine,
    coordinator: Arc<NodeCoordinator>,
    commands: UnboundedReceiver<SwimCommand>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl SwimDriver {
    pub fn new(
        socket: UdpSocket,
        engine: SwimEngine,
        coordinator: Arc<NodeCoordinator>,
        commands: UnboundedReceiver<SwimCommand>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            socket,
            engine,
            coordinator,
            commands,
            clock,
            interval,
        }
    }

    /// Run until a leave is requested or the command channel closes.
    pub async fn run(mut self) {
        let now = self.clock.now_ms();
        let out = self.engine.join(now);
        self.send_all(out).await;
        self.publish(now);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut poller = tokio::time::interval(POLL_INTERVAL);
        poller.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = self.clock.now_ms();
                    let out = self.engine.tick(now);
                    self.send_all(out).await;
                    self.publish(now);
                }

                _ = poller.tick() => {
                    let now = self.clock.now_ms();
                    let out = self.engine.poll(now);
                    self.send_all(out).await;
                    self.publish(now);
                }

                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, from)) => {
                            let now = self.clock.now_ms();
                            let out = self.engine.handle_datagram(from, &buf[..len], now);
                            self.send_all(out).await;
                            self.publish(now);
                        }
                        Err(e) => {
                            // ICMP port-unreachable from a dead peer surfaces here on
                            // some platforms; the socket itself is still usable.
                            debug!(error = %e, "SWIM receive failed");
                        }
                    }
                }

                command = self.commands.next() => {
                    match command {
                        Some(SwimCommand::SetMainNode(is_main)) => {
                            let now = self.clock.now_ms();
                            self.engine.set_main_node(is_main, now);
                            self.publish(now);
                        }
                        Some(SwimCommand::Leave) | None => {
                            let now = self.clock.now_ms();
                            let out = self.engine.leave(now);
                            self.send_all(out).await;
                            self.publish(now);
                            info!("SWIM driver stopped");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn send_all(&self, out: Vec<Outgoing>) {
        for Outgoing { to, message } in out {
            let bytes = match message.encode() {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(kind = message.kind(), error = %e, "Failed to encode SWIM message");
                    continue;
                }
            };
            if let Err(e) = self.socket.send_to(&bytes, to).await {
                debug!(%to, kind = message.kind(), error = %e, "SWIM send failed");
            }
        }
    }

    fn publish(&mut self, now: u64) {
        if let Some(snapshot) = self.engine.snapshot_if_changed(now) {
            self.coordinator.observe(snapshot);
        }
    }
}
