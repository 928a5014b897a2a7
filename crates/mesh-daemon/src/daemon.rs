//! Daemon assembly: binds the sockets, wires the router to its
//! collaborators and spawns the long-running tasks.

use crate::collaborators::{ApiKeyAuth, StaticGroups, UnconfiguredProvider};
use crate::config::DaemonConfig;
use crate::persistence::JsonFileStore;
use crate::server::WebSocketServer;
use crate::swim_driver::SwimDriver;
use anyhow::{Context, Result};
use mesh_core::{
    Clock, Collaborators, MeshRouter, NodeCoordinator, NodeId, SwimEngine, SystemClock,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// How long shutdown waits for the SWIM driver to send its leave.
const LEAVE_TIMEOUT: Duration = Duration::from_secs(2);

/// A started daemon. Dropping it does not stop the tasks; call
/// [`RunningDaemon::shutdown`].
pub struct RunningDaemon {
    pub router: Arc<MeshRouter>,
    pub node_id: NodeId,
    /// Bound WebSocket address
    pub ws_addr: SocketAddr,
    /// Bound SWIM address
    pub swim_addr: SocketAddr,
    swim_task: JoinHandle<()>,
    background: Vec<JoinHandle<()>>,
}

/// Bind everything and start serving.
pub async fn start(config: DaemonConfig) -> Result<RunningDaemon> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let now = clock.now_ms();

    let node_id = config.node_id.clone().unwrap_or_else(|| {
        let id = NodeId::generate();
        info!("Generated node ID: {}", id);
        id
    });

    let swim_socket = UdpSocket::bind(config.swim_bind_addr())
        .await
        .with_context(|| format!("Failed to bind SWIM socket on {}", config.swim_bind_addr()))?;
    let swim_addr = swim_socket.local_addr()?;
    let advertise = config.advertise.unwrap_or(swim_addr);
    if advertise.ip().is_unspecified() {
        warn!(
            %advertise,
            "SWIM address is unspecified; set `advertise` so peers can reach this node"
        );
    }
    info!(node = %node_id, %swim_addr, %advertise, "SWIM listening");

    let engine = SwimEngine::new(node_id.clone(), advertise, &config.mesh, now);
    let (coordinator, commands) = NodeCoordinator::new(
        engine.snapshot(now),
        config.mesh.pinned_main_node.clone(),
    );
    let coordinator = Arc::new(coordinator);

    let store = JsonFileStore::open(&config.data_dir)
        .await
        .with_context(|| format!("Failed to open store in {:?}", config.data_dir))?;
    let collaborators = Collaborators {
        auth: Arc::new(ApiKeyAuth::new(config.api_keys.clone())),
        provider: Arc::new(UnconfiguredProvider),
        groups: Arc::new(StaticGroups::new(config.groups.clone())),
        store: Arc::new(store),
    };

    let router = Arc::new(MeshRouter::new(
        config.mesh.clone(),
        Arc::clone(&coordinator),
        collaborators,
        Arc::clone(&clock),
    ));
    router.restore().await.context("Failed to restore router state")?;

    let listener = WebSocketServer::bind(&config.listen).await?;
    let ws_addr = listener.local_addr()?;

    let driver = SwimDriver::new(
        swim_socket,
        engine,
        coordinator,
        commands,
        clock,
        config.mesh.swim_interval(),
    );
    let swim_task = tokio::spawn(driver.run());

    let server = Arc::new(WebSocketServer::new(Arc::clone(&router)));
    let mut background = vec![tokio::spawn(server.run(listener))];

    let maintenance_router = Arc::clone(&router);
    let period = Duration::from_millis(config.maintenance_interval_ms.max(1));
    background.push(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            maintenance_router.sweep_sessions().await;
            maintenance_router.retry_pending().await;
        }
    }));

    info!(node = %node_id, %ws_addr, "Daemon started");
    Ok(RunningDaemon {
        router,
        node_id,
        ws_addr,
        swim_addr,
        swim_task,
        background,
    })
}

impl RunningDaemon {
    /// Leave the mesh, close every client and stop the tasks.
    pub async fn shutdown(self) {
        info!(node = %self.node_id, "Shutting down");
        self.router.shutdown().await;

        if tokio::time::timeout(LEAVE_TIMEOUT, self.swim_task)
            .await
            .is_err()
        {
            warn!("SWIM driver did not stop in time");
        }
        for task in self.background {
            task.abort();
        }
    }
}
