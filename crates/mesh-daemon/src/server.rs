//! WebSocket server for client connections.
//!
//! Each accepted TCP stream is upgraded and served on its own task; the
//! router owns everything that happens after the upgrade.

use crate::connection::serve_connection;
use anyhow::Result;
use mesh_core::MeshRouter;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info};

pub struct WebSocketServer {
    router: Arc<MeshRouter>,
    /// Counter for generating connection IDs
    next_conn_id: AtomicU64,
}

impl WebSocketServer {
    pub fn new(router: Arc<MeshRouter>) -> Self {
        Self {
            router,
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Bind to an address and return the TCP listener.
    pub async fn bind(listen_addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(listen_addr).await?;
        info!("WebSocket server listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Accept connections until the listener fails.
    pub async fn run(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move { server.accept_connection(stream, addr).await });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    /// Upgrade one TCP stream and serve it to completion.
    pub async fn accept_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let ws_stream = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                // Health checks (like `nc -z`) connect and immediately close without
                // completing the WebSocket handshake.
                let err_str = e.to_string();
                if err_str.contains("Handshake not finished")
                    || err_str.contains("Connection reset")
                    || err_str.contains("unexpected EOF")
                {
                    debug!("Connection closed before handshake from {}", addr);
                } else {
                    error!("WebSocket upgrade failed for {}: {}", addr, e);
                }
                return;
            }
        };

        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        info!("New connection from {} (connection: {})", addr, conn_id);

        serve_connection(Arc::clone(&self.router), ws_stream, conn_id).await;
    }
}
