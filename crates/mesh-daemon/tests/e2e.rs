//! End-to-end tests for mesh-daemon.
//!
//! Runs real daemons on loopback: SWIM over UDP between nodes, clients over
//! WebSocket speaking raw JSON envelopes.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use mesh_core::ClientId;
use mesh_daemon::{ApiKey, DaemonConfig, RunningDaemon};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

const WAIT: Duration = Duration::from_secs(5);

fn test_config(data: &TempDir, node: &str, seeds: Vec<SocketAddr>) -> DaemonConfig {
    let mut config = DaemonConfig {
        node_id: Some(node.parse().unwrap()),
        listen: "127.0.0.1:0".into(),
        swim_host: "127.0.0.1".into(),
        data_dir: data.path().join(node),
        maintenance_interval_ms: 100,
        api_keys: vec![
            ApiKey {
                key: "key-alice".into(),
                name: "alice-laptop".into(),
                active: true,
                client_id: None,
            },
            ApiKey {
                key: "key-bob".into(),
                name: "bob-phone".into(),
                active: true,
                client_id: None,
            },
        ],
        ..DaemonConfig::default()
    };
    config.mesh.swim_port = 0;
    config.mesh.swim_interval_ms = 100;
    config.mesh.probe_timeout_ms = 50;
    config.mesh.self_gossip_interval_ms = 200;
    config.mesh.seeds = seeds;
    config
}

/// Poll `check` until it holds or the wait runs out.
async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Test client speaking raw JSON envelopes.
struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    client_id: String,
    session_id: Option<String>,
    /// Frames skipped over while waiting for a specific type
    stashed: VecDeque<Value>,
}

impl TestClient {
    /// Connect and consume the WELCOME.
    async fn connect(addr: SocketAddr, client_id: &str) -> Self {
        let url = format!("ws://{}", addr);
        let (ws, _) = connect_async(&url).await.expect("Failed to connect");
        let mut client = Self {
            ws,
            client_id: client_id.to_string(),
            session_id: None,
            stashed: VecDeque::new(),
        };
        let welcome = client.recv().await;
        assert_eq!(welcome["type"], "WELCOME");
        assert_eq!(welcome["payload"]["version"], 1);
        client
    }

    /// Connect, register with `token` and send the first heartbeat.
    async fn online(addr: SocketAddr, client_id: &str, token: &str) -> Self {
        let mut client = Self::connect(addr, client_id).await;
        let ack = client.register(token).await;
        assert_eq!(ack["payload"]["success"], true, "registration failed: {ack}");
        client.heartbeat().await;
        client
    }

    async fn send(&mut self, envelope: Value) {
        self.ws
            .send(Message::Text(envelope.to_string()))
            .await
            .expect("Failed to send");
    }

    fn envelope(&self, ty: &str, target: Option<Value>, payload: Value) -> Value {
        let mut source = json!({ "clientId": self.client_id });
        if let Some(session) = &self.session_id {
            source["sessionId"] = json!(session);
        }
        let mut envelope = json!({
            "messageId": uuid::Uuid::new_v4().to_string(),
            "version": 1,
            "type": ty,
            "source": source,
            "timestamp": 0,
            "payload": payload,
        });
        if let Some(target) = target {
            envelope["target"] = target;
        }
        envelope
    }

    async fn register(&mut self, token: &str) -> Value {
        let register = self.envelope(
            "REGISTER",
            None,
            json!({ "token": token, "capabilities": ["chat"] }),
        );
        self.send(register).await;
        let ack = self.recv_type("REGISTER_ACK").await;
        if let Some(session) = ack["payload"]["sessionId"].as_str() {
            self.session_id = Some(session.to_string());
        }
        ack
    }

    async fn heartbeat(&mut self) -> Value {
        let heartbeat = self.envelope("HEARTBEAT", None, json!({ "sentAt": 42 }));
        self.send(heartbeat).await;
        let ack = self.recv_type("HEARTBEAT_ACK").await;
        assert_eq!(ack["payload"]["sentAt"], 42);
        ack
    }

    async fn message_to(&mut self, target: &str, text: &str) {
        let message = self.envelope(
            "MESSAGE",
            Some(json!({ "clientId": target })),
            json!({ "content": { "text": text } }),
        );
        self.send(message).await;
    }

    /// Next text frame as JSON.
    async fn recv(&mut self) -> Value {
        let next = timeout(WAIT, async {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Text(text))) => return Some(text),
                    Some(Ok(Message::Close(_))) | None => return None,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => panic!("WebSocket error: {}", e),
                }
            }
        })
        .await
        .expect("Timed out waiting for a frame");
        let text = next.expect("Connection closed");
        serde_json::from_str(&text).expect("Server sent invalid JSON")
    }

    /// Next frame of type `ty`. Frames of other types are kept for later
    /// calls, so a drain racing a HEARTBEAT_ACK loses nothing.
    async fn recv_type(&mut self, ty: &str) -> Value {
        if let Some(pos) = self.stashed.iter().position(|e| e["type"] == ty)
            && let Some(envelope) = self.stashed.remove(pos)
        {
            return envelope;
        }
        loop {
            let envelope = self.recv().await;
            if envelope["type"] == ty {
                return envelope;
            }
            self.stashed.push_back(envelope);
        }
    }

    /// Wait for the server to close the connection.
    async fn expect_closed(&mut self) {
        let closed = timeout(WAIT, async {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "Server did not close the connection");
    }

    async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

async fn start(data: &TempDir, node: &str, seeds: Vec<SocketAddr>) -> RunningDaemon {
    mesh_daemon::start(test_config(data, node, seeds))
        .await
        .expect("Failed to start daemon")
}

fn client(s: &str) -> ClientId {
    s.parse().unwrap()
}

// ==================== Membership ====================

#[tokio::test]
async fn test_two_nodes_converge_and_leave() {
    let data = TempDir::new().unwrap();
    let a = start(&data, "node-a", vec![]).await;
    let b = start(&data, "node-b", vec![a.swim_addr]).await;

    eventually("both nodes to see each other", || {
        a.router.mesh_status().alive_nodes == 2 && b.router.mesh_status().alive_nodes == 2
    })
    .await;

    // Both elect the smallest id.
    let status = b.router.mesh_status();
    assert_eq!(status.main_node_id.as_ref().map(|n| n.as_str()), Some("node-a"));
    assert!(!status.is_main_node);
    assert!(a.router.mesh_status().is_main_node);

    b.shutdown().await;
    eventually("node-a to notice node-b left", || {
        a.router.mesh_status().alive_nodes == 1
    })
    .await;

    a.shutdown().await;
}

// ==================== Sessions ====================

#[tokio::test]
async fn test_register_heartbeat_and_direct_message() {
    let data = TempDir::new().unwrap();
    let daemon = start(&data, "node-a", vec![]).await;

    let mut alice = TestClient::online(daemon.ws_addr, "alice", "key-alice").await;
    let mut bob = TestClient::online(daemon.ws_addr, "bob", "key-bob").await;
    assert!(daemon.router.registry().is_online(&client("alice")));
    assert_eq!(daemon.router.mesh_status().active_sessions, 2);

    alice.message_to("bob", "hello bob").await;
    let message = bob.recv_type("MESSAGE").await;
    assert_eq!(message["payload"]["content"]["text"], "hello bob");
    assert_eq!(message["source"]["clientId"], "alice");
    assert_eq!(
        message["source"]["sessionId"].as_str(),
        alice.session_id.as_deref()
    );

    // Known-client persistence
    let sessions = std::fs::read_to_string(data.path().join("node-a/sessions.json")).unwrap();
    let records: Value = serde_json::from_str(&sessions).unwrap();
    assert_eq!(records.as_array().unwrap().len(), 2);

    alice.close().await;
    bob.close().await;
    daemon.shutdown().await;
}

#[tokio::test]
async fn test_bad_key_is_rejected_and_closed() {
    let data = TempDir::new().unwrap();
    let daemon = start(&data, "node-a", vec![]).await;

    let mut mallory = TestClient::connect(daemon.ws_addr, "mallory").await;
    let ack = mallory.register("not-a-key").await;
    assert_eq!(ack["payload"]["success"], false);
    assert!(ack["payload"]["errorMessage"].is_string());
    mallory.expect_closed().await;

    assert!(!daemon.router.registry().is_online(&client("mallory")));
    daemon.shutdown().await;
}

#[tokio::test]
async fn test_unregistered_message_gets_error() {
    let data = TempDir::new().unwrap();
    let daemon = start(&data, "node-a", vec![]).await;

    let mut anon = TestClient::connect(daemon.ws_addr, "anon").await;
    anon.message_to("bob", "hi").await;
    let error = anon.recv_type("ERROR").await;
    assert_eq!(error["payload"]["kind"], "not_registered");

    anon.close().await;
    daemon.shutdown().await;
}

// ==================== Offline queue ====================

#[tokio::test]
async fn test_offline_message_delivered_on_reconnect() {
    let data = TempDir::new().unwrap();
    let daemon = start(&data, "node-a", vec![]).await;

    // Bob is known but goes offline.
    let bob = TestClient::online(daemon.ws_addr, "bob", "key-bob").await;
    bob.close().await;
    eventually("bob to go offline", || {
        !daemon.router.registry().is_online(&client("bob"))
    })
    .await;

    let mut alice = TestClient::online(daemon.ws_addr, "alice", "key-alice").await;
    alice.message_to("bob", "first").await;
    alice.message_to("bob", "second").await;
    eventually("both messages to be queued", || {
        daemon.router.queue().pending_for(&client("bob")) == 2
    })
    .await;

    let pending_file = data.path().join("node-a/pending.json");
    let read_pending = || -> Value {
        std::fs::read_to_string(&pending_file)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or(Value::Null)
    };
    eventually("both messages to be persisted", || {
        read_pending().as_array().is_some_and(|a| a.len() == 2)
    })
    .await;
    assert_eq!(read_pending()[0]["targetClientId"], "bob");

    // Reconnect: the backlog arrives in order once bob is active.
    let mut bob = TestClient::online(daemon.ws_addr, "bob", "key-bob").await;
    let first = bob.recv_type("MESSAGE").await;
    let second = bob.recv_type("MESSAGE").await;
    assert_eq!(first["payload"]["content"]["text"], "first");
    assert_eq!(second["payload"]["content"]["text"], "second");

    eventually("the queue to empty", || daemon.router.queue().is_empty()).await;

    alice.close().await;
    bob.close().await;
    daemon.shutdown().await;
}

#[tokio::test]
async fn test_pending_messages_survive_restart() {
    let data = TempDir::new().unwrap();

    {
        let daemon = start(&data, "node-a", vec![]).await;
        let bob = TestClient::online(daemon.ws_addr, "bob", "key-bob").await;
        bob.close().await;
        eventually("bob to go offline", || {
            !daemon.router.registry().is_online(&client("bob"))
        })
        .await;

        let mut alice = TestClient::online(daemon.ws_addr, "alice", "key-alice").await;
        alice.message_to("bob", "kept").await;
        let pending_file = data.path().join("node-a/pending.json");
        eventually("the message to be persisted", || {
            std::fs::read_to_string(&pending_file).is_ok_and(|text| text.contains("kept"))
        })
        .await;
        alice.close().await;
        daemon.shutdown().await;
    }

    let daemon = start(&data, "node-a", vec![]).await;
    assert_eq!(daemon.router.queue().pending_for(&client("bob")), 1);

    let mut bob = TestClient::online(daemon.ws_addr, "bob", "key-bob").await;
    let message = bob.recv_type("MESSAGE").await;
    assert_eq!(message["payload"]["content"]["text"], "kept");

    bob.close().await;
    daemon.shutdown().await;
}
