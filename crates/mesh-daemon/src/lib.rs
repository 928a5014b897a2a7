//! mesh-daemon library: the daemon's components, exposed for the binary
//! and for integration tests.

pub mod collaborators;
pub mod config;
pub mod connection;
pub mod daemon;
pub mod persistence;
pub mod server;
pub mod swim_driver;

pub use config::{ApiKey, DaemonConfig};
pub use connection::WsTransport;
pub use daemon::{RunningDaemon, start};
pub use persistence::JsonFileStore;
pub use server::WebSocketServer;
pub use swim_driver::SwimDriver;
