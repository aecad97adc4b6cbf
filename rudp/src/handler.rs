use crate::Connection;
use async_trait::async_trait;
use std::net::SocketAddr;

/// Application callbacks for connection events.
///
/// Callbacks are awaited on the socket's receive task, so a callback that never
/// completes stalls every connection sharing that socket.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn on_connect(&self, _connection: Connection) {}

    async fn on_disconnect(&self, _peer: SocketAddr) {}

    async fn on_receive(&self, connection: Connection, payload: Vec<u8>);
}
