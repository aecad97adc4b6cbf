use super::{ConnectionEndpoint, SendError};
use crate::ServerHandle;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

/// A handle to one open connection, cheap to clone.
///
/// Handles stay valid after the connection closes, every send then fails with
/// [`SendError::NotConnected`].
#[derive(Clone)]
pub struct Connection {
    endpoint: Arc<ConnectionEndpoint>,
}

impl Connection {
    pub(crate) fn new(endpoint: Arc<ConnectionEndpoint>) -> Self {
        Self { endpoint }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.endpoint.peer_addr()
    }

    pub fn is_open(&self) -> bool {
        self.endpoint.is_open()
    }

    /// The server that accepted this connection, `None` for a client's connection
    pub fn server(&self) -> Option<ServerHandle> {
        self.endpoint.server().cloned()
    }

    /// Sends a single datagram without acknowledgment or ordering
    pub async fn send_unreliable(&self, payload: &[u8]) -> Result<(), SendError> {
        self.endpoint.send_unreliable(payload).await
    }

    /// Sends a payload that is delivered exactly once and in order
    pub async fn send_reliable(&self, payload: &[u8]) -> Result<(), SendError> {
        self.endpoint.send_reliable(payload).await
    }

    /// Asks the peer to close the connection after everything sent so far
    pub async fn disconnect(&self) -> Result<(), SendError> {
        self.endpoint.disconnect().await
    }

    pub async fn close(&self) {
        self.endpoint.close().await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer_addr", &self.peer_addr())
            .field("open", &self.is_open())
            .finish()
    }
}
