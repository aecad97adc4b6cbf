use crate::protocol::{negotiate_connection, ConnectionEndpoint, Packet, MAX_PACKET_SIZE};
use crate::socket::SharedSocket;
use crate::{Connection, ConnectionConfig, DatagramSocket, Handler, SendError};
use anyhow::{Context, Result};
use log::*;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// The initiating side of a single connection.
///
/// Dropping the client closes the connection without notifying the peer.
pub struct Client {
    endpoint: Arc<ConnectionEndpoint>,
    recv_task: JoinHandle<()>,
}

impl Client {
    /// Binds a new UDP socket and connects to the peer.
    ///
    /// Returns once the handshake has completed and `on_connect` has been invoked.
    pub async fn connect(
        peer: SocketAddr,
        handler: Arc<dyn Handler>,
        config: ConnectionConfig,
    ) -> Result<Self> {
        let bind_addr = config.bind_addr().unwrap_or_else(|| match peer {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        });

        let socket = UdpSocket::bind(bind_addr)
            .await
            .with_context(|| format!("failed to bind UDP socket to {}", bind_addr))?;

        Self::connect_with_socket(Arc::new(socket), peer, handler, config).await
    }

    /// Connects to the peer over an already bound socket
    pub async fn connect_with_socket(
        socket: Arc<dyn DatagramSocket>,
        peer: SocketAddr,
        handler: Arc<dyn Handler>,
        config: ConnectionConfig,
    ) -> Result<Self> {
        let socket = Arc::new(SharedSocket::new(socket));

        let vars = negotiate_connection(&socket, peer, &config)
            .await
            .with_context(|| format!("failed to connect to {}", peer))?;
        info!("connected to {}", peer);

        let endpoint = ConnectionEndpoint::new(peer, vars, Arc::clone(&socket), handler, config, None);
        endpoint.start_heartbeat();
        endpoint.handler().on_connect(endpoint.handle()).await;

        let recv_task = tokio::spawn(recv_loop(Arc::clone(&endpoint), socket));

        Ok(Self {
            endpoint,
            recv_task,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.endpoint.peer_addr()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.endpoint.local_addr()?)
    }

    pub fn is_open(&self) -> bool {
        self.endpoint.is_open()
    }

    pub fn connection(&self) -> Connection {
        self.endpoint.handle()
    }

    pub async fn send_unreliable(&self, payload: &[u8]) -> Result<(), SendError> {
        self.endpoint.send_unreliable(payload).await
    }

    pub async fn send_reliable(&self, payload: &[u8]) -> Result<(), SendError> {
        self.endpoint.send_reliable(payload).await
    }

    pub async fn disconnect(&self) -> Result<(), SendError> {
        self.endpoint.disconnect().await
    }

    pub async fn close(&self) {
        self.endpoint.close().await
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.recv_task.abort();

        if !self.endpoint.is_open() {
            return;
        }

        if let Ok(runtime) = Handle::try_current() {
            let endpoint = Arc::clone(&self.endpoint);
            runtime.spawn(async move { endpoint.close().await });
        }
    }
}

async fn recv_loop(endpoint: Arc<ConnectionEndpoint>, socket: Arc<SharedSocket>) {
    let peer = endpoint.peer_addr();
    let mut closed = endpoint.subscribe_closed();
    let mut buff = vec![0u8; MAX_PACKET_SIZE];

    while endpoint.is_open() {
        let (read, from) = tokio::select! {
            result = socket.recv_from(&mut buff) => match result {
                Ok(received) => received,
                Err(err) => {
                    warn!("failed to receive from {}: {}", peer, err);
                    endpoint.close().await;
                    break;
                }
            },
            _ = closed.changed() => break,
        };

        if from != peer {
            debug!("dropping datagram from unknown peer {}", from);
            continue;
        }

        match Packet::parse(&buff[..read]) {
            Ok(packet) => endpoint.handle_packet(packet).await,
            Err(err) => debug!("dropping invalid packet from {}: {}", from, err),
        }
    }

    debug!("receive loop for {} stopped", peer);
}
