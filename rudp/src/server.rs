use crate::protocol::{check_reliable_payload, check_unreliable_payload};
use crate::protocol::{ConnectionEndpoint, ConnectionVars, Packet, PacketKind, MAX_PACKET_SIZE};
use crate::protocol::SequenceNumber;
use crate::socket::SharedSocket;
use crate::{Connection, ConnectionConfig, DatagramSocket, Handler, SendError};
use anyhow::{Context, Result};
use futures::future::join_all;
use log::*;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Weak};
use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A handshake in progress, promoted to a connection once the peer acks our SYN-ACK
struct PendingConnection {
    vars: ConnectionVars,
    initial_sequence_number: SequenceNumber,
    syn_ack: Vec<u8>,
    attempts: u32,
    timer: Option<JoinHandle<()>>,
}

impl PendingConnection {
    fn accepts(&self, packet: &Packet) -> bool {
        packet.ack_number() == self.initial_sequence_number
            && packet.sequence_number == self.vars.remote_sequence_number() + 1
    }
}

struct ServerInner {
    socket: Arc<SharedSocket>,
    handler: Arc<dyn Handler>,
    config: ConnectionConfig,
    connections: Mutex<HashMap<SocketAddr, Arc<ConnectionEndpoint>>>,
    pending: Mutex<HashMap<SocketAddr, PendingConnection>>,
    closed: watch::Sender<bool>,
}

/// Accepts any number of connections on one shared socket.
///
/// Dropping the server closes every connection without notifying the peers.
pub struct Server {
    inner: Arc<ServerInner>,
    recv_task: JoinHandle<()>,
}

impl Server {
    pub async fn bind(
        addr: SocketAddr,
        handler: Arc<dyn Handler>,
        config: ConnectionConfig,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("failed to bind UDP socket to {}", addr))?;

        Ok(Self::with_socket(Arc::new(socket), handler, config))
    }

    /// Starts accepting connections on an already bound socket.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_socket(
        socket: Arc<dyn DatagramSocket>,
        handler: Arc<dyn Handler>,
        config: ConnectionConfig,
    ) -> Self {
        let (closed, _) = watch::channel(false);

        let inner = Arc::new(ServerInner {
            socket: Arc::new(SharedSocket::new(socket)),
            handler,
            config,
            connections: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            closed,
        });

        let recv_task = tokio::spawn(recv_loop(Arc::clone(&inner)));

        Self { inner, recv_task }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.socket.local_addr()?)
    }

    pub fn is_open(&self) -> bool {
        !*self.inner.closed.borrow()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connection_count()
    }

    pub fn connections(&self) -> Vec<SocketAddr> {
        self.inner.connections()
    }

    pub fn connection(&self, addr: SocketAddr) -> Option<Connection> {
        self.inner.endpoint(addr).map(|endpoint| endpoint.handle())
    }

    /// A handle to this server that does not keep it alive
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub async fn send_unreliable(&self, addr: SocketAddr, payload: &[u8]) -> Result<(), SendError> {
        self.inner.send_unreliable(addr, payload).await
    }

    pub async fn send_reliable(&self, addr: SocketAddr, payload: &[u8]) -> Result<(), SendError> {
        self.inner.send_reliable(addr, payload).await
    }

    /// Sends to every open connection. Connections that close meanwhile are skipped.
    pub async fn broadcast_unreliable(&self, payload: &[u8]) -> Result<(), SendError> {
        self.inner.broadcast_unreliable(payload).await
    }

    /// Sends reliably to every open connection. Connections that close meanwhile are skipped.
    pub async fn broadcast_reliable(&self, payload: &[u8]) -> Result<(), SendError> {
        self.inner.broadcast_reliable(payload).await
    }

    pub async fn disconnect(&self, addr: SocketAddr) -> Result<(), SendError> {
        self.inner.disconnect(addr).await
    }

    /// Stops accepting datagrams and closes every connection without notifying the peers
    pub async fn close(&self) {
        self.inner.close().await
    }
}

/// A cloneable reference to a running server, reachable from handler callbacks
/// through [`Connection::server`].
///
/// The handle does not keep the server alive, once the server is dropped every
/// send fails with [`SendError::NotConnected`].
#[derive(Clone)]
pub struct ServerHandle {
    inner: Weak<ServerInner>,
}

impl ServerHandle {
    fn upgrade(&self) -> Result<Arc<ServerInner>, SendError> {
        self.inner.upgrade().ok_or(SendError::NotConnected)
    }

    pub fn connection_count(&self) -> usize {
        self.inner
            .upgrade()
            .map(|server| server.connection_count())
            .unwrap_or(0)
    }

    pub fn connections(&self) -> Vec<SocketAddr> {
        self.inner
            .upgrade()
            .map(|server| server.connections())
            .unwrap_or_default()
    }

    pub async fn send_unreliable(&self, addr: SocketAddr, payload: &[u8]) -> Result<(), SendError> {
        self.upgrade()?.send_unreliable(addr, payload).await
    }

    pub async fn send_reliable(&self, addr: SocketAddr, payload: &[u8]) -> Result<(), SendError> {
        self.upgrade()?.send_reliable(addr, payload).await
    }

    pub async fn broadcast_unreliable(&self, payload: &[u8]) -> Result<(), SendError> {
        self.upgrade()?.broadcast_unreliable(payload).await
    }

    pub async fn broadcast_reliable(&self, payload: &[u8]) -> Result<(), SendError> {
        self.upgrade()?.broadcast_reliable(payload).await
    }

    pub async fn disconnect(&self, addr: SocketAddr) -> Result<(), SendError> {
        self.upgrade()?.disconnect(addr).await
    }

    /// Drops a closed connection from the directory
    pub(crate) fn forget(&self, addr: SocketAddr) {
        if let Some(server) = self.inner.upgrade() {
            server.connections.lock().unwrap().remove(&addr);
        }
    }
}

impl fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHandle")
            .field("connections", &self.connection_count())
            .finish()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.recv_task.abort();

        if let Ok(runtime) = Handle::try_current() {
            let inner = Arc::clone(&self.inner);
            runtime.spawn(async move { inner.close().await });
        }
    }
}

fn log_broadcast_failures(endpoints: &[Arc<ConnectionEndpoint>], results: Vec<Result<(), SendError>>) {
    for (endpoint, result) in endpoints.iter().zip(results) {
        if let Err(err) = result {
            debug!("broadcast to {} failed: {}", endpoint.peer_addr(), err);
        }
    }
}

impl ServerInner {
    fn endpoint(&self, addr: SocketAddr) -> Option<Arc<ConnectionEndpoint>> {
        self.connections.lock().unwrap().get(&addr).cloned()
    }

    fn endpoints(&self) -> Vec<Arc<ConnectionEndpoint>> {
        self.connections.lock().unwrap().values().cloned().collect()
    }

    fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    fn connections(&self) -> Vec<SocketAddr> {
        self.connections.lock().unwrap().keys().copied().collect()
    }

    async fn send_unreliable(&self, addr: SocketAddr, payload: &[u8]) -> Result<(), SendError> {
        match self.endpoint(addr) {
            Some(endpoint) => endpoint.send_unreliable(payload).await,
            None => Err(SendError::NotConnected),
        }
    }

    async fn send_reliable(&self, addr: SocketAddr, payload: &[u8]) -> Result<(), SendError> {
        match self.endpoint(addr) {
            Some(endpoint) => endpoint.send_reliable(payload).await,
            None => Err(SendError::NotConnected),
        }
    }

    async fn broadcast_unreliable(&self, payload: &[u8]) -> Result<(), SendError> {
        check_unreliable_payload(payload)?;

        let endpoints = self.endpoints();
        let results = join_all(endpoints.iter().map(|e| e.send_unreliable(payload))).await;
        log_broadcast_failures(&endpoints, results);

        Ok(())
    }

    async fn broadcast_reliable(&self, payload: &[u8]) -> Result<(), SendError> {
        check_reliable_payload(payload)?;

        let endpoints = self.endpoints();
        let results = join_all(endpoints.iter().map(|e| e.send_reliable(payload))).await;
        log_broadcast_failures(&endpoints, results);

        Ok(())
    }

    async fn disconnect(&self, addr: SocketAddr) -> Result<(), SendError> {
        match self.endpoint(addr) {
            Some(endpoint) => endpoint.disconnect().await,
            None => Err(SendError::NotConnected),
        }
    }

    fn is_pending(&self, addr: SocketAddr) -> bool {
        self.pending.lock().unwrap().contains_key(&addr)
    }

    async fn dispatch(self: &Arc<Self>, from: SocketAddr, packet: Packet) {
        let completes_handshake = packet.kind() == PacketKind::Ack && self.is_pending(from);

        if completes_handshake {
            return self.complete_handshake(from, packet).await;
        }

        if packet.kind() == PacketKind::Syn {
            return self.establish_new_connection(from, packet).await;
        }

        match self.endpoint(from) {
            Some(endpoint) => endpoint.handle_packet(packet).await,
            None => trace!("dropping {:?} from unknown peer {}", packet, from),
        }
    }

    async fn establish_new_connection(self: &Arc<Self>, from: SocketAddr, syn: Packet) {
        if self.endpoint(from).is_some() {
            debug!("ignoring SYN from connected peer {}", from);
            return;
        }

        let syn_ack = {
            let mut pending = self.pending.lock().unwrap();

            if pending.contains_key(&from) {
                debug!("ignoring SYN from pending peer {}", from);
                return;
            }

            let initial = SequenceNumber(rand::random());
            let syn_ack = Packet::syn_ack(initial, syn.sequence_number).to_vec();

            pending.insert(
                from,
                PendingConnection {
                    vars: ConnectionVars::new(initial + 1, syn.sequence_number),
                    initial_sequence_number: initial,
                    syn_ack: syn_ack.clone(),
                    attempts: 1,
                    timer: Some(tokio::spawn(retry_syn_ack(Arc::downgrade(self), from))),
                },
            );

            syn_ack
        };

        debug!("received SYN from {}, sending SYN-ACK", from);

        if let Err(err) = self.socket.send_to(&syn_ack, from).await {
            warn!("failed to send SYN-ACK to {}: {}", from, err);
            self.discard_pending(from);
        }
    }

    async fn complete_handshake(self: &Arc<Self>, from: SocketAddr, ack: Packet) {
        let pending = {
            let mut pending = self.pending.lock().unwrap();
            let accepted = pending
                .get(&from)
                .map(|connection| connection.accepts(&ack))
                .unwrap_or(false);

            if accepted {
                pending.remove(&from)
            } else {
                None
            }
        };

        let PendingConnection {
            mut vars, timer, ..
        } = match pending {
            Some(pending) => pending,
            None => {
                debug!("ignoring unexpected ACK from pending peer {}", from);
                return;
            }
        };

        if let Some(timer) = timer {
            timer.abort();
        }

        vars.set_state_open();

        let endpoint = ConnectionEndpoint::new(
            from,
            vars,
            Arc::clone(&self.socket),
            Arc::clone(&self.handler),
            self.config.clone(),
            Some(ServerHandle {
                inner: Arc::downgrade(self),
            }),
        );

        self.connections
            .lock()
            .unwrap()
            .insert(from, Arc::clone(&endpoint));
        endpoint.start_heartbeat();
        info!("accepted connection from {}", from);

        self.handler.on_connect(endpoint.handle()).await;
    }

    fn discard_pending(&self, addr: SocketAddr) {
        if let Some(pending) = self.pending.lock().unwrap().remove(&addr) {
            if let Some(timer) = pending.timer {
                timer.abort();
            }
        }
    }

    async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }

        let pending = self
            .pending
            .lock()
            .unwrap()
            .drain()
            .map(|(_, pending)| pending)
            .collect::<Vec<_>>();

        for timer in pending.into_iter().filter_map(|pending| pending.timer) {
            timer.abort();
        }

        let connections = self
            .connections
            .lock()
            .unwrap()
            .drain()
            .map(|(_, endpoint)| endpoint)
            .collect::<Vec<_>>();

        for endpoint in connections {
            endpoint.close().await;
        }

        info!("server closed");
    }
}

/// Resends the SYN-ACK every resend delay until the handshake completes or
/// the attempts run out.
async fn retry_syn_ack(weak: Weak<ServerInner>, peer: SocketAddr) {
    loop {
        let delay = match weak.upgrade() {
            Some(server) => server.config.resend_delay(),
            None => return,
        };

        tokio::time::sleep(delay).await;

        let server = match weak.upgrade() {
            Some(server) => server,
            None => return,
        };

        let syn_ack = {
            let mut pending = server.pending.lock().unwrap();

            let exhausted = match pending.get(&peer) {
                Some(connection) => connection.attempts >= server.config.handshake_attempts(),
                None => return,
            };

            if exhausted {
                debug!("handshake with {} timed out", peer);
                pending.remove(&peer);
                return;
            }

            match pending.get_mut(&peer) {
                Some(connection) => {
                    connection.attempts += 1;
                    connection.syn_ack.clone()
                }
                None => return,
            }
        };

        debug!("resending SYN-ACK to {}", peer);

        if let Err(err) = server.socket.send_to(&syn_ack, peer).await {
            warn!("failed to resend SYN-ACK to {}: {}", peer, err);
            server.pending.lock().unwrap().remove(&peer);
            return;
        }
    }
}

async fn recv_loop(server: Arc<ServerInner>) {
    let mut closed = server.closed.subscribe();
    let mut buff = vec![0u8; MAX_PACKET_SIZE];

    while !*closed.borrow() {
        let (read, from) = tokio::select! {
            result = server.socket.recv_from(&mut buff) => match result {
                Ok(received) => received,
                Err(err) => {
                    error!("failed to receive datagram: {}", err);
                    server.close().await;
                    break;
                }
            },
            _ = closed.changed() => break,
        };

        match Packet::parse(&buff[..read]) {
            Ok(packet) => server.dispatch(from, packet).await,
            Err(err) => debug!("dropping invalid packet from {}: {}", from, err),
        }
    }

    debug!("server receive loop stopped");
}
