use super::{check_reliable_payload, check_unreliable_payload};
use super::{Connection, ConnectionState, ConnectionVars, Packet, PacketKind, RecvEvent, SendError};
use super::SequenceNumber;
use crate::socket::SharedSocket;
use crate::{ConnectionConfig, Handler, ServerHandle};
use log::*;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Interval, MissedTickBehavior};

/// Drives one open connection: dispatches inbound packets, sends outbound
/// packets and owns the connection's timers.
pub(crate) struct ConnectionEndpoint {
    pub(super) peer_addr: SocketAddr,

    pub(super) vars: Mutex<ConnectionVars>,

    pub(super) socket: Arc<SharedSocket>,

    pub(super) config: ConnectionConfig,

    handler: Arc<dyn Handler>,

    closed: watch::Sender<bool>,

    /// The server that accepted this connection, `None` on the client side
    server: Option<ServerHandle>,
}

impl ConnectionEndpoint {
    pub(crate) fn new(
        peer_addr: SocketAddr,
        vars: ConnectionVars,
        socket: Arc<SharedSocket>,
        handler: Arc<dyn Handler>,
        config: ConnectionConfig,
        server: Option<ServerHandle>,
    ) -> Arc<Self> {
        assert!(vars.is_open());
        let (closed, _) = watch::channel(false);

        Arc::new(Self {
            peer_addr,
            vars: Mutex::new(vars),
            socket,
            config,
            handler,
            closed,
            server,
        })
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionVars> {
        self.vars.lock().unwrap()
    }

    pub(crate) fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub(crate) fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub(crate) fn is_open(&self) -> bool {
        self.lock().is_open()
    }

    pub(crate) fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    pub(crate) fn server(&self) -> Option<&ServerHandle> {
        self.server.as_ref()
    }

    pub(crate) fn handle(self: &Arc<Self>) -> Connection {
        Connection::new(Arc::clone(self))
    }

    /// Resolves once the connection has closed
    pub(crate) fn subscribe_closed(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    pub(crate) fn start_heartbeat(self: &Arc<Self>) {
        let endpoint = Arc::clone(self);
        let interval = self.config.heartbeat_interval();

        let task = tokio::spawn(async move {
            let mut ticker = heartbeat_ticker(interval);

            loop {
                ticker.tick().await;

                let datagrams = match endpoint.enqueue(|vars| vec![vars.create_heartbeat_packet()]) {
                    Ok(datagrams) => datagrams,
                    Err(_) => return,
                };

                if let Err(err) = endpoint.transmit_all(datagrams).await {
                    warn!("failed to send heartbeat to {}: {}", endpoint.peer_addr, err);
                    endpoint.spawn_close();
                    return;
                }
            }
        });

        let mut vars = self.lock();

        if vars.is_open() {
            vars.heartbeat = Some(task);
        } else {
            task.abort();
        }
    }

    pub(crate) async fn send_unreliable(&self, payload: &[u8]) -> Result<(), SendError> {
        check_unreliable_payload(payload)?;

        if !self.is_open() {
            return Err(SendError::NotConnected);
        }

        let datagram = Packet::unreliable(payload.to_vec()).to_vec();
        self.transmit_or_close(vec![datagram]).await
    }

    pub(crate) async fn send_reliable(self: &Arc<Self>, payload: &[u8]) -> Result<(), SendError> {
        check_reliable_payload(payload)?;

        let datagrams = self.enqueue(|vars| vars.create_reliable_packets(payload))?;
        self.transmit_or_close(datagrams).await
    }

    /// Starts the teardown handshake, the connection closes once the FIN is acknowledged
    pub(crate) async fn disconnect(self: &Arc<Self>) -> Result<(), SendError> {
        let datagrams = self.enqueue(|vars| vec![vars.create_fin_packet()])?;
        debug!("sending FIN to {}", self.peer_addr);

        self.transmit_or_close(datagrams).await
    }

    /// Closes the connection without notifying the peer. Closing twice has no effect.
    pub(crate) async fn close(&self) {
        let tasks = {
            let mut vars = self.lock();

            if vars.state() == ConnectionState::Closed {
                return;
            }

            vars.set_state_closed()
        };

        for task in tasks {
            task.abort();
        }

        self.closed.send_replace(true);
        info!("connection to {} closed", self.peer_addr);

        if let Some(server) = &self.server {
            server.forget(self.peer_addr);
        }

        self.handler.on_disconnect(self.peer_addr).await;
    }

    /// Closes from a new task, for use by timers which are aborted during close
    pub(crate) fn spawn_close(self: &Arc<Self>) {
        let endpoint = Arc::clone(self);
        tokio::spawn(async move { endpoint.close().await });
    }

    pub(crate) async fn handle_packet(self: &Arc<Self>, packet: Packet) {
        if !self.is_open() {
            trace!("dropping {:?} for closed connection {}", packet, self.peer_addr);
            return;
        }

        match packet.kind() {
            PacketKind::Syn => debug!("ignoring SYN from connected peer {}", self.peer_addr),
            PacketKind::SynAck => self.resend_handshake_ack().await,
            PacketKind::Ack => self.handle_ack(packet.ack_number()).await,
            PacketKind::FinAck => {
                debug!("received FIN-ACK from {}", self.peer_addr);
                self.close().await;
            }
            kind if kind.is_reliable() => self.handle_reliable(packet).await,
            _ => {
                self.handler
                    .on_receive(self.handle(), packet.payload)
                    .await
            }
        }
    }

    async fn handle_ack(self: &Arc<Self>, ack: SequenceNumber) {
        let datagrams = {
            let mut vars = self.lock();
            let mut datagrams = vec![];

            for outgoing in vars.recv_ack(ack) {
                self.arm_resend_timer(&mut *vars, outgoing.sequence_number);
                datagrams.push(outgoing.datagram);
            }

            datagrams
        };

        if !datagrams.is_empty() {
            let _ = self.transmit_or_close(datagrams).await;
        }
    }

    async fn handle_reliable(self: &Arc<Self>, packet: Packet) {
        let (ack, events) = {
            let mut vars = self.lock();
            let outcome = vars.recv_reliable(packet);
            let ack = outcome.ack.map(|seq| vars.create_ack_packet(seq).to_vec());

            (ack, outcome.events)
        };

        if let Some(ack) = ack {
            if self.transmit_or_close(vec![ack]).await.is_err() {
                return;
            }
        }

        for event in events {
            if !self.is_open() {
                return;
            }

            match event {
                RecvEvent::Deliver(payload) => self.handler.on_receive(self.handle(), payload).await,
                RecvEvent::Fin(seq) => {
                    debug!("received FIN from {}", self.peer_addr);
                    let fin_ack = self.lock().create_fin_ack_packet(seq).to_vec();

                    if let Err(err) = self.transmit_all(vec![fin_ack]).await {
                        warn!("failed to send FIN-ACK to {}: {}", self.peer_addr, err);
                    }

                    self.close().await;
                    return;
                }
                RecvEvent::Violation(err) => {
                    error!("protocol violation from {}: {}", self.peer_addr, err);
                    self.close().await;
                    return;
                }
            }
        }
    }

    /// The peer did not receive our handshake ACK and is still resending its SYN-ACK
    async fn resend_handshake_ack(&self) {
        let ack = self.lock().create_handshake_ack_packet().to_vec();
        debug!("re-acknowledging handshake with {}", self.peer_addr);

        let _ = self.transmit_or_close(vec![ack]).await;
    }

    /// Assigns sequence numbers and admits the packets atomically, returning the
    /// datagrams that may be sent now.
    fn enqueue<F>(self: &Arc<Self>, create: F) -> Result<Vec<Vec<u8>>, SendError>
    where
        F: FnOnce(&mut ConnectionVars) -> Vec<Packet>,
    {
        let mut vars = self.lock();

        if !vars.is_open() {
            return Err(SendError::NotConnected);
        }

        let mut datagrams = vec![];

        for packet in create(&mut *vars) {
            if let Some(outgoing) = vars.queue_message(packet) {
                self.arm_resend_timer(&mut *vars, outgoing.sequence_number);
                datagrams.push(outgoing.datagram);
            }
        }

        Ok(datagrams)
    }

    async fn transmit_all(&self, datagrams: Vec<Vec<u8>>) -> io::Result<()> {
        for datagram in datagrams {
            self.socket.send_to(&datagram, self.peer_addr).await?;
        }

        Ok(())
    }

    async fn transmit_or_close(&self, datagrams: Vec<Vec<u8>>) -> Result<(), SendError> {
        if let Err(err) = self.transmit_all(datagrams).await {
            warn!("failed to send to {}: {}", self.peer_addr, err);
            self.close().await;
            return Err(SendError::NotConnected);
        }

        Ok(())
    }
}

/// Heartbeats missed while the runtime was stalled are skipped rather than sent in a burst
fn heartbeat_ticker(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
