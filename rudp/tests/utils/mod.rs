#![allow(dead_code)]

use async_trait::async_trait;
use rudp::{ConnectionConfig, Connection, DatagramSocket, Handler, HEADER_SIZE};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Once};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

static INIT: Once = Once::new();

pub fn setup() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

pub fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// Clients bind to loopback so their local address matches what the server sees
pub fn client_config() -> ConnectionConfig {
    ConnectionConfig::default().with_bind_addr(loopback())
}

#[derive(Debug, PartialEq, Clone)]
pub enum Event {
    Connected(SocketAddr),
    Received(SocketAddr, Vec<u8>),
    Disconnected(SocketAddr),
}

/// Forwards every callback to a channel for the test to assert on
pub struct RecordingHandler {
    events: mpsc::UnboundedSender<Event>,
}

impl RecordingHandler {
    pub fn new() -> (Arc<Self>, Events) {
        let (tx, rx) = mpsc::unbounded_channel();

        (Arc::new(Self { events: tx }), Events(rx))
    }

    pub fn record(&self, event: Event) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl Handler for RecordingHandler {
    async fn on_connect(&self, connection: Connection) {
        self.record(Event::Connected(connection.peer_addr()));
    }

    async fn on_disconnect(&self, peer: SocketAddr) {
        self.record(Event::Disconnected(peer));
    }

    async fn on_receive(&self, connection: Connection, payload: Vec<u8>) {
        self.record(Event::Received(connection.peer_addr(), payload));
    }
}

pub struct Events(mpsc::UnboundedReceiver<Event>);

impl Events {
    pub async fn next(&mut self) -> Event {
        self.next_within(Duration::from_secs(5))
            .await
            .expect("timed out waiting for event")
    }

    pub async fn next_within(&mut self, timeout: Duration) -> Option<Event> {
        match tokio::time::timeout(timeout, self.0.recv()).await {
            Ok(event) => Some(event.expect("event channel closed")),
            Err(_) => None,
        }
    }

    /// Skips events until one of the given kind arrives
    pub async fn next_received(&mut self) -> (SocketAddr, Vec<u8>) {
        loop {
            if let Event::Received(from, payload) = self.next().await {
                return (from, payload);
            }
        }
    }

    pub async fn next_disconnected(&mut self) -> SocketAddr {
        loop {
            if let Event::Disconnected(peer) = self.next().await {
                return peer;
            }
        }
    }
}

/// Polls the condition until it holds or the timeout passes
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);

    while Instant::now() < deadline {
        if condition() {
            return true;
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    condition()
}

/// A loopback UDP socket that records outbound datagrams and can drop
/// selected payloads.
pub struct TestSocket {
    inner: UdpSocket,
    drop_once: Mutex<Vec<Vec<u8>>>,
    drop_sends: Mutex<Vec<usize>>,
    sent: Mutex<Vec<(Instant, Vec<u8>)>>,
}

impl TestSocket {
    pub async fn bind() -> Arc<Self> {
        Arc::new(Self {
            inner: UdpSocket::bind(loopback()).await.unwrap(),
            drop_once: Mutex::new(vec![]),
            drop_sends: Mutex::new(vec![]),
            sent: Mutex::new(vec![]),
        })
    }

    /// The next datagram carrying this payload is silently discarded
    pub fn drop_next(&self, payload: &[u8]) {
        self.drop_once.lock().unwrap().push(payload.to_vec());
    }

    /// The n-th datagram sent through this socket, counting from 1, is discarded
    pub fn drop_send_number(&self, n: usize) {
        self.drop_sends.lock().unwrap().push(n);
    }

    /// Send attempts, including dropped ones, for datagrams carrying this payload
    pub fn transmissions_of(&self, payload: &[u8]) -> Vec<Instant> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, datagram)| datagram.len() > HEADER_SIZE && &datagram[HEADER_SIZE..] == payload)
            .map(|(at, _)| *at)
            .collect()
    }

    /// Every datagram sent, including dropped ones, in send order
    pub fn datagrams(&self) -> Vec<Vec<u8>> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, datagram)| datagram.clone())
            .collect()
    }

    /// Datagrams which carry application data
    pub fn data_datagrams(&self) -> usize {
        const CHUNKED: u8 = 0x10;

        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, datagram)| datagram.len() > HEADER_SIZE || datagram[1] & CHUNKED != 0)
            .count()
    }
}

#[async_trait]
impl DatagramSocket for TestSocket {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        let number = {
            let mut sent = self.sent.lock().unwrap();
            sent.push((Instant::now(), buf.to_vec()));
            sent.len()
        };

        if self.drop_sends.lock().unwrap().contains(&number) {
            return Ok(buf.len());
        }

        let dropped = {
            let mut drop_once = self.drop_once.lock().unwrap();
            let payload = buf.get(HEADER_SIZE..).unwrap_or_default();

            match drop_once.iter().position(|p| p.as_slice() == payload) {
                Some(index) => {
                    drop_once.remove(index);
                    true
                }
                None => false,
            }
        };

        if dropped {
            return Ok(buf.len());
        }

        self.inner.send_to(buf, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.inner.recv_from(buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}
