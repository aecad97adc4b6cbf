use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

/// The unreliable datagram transport the protocol runs on top of.
///
/// Implemented for [`tokio::net::UdpSocket`]; other implementations can be
/// injected to simulate loss or to observe the traffic.
#[async_trait]
pub trait DatagramSocket: Send + Sync {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl DatagramSocket for UdpSocket {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}

/// A datagram socket shared between every connection of one client or server.
///
/// Sends are serialised so that datagrams from concurrent timers and the
/// receive loop are never interleaved on the underlying socket.
pub(crate) struct SharedSocket {
    inner: Arc<dyn DatagramSocket>,
    send_lock: Mutex<()>,
}

impl SharedSocket {
    pub(crate) fn new(inner: Arc<dyn DatagramSocket>) -> Self {
        Self {
            inner,
            send_lock: Mutex::new(()),
        }
    }

    pub(crate) async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<()> {
        let _guard = self.send_lock.lock().await;
        let sent = self.inner.send_to(buf, target).await?;

        if sent != buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("sent {} of {} bytes", sent, buf.len()),
            ));
        }

        Ok(())
    }

    pub(crate) async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.inner.recv_from(buf).await
    }

    pub(crate) fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}
