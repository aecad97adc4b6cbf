use super::{ConnectionVars, Packet, PacketKind, SequenceNumber, MAX_PACKET_SIZE};
use crate::socket::SharedSocket;
use crate::ConnectionConfig;
use anyhow::{Context, Error, Result};
use log::*;
use std::net::SocketAddr;
use tokio::time::{timeout_at, Instant};

/// Performs the initiating side of the handshake, returning the state of the
/// now open connection.
pub(crate) async fn negotiate_connection(
    socket: &SharedSocket,
    peer: SocketAddr,
    config: &ConnectionConfig,
) -> Result<ConnectionVars> {
    let initial = SequenceNumber(rand::random());
    let syn = Packet::syn(initial).to_vec();
    let mut buff = [0u8; MAX_PACKET_SIZE];

    for attempt in 1..=config.handshake_attempts() {
        socket
            .send_to(&syn, peer)
            .await
            .context("failed to send SYN")?;
        debug!("sent SYN {} to {} (attempt {})", initial, peer, attempt);

        let deadline = Instant::now() + config.resend_delay();

        while let Some(packet) = recv_from_peer(socket, peer, &mut buff, deadline).await? {
            if packet.kind() != PacketKind::SynAck || packet.ack_number() != initial {
                debug!("ignoring {:?} while waiting for SYN-ACK", packet);
                continue;
            }

            debug!("received SYN-ACK {} from {}", packet.sequence_number, peer);
            let mut vars = ConnectionVars::new(initial + 1, packet.sequence_number);

            socket
                .send_to(&vars.create_handshake_ack_packet().to_vec(), peer)
                .await
                .context("failed to send handshake ACK")?;

            vars.set_state_open();
            return Ok(vars);
        }
    }

    Err(Error::msg(format!(
        "timed out waiting for SYN-ACK from {}",
        peer
    )))
}

/// Waits for a valid packet from the peer until the deadline passes
async fn recv_from_peer(
    socket: &SharedSocket,
    peer: SocketAddr,
    buff: &mut [u8],
    deadline: Instant,
) -> Result<Option<Packet>> {
    loop {
        let (read, from) = match timeout_at(deadline, socket.recv_from(buff)).await {
            Ok(result) => result.context("failed to receive handshake packet")?,
            Err(_) => return Ok(None),
        };

        if from != peer {
            debug!("dropping datagram from unknown peer {}", from);
            continue;
        }

        match Packet::parse(&buff[..read]) {
            Ok(packet) => return Ok(Some(packet)),
            Err(err) => debug!("dropping invalid packet from {}: {}", from, err),
        }
    }
}
