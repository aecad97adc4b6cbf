use super::{AckBuffer, ChunkAssembler, Packet, RecvBuffer, SequenceNumber, WINDOW_SIZE};
use log::*;
use std::collections::{HashMap, VecDeque};
use tokio::task::JoinHandle;

#[derive(Debug, PartialEq, Copy, Clone)]
pub(crate) enum ConnectionState {
    Handshaking,
    Open,
    Closed,
}

#[derive(Debug)]
pub(crate) struct ConnectionVars {
    /// The current state of the connection
    state: ConnectionState,

    /// The next number assigned to an outgoing reliable packet
    pub(super) local_sequence_number: SequenceNumber,

    /// The sequence number this side acknowledged the handshake with
    pub(super) handshake_sequence_number: SequenceNumber,

    /// The peer's initial sequence number
    pub(super) remote_sequence_number: SequenceNumber,

    /// Sent reliable packets awaiting acknowledgment
    pub(super) ack_buffer: AckBuffer,

    /// Reliable packets awaiting in-order delivery
    pub(super) recv_buffer: RecvBuffer,

    /// Packets that did not fit in the ack buffer, in sequence order
    pub(super) send_queue: VecDeque<Packet>,

    pub(super) chunks: ChunkAssembler,

    /// Retransmission tasks keyed by the packet they resend
    pub(super) timers: HashMap<SequenceNumber, JoinHandle<()>>,

    pub(super) heartbeat: Option<JoinHandle<()>>,
}

impl ConnectionVars {
    /// `local` is the first sequence number this side will send, `remote` is the
    /// initial sequence number of the peer.
    pub(crate) fn new(local: SequenceNumber, remote: SequenceNumber) -> Self {
        debug!("connection state initialised to HANDSHAKING");
        Self {
            state: ConnectionState::Handshaking,
            local_sequence_number: local,
            handshake_sequence_number: local,
            remote_sequence_number: remote,
            ack_buffer: AckBuffer::new(WINDOW_SIZE, local),
            recv_buffer: RecvBuffer::new(WINDOW_SIZE, remote + 1),
            send_queue: VecDeque::new(),
            chunks: ChunkAssembler::new(),
            timers: HashMap::new(),
            heartbeat: None,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn remote_sequence_number(&self) -> SequenceNumber {
        self.remote_sequence_number
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub(crate) fn set_state_open(&mut self) {
        assert!(self.state == ConnectionState::Handshaking);
        debug!("connection state set to OPEN");
        self.state = ConnectionState::Open;
    }

    /// Marks the connection closed and hands back every task it was running
    pub(crate) fn set_state_closed(&mut self) -> Vec<JoinHandle<()>> {
        assert!(self.state != ConnectionState::Closed);
        debug!("connection state set to CLOSED");
        self.state = ConnectionState::Closed;
        self.send_queue.clear();

        self.timers
            .drain()
            .map(|(_, timer)| timer)
            .chain(self.heartbeat.take())
            .collect()
    }
}
