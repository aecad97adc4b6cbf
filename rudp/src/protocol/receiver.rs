use super::{ChunkError, ConnectionVars, Packet, PacketKind, SequenceNumber};
use log::*;

/// What the endpoint must do after a reliable packet has been processed.
#[derive(Debug, PartialEq)]
pub(crate) enum RecvEvent {
    Deliver(Vec<u8>),
    /// The peer's FIN was reached in order, all later packets are discarded
    Fin(SequenceNumber),
    Violation(ChunkError),
}

#[derive(Debug, PartialEq)]
pub(crate) struct RecvOutcome {
    /// The sequence number to acknowledge, if any
    pub(crate) ack: Option<SequenceNumber>,
    pub(crate) events: Vec<RecvEvent>,
}

impl ConnectionVars {
    pub(crate) fn recv_reliable(&mut self, packet: Packet) -> RecvOutcome {
        let seq = packet.sequence_number;
        let is_fin = packet.kind() == PacketKind::Fin;

        if self.recv_buffer.in_range(seq) && !self.recv_buffer.is_occupied(seq) {
            if let Err(err) = self.recv_buffer.add(packet) {
                warn!("failed to buffer received packet: {}", err);
            }
        } else {
            trace!("received duplicate or out of window packet {}", seq);
        }

        // Packets behind the window are re-acknowledged, their earlier ack may have been lost
        let ack = if !(seq > self.recv_buffer.max_expected_sequence_number()) && !is_fin {
            Some(seq)
        } else {
            None
        };

        let events = if seq == self.recv_buffer.expected_sequence_number() {
            self.flush_received()
        } else {
            vec![]
        };

        RecvOutcome { ack, events }
    }

    fn flush_received(&mut self) -> Vec<RecvEvent> {
        let mut events = vec![];

        for packet in self.recv_buffer.flush() {
            match packet.kind() {
                PacketKind::Fin => {
                    events.push(RecvEvent::Fin(packet.sequence_number));
                    break;
                }
                PacketKind::Heartbeat => continue,
                PacketKind::Chunked { total, index } => {
                    match self.chunks.push(total, index, packet.payload) {
                        Ok(Some(message)) => events.push(RecvEvent::Deliver(message)),
                        Ok(None) => {}
                        Err(err) => {
                            events.push(RecvEvent::Violation(err));
                            break;
                        }
                    }
                }
                _ => events.push(RecvEvent::Deliver(packet.payload)),
            }
        }

        events
    }
}
