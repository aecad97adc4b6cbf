use super::{split_into_chunks, ConnectionVars, Packet, SequenceNumber};
use super::{MAX_DATA_PER_CHUNK, MAX_PAYLOAD_SIZE};
use log::*;
use thiserror::Error;

/// The failures an application observes synchronously when sending.
#[derive(Error, Debug, PartialEq)]
pub enum SendError {
    #[error("payload of {0} bytes exceeds the maximum of {1} bytes")]
    OversizedPayload(usize, usize),
    #[error("connection is not open")]
    NotConnected,
}

pub(crate) fn check_reliable_payload(payload: &[u8]) -> Result<(), SendError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(SendError::OversizedPayload(payload.len(), MAX_PAYLOAD_SIZE));
    }

    Ok(())
}

pub(crate) fn check_unreliable_payload(payload: &[u8]) -> Result<(), SendError> {
    if payload.len() > MAX_DATA_PER_CHUNK {
        return Err(SendError::OversizedPayload(payload.len(), MAX_DATA_PER_CHUNK));
    }

    Ok(())
}

/// A reliable packet admitted to the ack buffer, ready to be written to the socket
#[derive(Debug, PartialEq)]
pub(crate) struct Outgoing {
    pub(crate) sequence_number: SequenceNumber,
    pub(crate) datagram: Vec<u8>,
}

impl ConnectionVars {
    fn next_sequence_number(&mut self) -> SequenceNumber {
        let seq = self.local_sequence_number;
        self.local_sequence_number += 1;
        seq
    }

    /// Wraps a payload into one reliable packet, or a run of chunks when it
    /// does not fit in a single packet.
    pub(crate) fn create_reliable_packets(&mut self, payload: &[u8]) -> Vec<Packet> {
        if payload.len() <= MAX_DATA_PER_CHUNK {
            let seq = self.next_sequence_number();
            return vec![Packet::reliable(
                seq,
                self.remote_sequence_number,
                payload.to_vec(),
            )];
        }

        let packets = split_into_chunks(payload, self.local_sequence_number);
        self.local_sequence_number += packets.len() as u16;
        packets
    }

    pub(crate) fn create_heartbeat_packet(&mut self) -> Packet {
        let seq = self.next_sequence_number();
        Packet::heartbeat(seq, self.remote_sequence_number)
    }

    pub(crate) fn create_fin_packet(&mut self) -> Packet {
        let seq = self.next_sequence_number();
        Packet::fin(seq, self.remote_sequence_number)
    }

    pub(crate) fn create_ack_packet(&self, ack: SequenceNumber) -> Packet {
        Packet::ack(self.local_sequence_number, ack)
    }

    pub(crate) fn create_fin_ack_packet(&self, ack: SequenceNumber) -> Packet {
        Packet::fin_ack(self.local_sequence_number, ack)
    }

    pub(crate) fn create_handshake_ack_packet(&self) -> Packet {
        Packet::ack(self.handshake_sequence_number, self.remote_sequence_number)
    }

    /// Admits the packet to the ack buffer when there is room and nothing is
    /// waiting ahead of it, otherwise appends it to the overflow queue.
    pub(crate) fn queue_message(&mut self, packet: Packet) -> Option<Outgoing> {
        if self.ack_buffer.is_full() || !self.send_queue.is_empty() {
            self.send_queue.push_back(packet);
            return None;
        }

        self.admit(packet)
    }

    fn admit(&mut self, packet: Packet) -> Option<Outgoing> {
        let outgoing = Outgoing {
            sequence_number: packet.sequence_number,
            datagram: packet.to_vec(),
        };

        match self.ack_buffer.add(packet) {
            Ok(()) => Some(outgoing),
            Err(err) => {
                error!("failed to admit packet to ack buffer: {}", err);
                None
            }
        }
    }

    /// Records an acknowledgment and admits queued packets into the freed space
    pub(crate) fn recv_ack(&mut self, ack: SequenceNumber) -> Vec<Outgoing> {
        if !self.ack_buffer.is_acked(ack) {
            if let Err(err) = self.ack_buffer.signal_ack(ack) {
                debug!("ignoring ack: {}", err);
            }

            if let Some(timer) = self.timers.remove(&ack) {
                timer.abort();
            }
        }

        let mut ready = vec![];

        while !self.ack_buffer.is_full() {
            match self.send_queue.pop_front() {
                Some(packet) => ready.extend(self.admit(packet)),
                None => break,
            }
        }

        ready
    }
}
