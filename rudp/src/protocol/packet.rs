use super::SequenceNumber;
use bitflags::bitflags;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::Cursor;
use thiserror::Error;

/// Fixed marker carried in the first byte of every packet
pub const VERSION_MARKER: u8 = 0xAA;
/// Marker (1) + flags (1) + sequence number (2) + aux field (2)
pub const HEADER_SIZE: usize = 6;
/// Largest datagram either side will send or read
pub const MAX_PACKET_SIZE: usize = 1024;
/// Payload bytes that fit in a single packet
pub const MAX_DATA_PER_CHUNK: usize = MAX_PACKET_SIZE - HEADER_SIZE;
/// The chunk count is packed into one byte as (total - 1)
pub const MAX_CHUNKS: usize = 256;
/// Largest payload accepted by a reliable send
pub const MAX_PAYLOAD_SIZE: usize = MAX_DATA_PER_CHUNK * MAX_CHUNKS;
/// Capacity of both the acknowledgment and receive windows
pub const WINDOW_SIZE: usize = 32;

bitflags! {
    #[derive(Debug, PartialEq, Eq, Copy, Clone)]
    pub(crate) struct PacketFlags: u8 {
        const SYN       = 0b1000_0000;
        const ACK       = 0b0100_0000;
        const RELIABLE  = 0b0010_0000;
        const CHUNKED   = 0b0001_0000;
        const HEARTBEAT = 0b0000_1000;
        const FIN       = 0b0000_0100;
    }
}

/// What a packet means for routing, derived once from its flags.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub(crate) enum PacketKind {
    Syn,
    SynAck,
    Ack,
    FinAck,
    Fin,
    Heartbeat,
    Chunked { total: usize, index: usize },
    Reliable,
    Unreliable,
}

impl PacketKind {
    fn classify(flags: PacketFlags, aux: u16) -> Self {
        if flags.contains(PacketFlags::SYN) {
            if flags.contains(PacketFlags::ACK) {
                PacketKind::SynAck
            } else {
                PacketKind::Syn
            }
        } else if flags.contains(PacketFlags::ACK) {
            if flags.contains(PacketFlags::FIN) {
                PacketKind::FinAck
            } else {
                PacketKind::Ack
            }
        } else if flags.contains(PacketFlags::RELIABLE) {
            if flags.contains(PacketFlags::FIN) {
                PacketKind::Fin
            } else if flags.contains(PacketFlags::HEARTBEAT) {
                PacketKind::Heartbeat
            } else if flags.contains(PacketFlags::CHUNKED) {
                let [total, index] = aux.to_be_bytes();
                PacketKind::Chunked {
                    total: total as usize + 1,
                    index: index as usize,
                }
            } else {
                PacketKind::Reliable
            }
        } else {
            PacketKind::Unreliable
        }
    }

    /// Whether the packet occupies a sequence number and must be acknowledged
    pub(crate) fn is_reliable(&self) -> bool {
        matches!(
            self,
            PacketKind::Fin | PacketKind::Heartbeat | PacketKind::Chunked { .. } | PacketKind::Reliable
        )
    }
}

#[derive(PartialEq, Clone)]
pub(crate) struct Packet {
    flags: PacketFlags,

    kind: PacketKind,

    pub(crate) sequence_number: SequenceNumber,

    /// Ack number, or the packed chunk total and index for chunked packets
    aux: u16,

    pub(crate) payload: Vec<u8>,
}

#[derive(Error, Debug, PartialEq)]
pub(crate) enum PacketParseError {
    #[error("received packet is too small: {0}")]
    BufferTooSmall(usize),
    #[error("received packet has unknown version marker: {0:#04x}")]
    InvalidMarker(u8),
}

impl Packet {
    fn new(flags: PacketFlags, sequence_number: SequenceNumber, aux: u16, payload: Vec<u8>) -> Self {
        Self {
            flags,
            kind: PacketKind::classify(flags, aux),
            sequence_number,
            aux,
            payload,
        }
    }

    pub(crate) fn unreliable(payload: Vec<u8>) -> Self {
        Self::new(PacketFlags::empty(), SequenceNumber(0), 0, payload)
    }

    pub(crate) fn reliable(seq: SequenceNumber, ack: SequenceNumber, payload: Vec<u8>) -> Self {
        Self::new(PacketFlags::RELIABLE, seq, ack.0, payload)
    }

    pub(crate) fn chunk(seq: SequenceNumber, total: usize, index: usize, payload: Vec<u8>) -> Self {
        assert!(total >= 1 && total <= MAX_CHUNKS && index < total);
        let aux = u16::from_be_bytes([(total - 1) as u8, index as u8]);

        Self::new(PacketFlags::RELIABLE | PacketFlags::CHUNKED, seq, aux, payload)
    }

    pub(crate) fn syn(seq: SequenceNumber) -> Self {
        Self::new(PacketFlags::SYN, seq, 0, vec![])
    }

    pub(crate) fn syn_ack(seq: SequenceNumber, ack: SequenceNumber) -> Self {
        Self::new(PacketFlags::SYN | PacketFlags::ACK, seq, ack.0, vec![])
    }

    pub(crate) fn ack(seq: SequenceNumber, ack: SequenceNumber) -> Self {
        Self::new(PacketFlags::ACK, seq, ack.0, vec![])
    }

    pub(crate) fn heartbeat(seq: SequenceNumber, ack: SequenceNumber) -> Self {
        Self::new(PacketFlags::RELIABLE | PacketFlags::HEARTBEAT, seq, ack.0, vec![])
    }

    pub(crate) fn fin(seq: SequenceNumber, ack: SequenceNumber) -> Self {
        Self::new(PacketFlags::RELIABLE | PacketFlags::FIN, seq, ack.0, vec![])
    }

    pub(crate) fn fin_ack(seq: SequenceNumber, ack: SequenceNumber) -> Self {
        Self::new(
            PacketFlags::ACK | PacketFlags::RELIABLE | PacketFlags::FIN,
            seq,
            ack.0,
            vec![],
        )
    }

    pub(crate) fn parse(data: &[u8]) -> Result<Packet, PacketParseError> {
        if data.len() < HEADER_SIZE {
            return Err(PacketParseError::BufferTooSmall(data.len()));
        }

        let mut cursor = Cursor::new(data);

        // Reads cannot fail as the length has been checked above
        let marker = cursor.read_u8().unwrap();

        if marker != VERSION_MARKER {
            return Err(PacketParseError::InvalidMarker(marker));
        }

        let flags = PacketFlags::from_bits_retain(cursor.read_u8().unwrap());
        let sequence_number = SequenceNumber(cursor.read_u16::<BigEndian>().unwrap());
        let aux = cursor.read_u16::<BigEndian>().unwrap();
        let payload = data[HEADER_SIZE..].to_vec();

        Ok(Packet::new(flags, sequence_number, aux, payload))
    }

    pub(crate) fn to_vec(&self) -> Vec<u8> {
        let mut buff = Vec::with_capacity(HEADER_SIZE + self.payload.len());

        // Writes to a Vec cannot fail
        buff.write_u8(VERSION_MARKER).unwrap();
        buff.write_u8(self.flags.bits()).unwrap();
        buff.write_u16::<BigEndian>(self.sequence_number.0).unwrap();
        buff.write_u16::<BigEndian>(self.aux).unwrap();
        buff.extend_from_slice(&self.payload);

        buff
    }

    pub(crate) fn kind(&self) -> PacketKind {
        self.kind
    }

    pub(crate) fn ack_number(&self) -> SequenceNumber {
        SequenceNumber(self.aux)
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("kind", &self.kind)
            .field("sequence_number", &self.sequence_number.0)
            .field("aux", &self.aux)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}
