use super::{sequence_greater_than, Packet, SequenceNumber};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub(crate) enum AckBufferError {
    #[error("sequence number {0} is outside of the window [{1}, +{2})")]
    OutOfWindow(SequenceNumber, SequenceNumber, usize),
    #[error("sequence number {0} is already in flight")]
    AlreadyInFlight(SequenceNumber),
    #[error("cannot find {0} in an empty buffer")]
    EmptyBuffer(SequenceNumber),
    #[error("sequence number {0} is no longer tracked")]
    Expired(SequenceNumber),
}

#[derive(Debug)]
struct Slot {
    packet: Packet,
    times_accessed: u32,
    acked: bool,
}

/// Sliding window of sent reliable packets awaiting acknowledgment.
///
/// The window only ever advances from its base: acknowledging a later slot marks it,
/// and the base moves past every contiguously acknowledged slot once the base itself
/// is acknowledged.
#[derive(Debug)]
pub(crate) struct AckBuffer {
    slots: Vec<Option<Slot>>,
    base_index: usize,
    base: SequenceNumber,
    size: usize,
}

impl AckBuffer {
    pub(crate) fn new(capacity: usize, base: SequenceNumber) -> Self {
        assert!(capacity > 0);

        Self {
            slots: (0..capacity).map(|_| None).collect(),
            base_index: 0,
            base,
            size: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[cfg(test)]
    pub(crate) fn size(&self) -> usize {
        self.size
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub(crate) fn is_full(&self) -> bool {
        self.size >= self.capacity()
    }

    /// The smallest unacknowledged sequence number
    #[cfg(test)]
    pub(crate) fn expected_sequence_number(&self) -> SequenceNumber {
        self.base
    }

    fn in_window(&self, seq: SequenceNumber) -> Option<usize> {
        let offset = seq.offset_from(self.base);

        if offset >= self.capacity() || sequence_greater_than(self.base.0, seq.0) {
            return None;
        }

        Some(offset)
    }

    fn index_of(&self, offset: usize) -> usize {
        (self.base_index + offset) % self.capacity()
    }

    fn window_error(&self, seq: SequenceNumber) -> AckBufferError {
        AckBufferError::OutOfWindow(seq, self.base, self.capacity())
    }

    pub(crate) fn add(&mut self, packet: Packet) -> Result<(), AckBufferError> {
        let seq = packet.sequence_number;
        let offset = self.in_window(seq).ok_or_else(|| self.window_error(seq))?;
        let index = self.index_of(offset);

        if self.slots[index].is_some() {
            return Err(AckBufferError::AlreadyInFlight(seq));
        }

        self.slots[index] = Some(Slot {
            packet,
            times_accessed: 0,
            acked: false,
        });
        self.size += 1;

        Ok(())
    }

    pub(crate) fn signal_ack(&mut self, seq: SequenceNumber) -> Result<(), AckBufferError> {
        let offset = self.in_window(seq).ok_or_else(|| self.window_error(seq))?;
        let index = self.index_of(offset);

        match self.slots[index].as_mut() {
            Some(slot) => slot.acked = true,
            None => return Err(self.window_error(seq)),
        }

        if index != self.base_index {
            return Ok(());
        }

        while matches!(self.slots[self.base_index], Some(Slot { acked: true, .. })) {
            self.slots[self.base_index] = None;
            self.base_index = (self.base_index + 1) % self.capacity();
            self.base += 1;
            self.size -= 1;
        }

        Ok(())
    }

    fn tracked_slot(&mut self, seq: SequenceNumber) -> Result<&mut Slot, AckBufferError> {
        if self.size == 0 {
            return Err(AckBufferError::EmptyBuffer(seq));
        }

        let offset = self.in_window(seq).ok_or_else(|| self.window_error(seq))?;

        if offset >= self.size {
            return Err(AckBufferError::Expired(seq));
        }

        let index = self.index_of(offset);

        self.slots[index]
            .as_mut()
            .ok_or(AckBufferError::Expired(seq))
    }

    /// Returns the buffered packet for retransmission, counting the access
    pub(crate) fn find_data(&mut self, seq: SequenceNumber) -> Result<&Packet, AckBufferError> {
        let slot = self.tracked_slot(seq)?;
        slot.times_accessed += 1;

        Ok(&slot.packet)
    }

    pub(crate) fn times_accessed(&mut self, seq: SequenceNumber) -> Result<u32, AckBufferError> {
        Ok(self.tracked_slot(seq)?.times_accessed)
    }

    /// Anything outside of the tracked span is considered settled
    pub(crate) fn is_acked(&self, seq: SequenceNumber) -> bool {
        if self.size == 0 {
            return true;
        }

        let offset = match self.in_window(seq) {
            Some(offset) if offset < self.size => offset,
            _ => return true,
        };

        match &self.slots[self.index_of(offset)] {
            Some(slot) => slot.acked,
            None => true,
        }
    }
}
