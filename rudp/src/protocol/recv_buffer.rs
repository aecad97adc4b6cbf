use super::{sequence_greater_than, Packet, SequenceNumber};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub(crate) enum RecvBufferError {
    #[error("received packet {0} is a duplicate or outside of the window [{1}, +{2})")]
    DuplicateOrOutOfWindow(SequenceNumber, SequenceNumber, usize),
}

/// Reorders received reliable packets so they can be delivered strictly in sequence.
#[derive(Debug)]
pub(crate) struct RecvBuffer {
    slots: Vec<Option<Packet>>,
    base_index: usize,
    base: SequenceNumber,
    size: usize,
}

impl RecvBuffer {
    pub(crate) fn new(capacity: usize, base: SequenceNumber) -> Self {
        assert!(capacity > 0);

        Self {
            slots: (0..capacity).map(|_| None).collect(),
            base_index: 0,
            base,
            size: 0,
        }
    }

    fn capacity(&self) -> usize {
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

    #[cfg(test)]
    pub(crate) fn is_full(&self) -> bool {
        self.size >= self.capacity()
    }

    /// The smallest sequence number not yet delivered
    pub(crate) fn expected_sequence_number(&self) -> SequenceNumber {
        self.base
    }

    /// The last sequence number inside the advertised window
    pub(crate) fn max_expected_sequence_number(&self) -> SequenceNumber {
        self.base + (self.capacity() - 1) as u16
    }

    fn offset_in_window(&self, seq: SequenceNumber) -> Option<usize> {
        let offset = seq.offset_from(self.base);

        if offset >= self.capacity() || sequence_greater_than(self.base.0, seq.0) {
            None
        } else {
            Some(offset)
        }
    }

    pub(crate) fn in_range(&self, seq: SequenceNumber) -> bool {
        self.offset_in_window(seq).is_some()
    }

    /// Out of range numbers are reported as occupied, so callers never try to insert them
    pub(crate) fn is_occupied(&self, seq: SequenceNumber) -> bool {
        match self.offset_in_window(seq) {
            Some(offset) => self.slots[(self.base_index + offset) % self.capacity()].is_some(),
            None => true,
        }
    }

    pub(crate) fn add(&mut self, packet: Packet) -> Result<(), RecvBufferError> {
        let seq = packet.sequence_number;

        if self.is_occupied(seq) {
            return Err(RecvBufferError::DuplicateOrOutOfWindow(
                seq,
                self.base,
                self.capacity(),
            ));
        }

        let offset = seq.offset_from(self.base);
        let index = (self.base_index + offset) % self.capacity();
        self.slots[index] = Some(packet);
        self.size += 1;

        Ok(())
    }

    /// Removes the contiguous run of packets starting at the window base
    pub(crate) fn flush(&mut self) -> Vec<Packet> {
        let mut flushed = vec![];

        while let Some(packet) = self.slots[self.base_index].take() {
            flushed.push(packet);
            self.base_index = (self.base_index + 1) % self.capacity();
            self.base += 1;
            self.size -= 1;
        }

        flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packets(start: u16, count: u16) -> Vec<Packet> {
        (0..count)
            .map(|i| Packet::reliable(SequenceNumber(start.wrapping_add(i)), SequenceNumber(0), vec![]))
            .collect()
    }

    #[test]
    fn test_new_buffer() {
        let buffer = RecvBuffer::new(6, SequenceNumber(10));

        assert_eq!(buffer.is_empty(), true);
        assert_eq!(buffer.expected_sequence_number(), SequenceNumber(10));
        assert_eq!(buffer.max_expected_sequence_number(), SequenceNumber(15));
    }

    #[test]
    fn test_add_and_flush() {
        let start = 32672;
        let mut buffer = RecvBuffer::new(6, SequenceNumber(start));
        let packets = packets(start, 17);

        for packet in &packets[0..4] {
            buffer.add(packet.clone()).unwrap();
        }
        assert_eq!(buffer.size(), 4);
        assert_eq!(buffer.is_empty(), false);
        assert_eq!(buffer.is_full(), false);
        assert_eq!(buffer.flush(), packets[0..4].to_vec());

        buffer.add(packets[4].clone()).unwrap();
        buffer.add(packets[5].clone()).unwrap();
        buffer.add(packets[7].clone()).unwrap();
        buffer.add(packets[8].clone()).unwrap();
        buffer.add(packets[9].clone()).unwrap();

        assert!(buffer.add(packets[3].clone()).is_err());
        assert!(buffer.add(packets[10].clone()).is_err());
        assert_eq!(buffer.size(), 5);

        assert_eq!(buffer.flush(), packets[4..6].to_vec());
        assert_eq!(buffer.size(), 3);
        assert_eq!(buffer.flush(), vec![]);

        buffer.add(packets[6].clone()).unwrap();
        assert_eq!(buffer.flush(), packets[6..10].to_vec());
        assert_eq!(buffer.is_empty(), true);

        for packet in &packets[10..16] {
            buffer.add(packet.clone()).unwrap();
        }
        assert_eq!(buffer.is_full(), true);
        assert!(buffer.add(packets[16].clone()).is_err());

        assert_eq!(buffer.flush(), packets[10..16].to_vec());
        assert_eq!(buffer.is_empty(), true);
    }

    #[test]
    fn test_add_duplicate() {
        let mut buffer = RecvBuffer::new(6, SequenceNumber(0));
        let packets = packets(0, 2);

        buffer.add(packets[1].clone()).unwrap();

        assert_eq!(
            buffer.add(packets[1].clone()),
            Err(RecvBufferError::DuplicateOrOutOfWindow(
                SequenceNumber(1),
                SequenceNumber(0),
                6
            ))
        );
        assert_eq!(buffer.size(), 1);
    }

    #[test]
    fn test_flush_with_gap_at_base() {
        let mut buffer = RecvBuffer::new(6, SequenceNumber(0));

        for packet in packets(1, 3) {
            buffer.add(packet).unwrap();
        }

        assert_eq!(buffer.flush(), vec![]);
        assert_eq!(buffer.expected_sequence_number(), SequenceNumber(0));
        assert_eq!(buffer.size(), 3);
    }

    #[test]
    fn test_flush_across_wrap() {
        let mut buffer = RecvBuffer::new(6, SequenceNumber(0xFFFE));
        let packets = packets(0xFFFE, 4);

        for packet in packets.iter().rev() {
            buffer.add(packet.clone()).unwrap();
        }

        assert_eq!(buffer.flush(), packets);
        assert_eq!(buffer.expected_sequence_number(), SequenceNumber(2));
    }

    #[test]
    fn test_in_range_and_occupied() {
        let mut buffer = RecvBuffer::new(6, SequenceNumber(100));

        buffer.add(packets(102, 1).remove(0)).unwrap();

        assert_eq!(buffer.in_range(SequenceNumber(99)), false);
        assert_eq!(buffer.in_range(SequenceNumber(100)), true);
        assert_eq!(buffer.in_range(SequenceNumber(105)), true);
        assert_eq!(buffer.in_range(SequenceNumber(106)), false);

        assert_eq!(buffer.is_occupied(SequenceNumber(99)), true);
        assert_eq!(buffer.is_occupied(SequenceNumber(100)), false);
        assert_eq!(buffer.is_occupied(SequenceNumber(102)), true);
        assert_eq!(buffer.is_occupied(SequenceNumber(106)), true);
    }

    #[test]
    fn test_max_expected_wraps() {
        let buffer = RecvBuffer::new(32, SequenceNumber(65530));

        assert_eq!(buffer.max_expected_sequence_number(), SequenceNumber(25));
    }
}
