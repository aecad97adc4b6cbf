use std::fmt::Display;
use std::{cmp, ops};

/// Represents a wrapping u16 identifying a reliable packet within a connection.
#[derive(Debug, PartialEq, Copy, Clone, Hash, Eq)]
pub(crate) struct SequenceNumber(pub(crate) u16);

/// Sequence numbers will wrap after exceeding 16-bit space
impl ops::Add<u16> for SequenceNumber {
    type Output = Self;

    fn add(self, rhs: u16) -> Self {
        Self(self.0.wrapping_add(rhs))
    }
}

impl ops::AddAssign<u16> for SequenceNumber {
    fn add_assign(&mut self, rhs: u16) {
        self.0 = self.0.wrapping_add(rhs);
    }
}

impl ops::Sub<u16> for SequenceNumber {
    type Output = Self;

    fn sub(self, rhs: u16) -> Self {
        Self(self.0.wrapping_sub(rhs))
    }
}

impl SequenceNumber {
    /// The forward distance from `base` to this number, modulo 2^16.
    pub(crate) fn offset_from(self, base: SequenceNumber) -> usize {
        self.0.wrapping_sub(base.0) as usize
    }
}

/// A is ahead of B if the forward distance from B to A is at most 0x8000.
///
/// Hence the following cases:
///  - Seq(2) > Seq(1)
///  - Seq(1) > Seq(u16::MAX)
pub(crate) fn sequence_greater_than(a: u16, b: u16) -> bool {
    (a > b && a - b <= 0x8000) || (a < b && b - a > 0x8000)
}

impl cmp::PartialOrd for SequenceNumber {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        if self.0 == other.0 {
            Some(cmp::Ordering::Equal)
        } else if sequence_greater_than(self.0, other.0) {
            Some(cmp::Ordering::Greater)
        } else {
            Some(cmp::Ordering::Less)
        }
    }
}

impl Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Seq({})", self.0)
    }
}
