use std::fmt::{Display, Formatter};

/// A 32-bit sequence or acknowledgment number. All arithmetic wraps mod 2^32.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct SeqNo(u32);

impl Display for SeqNo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SeqNo {
    pub const ZERO: SeqNo = SeqNo(0);

    pub fn from_raw(value: u32) -> Self {
        Self(value)
    }

    pub fn to_raw(&self) -> u32 {
        self.0
    }

    pub fn plus(&self, offset: u32) -> SeqNo {
        SeqNo(self.0.wrapping_add(offset))
    }

    /// The acknowledgment number a peer is expected to answer this segment
    ///  with: one past the sequence number for a SYN, sequence number plus
    ///  payload length for data.
    pub fn expected_ack(&self, payload_len: u32, syn: bool) -> SeqNo {
        if syn {
            self.plus(1)
        }
        else {
            self.plus(payload_len)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::simple(100, 10, 110)]
    #[case::zero_len(100, 0, 100)]
    #[case::wrap(u32::MAX - 4, 10, 5)]
    #[case::wrap_to_zero(u32::MAX, 1, 0)]
    fn test_plus(#[case] seq: u32, #[case] offset: u32, #[case] expected: u32) {
        assert_eq!(SeqNo::from_raw(seq).plus(offset), SeqNo::from_raw(expected));
    }

    #[rstest]
    #[case::data(100, 10, false, 110)]
    #[case::data_empty(100, 0, false, 100)]
    #[case::syn(100, 0, true, 101)]
    #[case::syn_ignores_len(100, 10, true, 101)]
    #[case::data_wrap(u32::MAX - 4, 10, false, 5)]
    #[case::syn_wrap(u32::MAX, 0, true, 0)]
    fn test_expected_ack(#[case] seq: u32, #[case] payload_len: u32, #[case] syn: bool, #[case] expected: u32) {
        assert_eq!(SeqNo::from_raw(seq).expected_ack(payload_len, syn), SeqNo::from_raw(expected));
    }
}
