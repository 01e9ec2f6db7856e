use crate::seq::SeqNo;
use bitflags::bitflags;
use bytes::{Buf, BufMut};
use std::fmt::Debug;

bitflags! {
    #[derive(PartialEq, Eq, Copy, Clone)]
    pub struct FrameFlags: u8 {
        const SYN = 0x02;
        const ACK = 0x10;
    }
}

/// The TCP-shaped frame header carried as UDP payload (see the crate-level
///  docs for the wire layout). The MSS option is present exactly on SYN
///  frames; whatever follows the header is the segment payload.
#[derive(Clone, Eq, PartialEq)]
pub struct FrameHeader {
    pub flags: FrameFlags,
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: SeqNo,
    pub ack: SeqNo,
    pub mss: Option<u16>,
}

impl Debug for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FRM{{{}->{} seq={} ack={}", self.src_port, self.dst_port, self.seq, self.ack)?;
        if self.flags.contains(FrameFlags::SYN) {
            write!(f, " SYN")?;
        }
        if self.flags.contains(FrameFlags::ACK) {
            write!(f, " ACK")?;
        }
        if let Some(mss) = self.mss {
            write!(f, " mss={}", mss)?;
        }
        write!(f, "}}")
    }
}

impl FrameHeader {
    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.flags.bits());
        buf.put_u16(self.src_port);
        buf.put_u16(self.dst_port);
        buf.put_u32(self.seq.to_raw());
        buf.put_u32(self.ack.to_raw());
        if self.flags.contains(FrameFlags::SYN) {
            buf.put_u16(self.mss.unwrap_or(0));
        }
    }

    /// Parse a header from the start of a frame, leaving `buf` positioned at
    ///  the payload. Truncated frames yield an error that callers drop
    ///  silently - malformed or foreign traffic is simply never matched.
    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<FrameHeader> {
        let flags = FrameFlags::from_bits_truncate(buf.try_get_u8()?);
        let src_port = buf.try_get_u16()?;
        let dst_port = buf.try_get_u16()?;
        let seq = SeqNo::from_raw(buf.try_get_u32()?);
        let ack = SeqNo::from_raw(buf.try_get_u32()?);
        let mss = if flags.contains(FrameFlags::SYN) {
            Some(buf.try_get_u16()?)
        }
        else {
            None
        };

        Ok(FrameHeader {
            flags,
            src_port,
            dst_port,
            seq,
            ack,
            mss,
        })
    }
}
