//! Synthetic, precisely timed TCP-shaped probe traffic for evaluating in-network
//!  RTT measurement: a matched pair of endpoints that exchange a minimal,
//!  purpose-built transport protocol so that externally observed round-trip
//!  times can be compared against ground truth.
//!
//! ## The pair
//!
//! * The **sender** drives an outbound schedule of randomly sized series of
//!   data segments, optionally opening each flow with a SYN handshake. Every
//!   sent segment registers the acknowledgment number the peer is expected to
//!   answer with; matching inbound acknowledgments yield per-segment round-trip
//!   latencies. A series is emitted only once the previous one is fully
//!   acknowledged, so the schedule is self-clocked by the responder.
//! * The **receiver** observes inbound segments on a capture path and answers
//!   them from a response-scheduling path, injecting a randomized, configurable
//!   response latency per segment. It reproduces two TCP timing behaviors under
//!   operator control: *delayed acknowledgment* of partial segments (payload
//!   below the flow's MSS, or below a configured expected length while no MSS
//!   is known) and *coalesced acknowledgment* of several segments of a flow by
//!   a single ack covering the latest of them.
//!
//! The two processes interact only through frames traversing the link - a UDP
//!  socket pair carrying the TCP-shaped frame as its payload. The frame's own
//!  port pair is the flow identity; the UDP addresses are just the wire.
//!
//! This is explicitly *not* a TCP implementation: there is no congestion
//!  control, no loss detection and no retransmission. The protocol only needs
//!  to be recognizable at the packet level and to reproduce the selected
//!  timing behaviors on a loss-free test link.
//!
//! ## Frame layout
//!
//! All integers in network byte order (BE):
//!
//! ```ascii
//! 0:  flags (u8): SYN = 0x02, ACK = 0x10
//! 1:  source port (u16) - protocol-level flow identity, not the UDP port
//! 3:  destination port (u16)
//! 5:  sequence number (u32) - all arithmetic is mod 2^32
//! 9:  acknowledgment number (u32)
//! 13: MSS option (u16) - present exactly when SYN is set
//! *:  payload (opaque bytes, possibly empty)
//! ```
//!
//! The acknowledgment number answering a segment is `seq + payload_len` for
//!  data and `seq + 1` for a SYN, both mod 2^32.
//!
//! ## Summary artifact
//!
//! Each endpoint can write a one-line summary log on completion: the sender
//!  writes the mean full-size round-trip latency, the receiver one or two
//!  space-separated mean response latencies (primary regime, and the alternate
//!  regime if it was ever drawn), all in seconds.

pub mod config;
pub mod frame;
pub mod link;
pub mod receiver;
pub mod sender;
pub mod seq;
pub mod stats;
