use anyhow::bail;
use rand::Rng;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Lower bound of the ephemeral range that protocol-level flow ports are
///  drawn from when not configured explicitly.
pub const EPHEMERAL_PORT_MIN: u16 = 49152;

/// A uniform response-latency range, sampled once per inbound record.
#[derive(Clone, Copy, Debug)]
pub struct LatencyRange {
    pub min: Duration,
    pub max: Duration,
}

impl LatencyRange {
    pub fn new(min: Duration, max: Duration) -> LatencyRange {
        LatencyRange { min, max }
    }

    pub fn sample(&self, rng: &mut impl Rng) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        Duration::from_secs_f64(rng.gen_range(self.min.as_secs_f64()..=self.max.as_secs_f64()))
    }

    fn validate(&self, what: &str) -> anyhow::Result<()> {
        if self.max < self.min {
            bail!("{} latency range is inverted ({:?} > {:?})", what, self.min, self.max);
        }
        Ok(())
    }
}

/// Configuration of the traffic generator. All knobs are explicit; defaults
///  live in the binary's argument surface.
#[derive(Clone, Debug)]
pub struct SenderConfig {
    /// local UDP address; must have port 0 when running more than one flow
    pub bind_addr: SocketAddr,
    /// UDP address the receiver listens on
    pub peer_addr: SocketAddr,
    /// total full-size segment budget; together with `payload_len` this fixes
    ///  the payload byte budget of a run
    pub segment_count: u32,
    /// payload bytes per full segment
    pub payload_len: u16,
    /// minimum number of segments per series
    pub burst_min: u32,
    /// maximum number of segments per series
    pub burst_max: u32,
    /// probability that a series ends with a half-length segment
    pub half_tail_probability: f64,
    /// fixed delay between segment transmissions
    pub spacing: Duration,
    /// protocol-level source port; drawn from the ephemeral range when absent
    pub src_port: Option<u16>,
    /// protocol-level destination port; drawn from the ephemeral range when absent
    pub dst_port: Option<u16>,
    /// open each flow with a SYN handshake carrying the MSS option
    pub handshake: bool,
    /// start at sequence 0 instead of a random 32-bit value
    pub seq_from_zero: bool,
    /// summary log receiving the mean full-size round-trip latency in seconds
    pub summary_path: Option<PathBuf>,
}

impl SenderConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.segment_count == 0 {
            bail!("segment count must be at least 1");
        }
        if self.payload_len < 2 {
            bail!("payload length must be at least 2 to allow half-length segments");
        }
        if self.burst_min == 0 {
            bail!("series must contain at least one segment");
        }
        if self.burst_min > self.burst_max {
            bail!("series bounds are inverted ({} > {})", self.burst_min, self.burst_max);
        }
        if !(0.0..=1.0).contains(&self.half_tail_probability) {
            bail!("half-tail probability {} is not in [0, 1]", self.half_tail_probability);
        }
        Ok(())
    }
}

/// Configuration of the delayed-ack responder.
#[derive(Clone, Debug)]
pub struct ReceiverConfig {
    /// local UDP address; acknowledgments return to each frame's UDP source
    pub bind_addr: SocketAddr,
    /// primary response-latency range
    pub primary_latency: LatencyRange,
    /// alternate response-latency range
    pub alternate_latency: LatencyRange,
    /// probability that a record draws its latency from the alternate range
    pub alternate_probability: f64,
    /// full-size threshold applied while no MSS is known for a flow
    pub expected_payload_len: u16,
    /// extra delay before acknowledging a partial segment
    pub ack_delay: Duration,
    /// globally disable the delayed-ack behavior
    pub disable_delay: bool,
    /// acknowledge only the latest segment per flow, covering its predecessors
    pub combined_ack: bool,
    /// self-cancel after this long without arrivals
    pub idle_timeout: Option<Duration>,
    /// summary log receiving one or two space-separated mean latencies in seconds
    pub summary_path: Option<PathBuf>,
}

impl ReceiverConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.primary_latency.validate("primary")?;
        self.alternate_latency.validate("alternate")?;
        if !(0.0..=1.0).contains(&self.alternate_probability) {
            bail!("alternate probability {} is not in [0, 1]", self.alternate_probability);
        }
        Ok(())
    }
}
