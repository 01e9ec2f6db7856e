use crate::config::{SenderConfig, EPHEMERAL_PORT_MIN};
use crate::frame::{FrameFlags, FrameHeader};
use crate::link::FrameSocket;
use crate::seq::SeqNo;
use crate::stats::{write_summary, LatencySamples};
use anyhow::bail;
use bytes::{BufMut, BytesMut};
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::UdpSocket;
use tokio::time::sleep;
use tracing::{debug, info, trace};

/// A segment laid out for transmission within the current series.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct SegmentPlan {
    pub seq: SeqNo,
    pub payload_len: u16,
    pub syn: bool,
}

impl SegmentPlan {
    pub fn expected_ack(&self) -> SeqNo {
        self.seq.expected_ack(self.payload_len as u32, self.syn)
    }
}

/// What a sent-but-unacknowledged segment leaves behind: the correlation
///  state consumed when the matching acknowledgment arrives.
#[derive(Clone, Copy, Debug)]
struct PendingAck {
    sent_at: Instant,
    payload_len: u16,
    syn: bool,
}

/// Outcome of correlating one inbound acknowledgment.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum AckOutcome {
    /// not the highest outstanding expected ack - keep waiting
    Waiting,
    /// the current series is fully acknowledged - emit the next one
    SeriesComplete,
    /// the final sequence number is acknowledged - the run is over
    RunComplete,
}

/// Sequence bookkeeping and acknowledgment correlation for one flow,
///  `Idle -> (Handshaking) -> Sending -> AwaitingAck -> Sending | Done`.
///  The driver below owns the socket; everything in here is synchronous and
///  deterministic given an RNG.
pub struct SenderState {
    payload_len: u16,
    burst_min: u32,
    burst_max: u32,
    half_tail_probability: f64,
    /// next sequence number to assign
    cursor: SeqNo,
    /// cursor value reached once the whole byte budget (and the optional SYN
    ///  unit) has been laid out
    final_seq: SeqNo,
    /// unsent payload bytes
    bytes_remaining: u64,
    /// sent segments awaiting their acknowledgment, keyed by expected ack.
    ///  A reused key overwrites the previous entry (last wins) - coarse
    ///  matching that mirrors the acknowledgment semantics of the protocol.
    pending: FxHashMap<u32, PendingAck>,
    /// expected ack of the most recently sent segment
    highest_expected_ack: SeqNo,
    /// round-trip latencies of acknowledged full-size segments
    pub samples: LatencySamples,
    done: bool,
}

impl SenderState {
    pub fn new(config: &SenderConfig, initial_seq: SeqNo) -> SenderState {
        let bytes_total = config.segment_count as u64 * config.payload_len as u64;
        let final_seq = if config.handshake {
            initial_seq.plus(1).plus(bytes_total as u32)
        }
        else {
            initial_seq.plus(bytes_total as u32)
        };

        SenderState {
            payload_len: config.payload_len,
            burst_min: config.burst_min,
            burst_max: config.burst_max,
            half_tail_probability: config.half_tail_probability,
            cursor: initial_seq,
            final_seq,
            bytes_remaining: bytes_total,
            pending: FxHashMap::default(),
            highest_expected_ack: initial_seq,
            samples: LatencySamples::default(),
            done: false,
        }
    }

    pub fn final_seq(&self) -> SeqNo {
        self.final_seq
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// The handshake SYN, consuming one sequence unit ahead of all data.
    pub fn plan_handshake(&mut self) -> SegmentPlan {
        let plan = SegmentPlan {
            seq: self.cursor,
            payload_len: 0,
            syn: true,
        };
        self.cursor = self.cursor.plus(1);
        plan
    }

    /// Lay out the next series: a uniformly drawn number of full segments,
    ///  the last of which is shortened to half length with the configured
    ///  probability. The series never overruns the remaining byte budget.
    pub fn plan_series(&mut self, rng: &mut impl Rng) -> Vec<SegmentPlan> {
        let series_len = rng.gen_range(self.burst_min..=self.burst_max);
        let mut plans = Vec::new();

        for i in 0..series_len {
            if self.bytes_remaining == 0 {
                break;
            }
            let mut payload_len = (self.payload_len as u64).min(self.bytes_remaining) as u16;
            let is_tail = i + 1 == series_len;
            if is_tail && payload_len == self.payload_len && rng.gen_bool(self.half_tail_probability) {
                payload_len = self.payload_len / 2;
            }

            plans.push(SegmentPlan {
                seq: self.cursor,
                payload_len,
                syn: false,
            });
            self.cursor = self.cursor.plus(payload_len as u32);
            self.bytes_remaining -= payload_len as u64;
        }
        plans
    }

    /// Record actual transmission of a planned segment, registering the
    ///  pending acknowledgment under its expected-ack value.
    pub fn register_sent(&mut self, plan: &SegmentPlan, sent_at: Instant) {
        let expected = plan.expected_ack();
        let previous = self.pending.insert(expected.to_raw(), PendingAck {
            sent_at,
            payload_len: plan.payload_len,
            syn: plan.syn,
        });
        if previous.is_some() {
            debug!("expected ack {} reused before resolution - keeping the newer segment", expected);
        }
        self.highest_expected_ack = expected;
    }

    /// Correlate one inbound acknowledgment number. An unmatched value is
    ///  silently absorbed; the highest outstanding expected ack clocks the
    ///  next series (or completes the run once the budget is spent).
    pub fn on_ack(&mut self, ack: SeqNo, now: Instant) -> AckOutcome {
        if let Some(pending) = self.pending.remove(&ack.to_raw()) {
            let rtt = now.duration_since(pending.sent_at);
            if !pending.syn && pending.payload_len == self.payload_len {
                trace!("ack {} resolves a full-size segment after {:?}", ack, rtt);
                self.samples.push(rtt);
            }
            else {
                trace!("ack {} resolves a {}-byte segment after {:?} - not a full-size sample",
                       ack, pending.payload_len, rtt);
            }
        }
        else {
            trace!("ack {} matches no pending segment - ignoring", ack);
        }

        if self.done || ack != self.highest_expected_ack {
            return AckOutcome::Waiting;
        }
        if self.bytes_remaining == 0 {
            self.done = true;
            AckOutcome::RunComplete
        }
        else {
            AckOutcome::SeriesComplete
        }
    }
}

async fn send_segment(
    socket: &impl FrameSocket,
    peer: SocketAddr,
    src_port: u16,
    dst_port: u16,
    plan: &SegmentPlan,
    mss: Option<u16>,
    rng: &mut StdRng,
) {
    let header = FrameHeader {
        flags: if plan.syn { FrameFlags::SYN } else { FrameFlags::empty() },
        src_port,
        dst_port,
        seq: plan.seq,
        ack: SeqNo::ZERO,
        mss,
    };

    let mut buf = BytesMut::with_capacity(32 + plan.payload_len as usize);
    header.ser(&mut buf);
    let payload: Vec<u8> = std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .take(plan.payload_len as usize)
        .collect();
    buf.put_slice(&payload);

    debug!("OUT {:?} len={}", header, plan.payload_len);
    socket.send_frame(peer, buf.as_ref()).await;
}

async fn send_series(
    state: &mut SenderState,
    socket: &impl FrameSocket,
    config: &SenderConfig,
    src_port: u16,
    dst_port: u16,
    plans: Vec<SegmentPlan>,
    rng: &mut StdRng,
) {
    for plan in plans {
        sleep(config.spacing).await;
        send_segment(socket, config.peer_addr, src_port, dst_port, &plan, None, rng).await;
        state.register_sent(&plan, Instant::now());
    }
}

/// Drive one complete generator run over the given socket, returning the
///  full-size samples this flow collected. The flow completes only through
///  its final acknowledgment - a lost frame stalls it forever, which is
///  acceptable on the loss-free test link.
pub async fn run_sender_flow(config: &SenderConfig, socket: Arc<UdpSocket>) -> anyhow::Result<LatencySamples> {
    let mut rng = StdRng::from_entropy();

    let src_port = config.src_port.unwrap_or_else(|| rng.gen_range(EPHEMERAL_PORT_MIN..=u16::MAX));
    let dst_port = config.dst_port.unwrap_or_else(|| rng.gen_range(EPHEMERAL_PORT_MIN..=u16::MAX));
    let initial_seq = if config.seq_from_zero { SeqNo::ZERO } else { SeqNo::from_raw(rng.gen()) };

    let mut state = SenderState::new(config, initial_seq);
    info!("flow {}->{}: {} segments of {} bytes from seq {} to {}",
          src_port, dst_port, config.segment_count, config.payload_len, initial_seq, state.final_seq());

    if config.handshake {
        let plan = state.plan_handshake();
        send_segment(&socket, config.peer_addr, src_port, dst_port, &plan, Some(config.payload_len), &mut rng).await;
        state.register_sent(&plan, Instant::now());
    }
    else {
        let plans = state.plan_series(&mut rng);
        send_series(&mut state, &socket, config, src_port, dst_port, plans, &mut rng).await;
    }

    let mut recv_buf = vec![0u8; 2048];
    while !state.is_done() {
        let (len, _from) = socket.recv_from(&mut recv_buf).await?;
        let mut parse_buf = &recv_buf[..len];
        let header = match FrameHeader::deser(&mut parse_buf) {
            Ok(header) => header,
            Err(_) => {
                debug!("dropping unparsable frame");
                continue;
            }
        };

        // only acknowledgments for this flow are of interest
        if !header.flags.contains(FrameFlags::ACK)
            || header.src_port != dst_port
            || header.dst_port != src_port {
            trace!("ignoring foreign frame {:?}", header);
            continue;
        }
        debug!("IN  {:?}", header);

        match state.on_ack(header.ack, Instant::now()) {
            AckOutcome::Waiting => {}
            AckOutcome::SeriesComplete => {
                let plans = state.plan_series(&mut rng);
                send_series(&mut state, &socket, config, src_port, dst_port, plans, &mut rng).await;
            }
            AckOutcome::RunComplete => {
                info!("flow {}->{}: all segments acknowledged, {} full-size samples",
                      src_port, dst_port, state.samples.len());
            }
        }
    }
    Ok(state.samples)
}

/// Run the configured number of concurrent flows and persist the pooled mean
///  full-size round-trip latency.
pub async fn run_sender(config: SenderConfig, flows: u32) -> anyhow::Result<()> {
    if flows == 0 {
        bail!("at least one flow is required");
    }
    if flows > 1 && config.bind_addr.port() != 0 {
        bail!("running {} flows requires bind port 0 so each flow gets its own socket", flows);
    }

    let config = Arc::new(config);
    let mut handles = Vec::new();
    for _ in 0..flows {
        let config = config.clone();
        handles.push(tokio::spawn(async move {
            let socket = Arc::new(UdpSocket::bind(config.bind_addr).await?);
            run_sender_flow(&config, socket).await
        }));
    }

    let mut pooled = LatencySamples::default();
    for handle in handles {
        pooled.merge(&handle.await??);
    }

    let mean = pooled.mean().unwrap_or(0.0);
    info!("mean full-size RTT: {} s over {} samples", mean, pooled.len());
    if let Some(path) = &config.summary_path {
        write_summary(path, &[mean])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SenderConfig;
    use std::path::PathBuf;
    use std::time::Duration;

    fn config(segment_count: u32, burst_min: u32, burst_max: u32, half_tail_probability: f64, handshake: bool) -> SenderConfig {
        SenderConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            peer_addr: "127.0.0.1:9000".parse().unwrap(),
            segment_count,
            payload_len: 10,
            burst_min,
            burst_max,
            half_tail_probability,
            spacing: Duration::ZERO,
            src_port: Some(49152),
            dst_port: Some(50000),
            handshake,
            seq_from_zero: true,
            summary_path: None::<PathBuf>,
        }
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(12)
    }

    #[test]
    fn test_series_layout_and_expected_acks() {
        // three full segments of 10 bytes starting at seq 100
        let mut state = SenderState::new(&config(3, 3, 3, 0.0, false), SeqNo::from_raw(100));

        let plans = state.plan_series(&mut rng());
        assert_eq!(plans.iter().map(|p| p.seq.to_raw()).collect::<Vec<_>>(), vec![100, 110, 120]);
        assert_eq!(plans.iter().map(|p| p.expected_ack().to_raw()).collect::<Vec<_>>(), vec![110, 120, 130]);
        assert!(plans.iter().all(|p| !p.syn && p.payload_len == 10));
        assert_eq!(state.final_seq(), SeqNo::from_raw(130));
    }

    #[test]
    fn test_handshake_reserves_one_sequence_unit() {
        let mut state = SenderState::new(&config(3, 3, 3, 0.0, true), SeqNo::ZERO);

        let syn = state.plan_handshake();
        assert_eq!(syn.seq, SeqNo::ZERO);
        assert!(syn.syn);
        assert_eq!(syn.expected_ack(), SeqNo::from_raw(1));

        let t0 = Instant::now();
        state.register_sent(&syn, t0);
        // the SYN-ACK clocks the first data series, and is not a latency sample
        assert_eq!(state.on_ack(SeqNo::from_raw(1), t0 + Duration::from_millis(5)), AckOutcome::SeriesComplete);
        assert!(state.samples.is_empty());

        let plans = state.plan_series(&mut rng());
        assert_eq!(plans[0].seq, SeqNo::from_raw(1));
    }

    #[test]
    fn test_half_tail_shortens_series() {
        let mut state = SenderState::new(&config(3, 2, 2, 1.0, false), SeqNo::ZERO);

        let plans = state.plan_series(&mut rng());
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].payload_len, 10);
        assert_eq!(plans[1].payload_len, 5);
        assert_eq!(plans[1].expected_ack(), SeqNo::from_raw(15));

        // the shortened tail leaves budget for a later series
        let plans = state.plan_series(&mut rng());
        assert_eq!(plans[0].seq, SeqNo::from_raw(15));
    }

    #[test]
    fn test_series_never_overruns_budget() {
        let mut state = SenderState::new(&config(3, 5, 5, 0.0, false), SeqNo::ZERO);

        let plans = state.plan_series(&mut rng());
        assert_eq!(plans.len(), 3);
        assert_eq!(plans.last().unwrap().expected_ack(), state.final_seq());
    }

    #[test]
    fn test_ack_correlation_and_completion() {
        let mut state = SenderState::new(&config(3, 3, 3, 0.0, false), SeqNo::from_raw(100));
        let t0 = Instant::now();
        for plan in state.plan_series(&mut rng()) {
            state.register_sent(&plan, t0);
        }

        // an intermediate ack yields a sample but does not clock a new series
        assert_eq!(state.on_ack(SeqNo::from_raw(110), t0 + Duration::from_millis(3)), AckOutcome::Waiting);
        assert_eq!(state.samples.len(), 1);

        // an unmatched ack is silently absorbed
        assert_eq!(state.on_ack(SeqNo::from_raw(999), t0 + Duration::from_millis(4)), AckOutcome::Waiting);
        assert_eq!(state.samples.len(), 1);

        // the highest outstanding expected ack completes the run
        assert_eq!(state.on_ack(SeqNo::from_raw(130), t0 + Duration::from_millis(5)), AckOutcome::RunComplete);
        assert!(state.is_done());
        assert_eq!(state.samples.len(), 2);

        // a duplicate of the final ack stays terminal
        assert_eq!(state.on_ack(SeqNo::from_raw(130), t0 + Duration::from_millis(6)), AckOutcome::Waiting);
    }

    #[test]
    fn test_coalesced_ack_clocks_next_series() {
        let mut state = SenderState::new(&config(6, 3, 3, 0.0, false), SeqNo::ZERO);
        let t0 = Instant::now();
        for plan in state.plan_series(&mut rng()) {
            state.register_sent(&plan, t0);
        }

        // a combined ack covering the whole series arrives without the
        // intermediate ones ever being seen
        assert_eq!(state.on_ack(SeqNo::from_raw(30), t0 + Duration::from_millis(2)), AckOutcome::SeriesComplete);
        assert_eq!(state.samples.len(), 1);
    }

    #[test]
    fn test_pending_collision_keeps_last() {
        let mut state = SenderState::new(&config(2, 1, 1, 0.0, false), SeqNo::from_raw(100));
        let t0 = Instant::now();

        // two segments whose expected acks collide at 110: a full one from
        // seq 100 and a half one from seq 105
        state.register_sent(&SegmentPlan { seq: SeqNo::from_raw(100), payload_len: 10, syn: false }, t0);
        state.register_sent(&SegmentPlan { seq: SeqNo::from_raw(105), payload_len: 5, syn: false }, t0);

        state.on_ack(SeqNo::from_raw(110), t0 + Duration::from_millis(3));
        // last wins: the surviving entry is the half-length segment, so no
        // full-size sample is recorded
        assert!(state.samples.is_empty());
    }

    #[test]
    fn test_wraparound_run() {
        let mut state = SenderState::new(&config(2, 2, 2, 0.0, false), SeqNo::from_raw(u32::MAX - 9));

        let plans = state.plan_series(&mut rng());
        assert_eq!(plans[0].expected_ack(), SeqNo::ZERO);
        assert_eq!(plans[1].seq, SeqNo::ZERO);
        assert_eq!(state.final_seq(), SeqNo::from_raw(10));
    }
}
