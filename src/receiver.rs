use crate::config::{LatencyRange, ReceiverConfig};
use crate::frame::{FrameFlags, FrameHeader};
use crate::link::FrameSocket;
use crate::seq::SeqNo;
use crate::stats::{write_summary, LatencyRegime, RegimeSamples};
use bytes::BytesMut;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;
use std::collections::hash_map::Entry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::select;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

/// Protocol-level flow identity: (sender port, receiver port).
pub type FlowKey = (u16, u16);

/// One observed non-ACK segment. Immutable after creation - the response
///  latency is drawn once, at arrival, and carried with the record.
#[derive(Clone, Copy, Debug)]
pub struct InboundRecord {
    pub flow: FlowKey,
    /// UDP source the acknowledgment goes back to
    pub reply_to: SocketAddr,
    pub arrived_at: Instant,
    pub seq: SeqNo,
    pub payload_len: u16,
    pub syn: bool,
    pub mss: Option<u16>,
    pub latency: Duration,
    pub regime: LatencyRegime,
}

/// The response-latency policy: the alternate range is drawn with the
///  configured probability, the primary range otherwise.
#[derive(Clone, Copy, Debug)]
pub struct LatencyPolicy {
    pub primary: LatencyRange,
    pub alternate: LatencyRange,
    pub alternate_probability: f64,
}

impl LatencyPolicy {
    pub fn draw(&self, rng: &mut impl Rng) -> (Duration, LatencyRegime) {
        if rng.gen_bool(self.alternate_probability) {
            (self.alternate.sample(rng), LatencyRegime::Alternate)
        }
        else {
            (self.primary.sample(rng), LatencyRegime::Primary)
        }
    }
}

/// One acknowledgment the response loop decided to send.
#[derive(Clone, Copy, Debug)]
pub struct AckPlan {
    pub flow: FlowKey,
    pub reply_to: SocketAddr,
    pub seq: SeqNo,
    pub ack: SeqNo,
    pub syn_ack: bool,
    pub mss: Option<u16>,
    pub delayed: bool,
    /// how many records this acknowledgment covers (diagnostics only)
    pub coalesced: usize,
}

/// The single consumer of the capture path. Owns all per-flow tables, so no
///  other task ever touches them - the capture task only parses, stamps and
///  forwards records through a channel.
pub struct Responder {
    expected_payload_len: u16,
    ack_delay: Duration,
    disable_delay: bool,
    combined_ack: bool,
    idle_timeout: Option<Duration>,
    /// records not yet covered by an acknowledgment
    records: Vec<InboundRecord>,
    /// MSS learned from a flow's SYN, fixed for the flow's lifetime
    mss: FxHashMap<FlowKey, u16>,
    /// arrival time of the newest record covered by an acknowledgment, per flow
    last_acked_arrival: FxHashMap<FlowKey, Instant>,
    last_activity: Instant,
    pub samples: RegimeSamples,
}

impl Responder {
    pub fn new(config: &ReceiverConfig, start: Instant) -> Responder {
        Responder {
            expected_payload_len: config.expected_payload_len,
            ack_delay: config.ack_delay,
            disable_delay: config.disable_delay,
            combined_ack: config.combined_ack,
            idle_timeout: config.idle_timeout,
            records: Vec::new(),
            mss: FxHashMap::default(),
            last_acked_arrival: FxHashMap::default(),
            last_activity: start,
            samples: RegimeSamples::default(),
        }
    }

    /// Capture-side handoff: learn the MSS from a SYN, append the record.
    pub fn ingest(&mut self, record: InboundRecord) {
        if record.syn {
            if let Some(mss) = record.mss {
                match self.mss.entry(record.flow) {
                    Entry::Vacant(e) => {
                        debug!("flow {:?}: learned MSS {}", record.flow, mss);
                        e.insert(mss);
                    }
                    Entry::Occupied(e) => {
                        if *e.get() != mss {
                            debug!("flow {:?}: ignoring renegotiated MSS {} (learned {})", record.flow, mss, e.get());
                        }
                    }
                }
            }
        }
        self.last_activity = self.last_activity.max(record.arrived_at);
        self.records.push(record);
    }

    /// A segment is acknowledged late when it is partial - below the flow's
    ///  MSS, or below the default expected length while no MSS is known -
    ///  and not a SYN. Can be globally disabled.
    fn is_delayed(&self, record: &InboundRecord) -> bool {
        if self.disable_delay || record.syn {
            return false;
        }
        let threshold = self.mss.get(&record.flow).copied().unwrap_or(self.expected_payload_len);
        record.payload_len < threshold
    }

    fn scheduled_at(&self, record: &InboundRecord) -> Instant {
        let mut at = record.arrived_at + record.latency;
        if self.is_delayed(record) {
            at += self.ack_delay;
        }
        at
    }

    fn is_covered(&self, record: &InboundRecord) -> bool {
        match self.last_acked_arrival.get(&record.flow) {
            Some(&marker) => record.arrived_at <= marker,
            None => false,
        }
    }

    /// Acknowledgment candidates: the latest record per flow in combined
    ///  mode, every uncovered record otherwise, in arrival order.
    fn candidates(&self) -> Vec<InboundRecord> {
        let mut result: Vec<InboundRecord> = if self.combined_ack {
            let mut latest: FxHashMap<FlowKey, InboundRecord> = FxHashMap::default();
            for record in &self.records {
                match latest.entry(record.flow) {
                    Entry::Occupied(mut e) => {
                        if e.get().arrived_at < record.arrived_at {
                            e.insert(*record);
                        }
                    }
                    Entry::Vacant(e) => {
                        e.insert(*record);
                    }
                }
            }
            latest.into_values().collect()
        }
        else {
            self.records.clone()
        };

        result.retain(|record| !self.is_covered(record));
        result.sort_by_key(|record| record.arrived_at);
        result
    }

    /// Decide which acknowledgments are due, advance the per-flow markers,
    ///  collect realized-latency samples and prune covered records. At most
    ///  one acknowledgment per flow update leaves here: acking a record
    ///  suppresses every record of the flow that arrived no later.
    pub fn due(&mut self, now: Instant) -> Vec<AckPlan> {
        let mut plans = Vec::new();

        for record in self.candidates() {
            // a plan from this very pass may have covered it meanwhile
            if self.is_covered(&record) || now < self.scheduled_at(&record) {
                continue;
            }

            let delayed = self.is_delayed(&record);
            let previous_marker = self.last_acked_arrival.get(&record.flow).copied();
            let coalesced = if self.combined_ack {
                self.records.iter()
                    .filter(|r| r.flow == record.flow
                        && previous_marker.map_or(true, |marker| r.arrived_at > marker)
                        && r.arrived_at <= record.arrived_at)
                    .count()
            }
            else {
                1
            };

            let handshaken = self.mss.contains_key(&record.flow);
            plans.push(AckPlan {
                flow: record.flow,
                reply_to: record.reply_to,
                // data acks carry sequence 1 once the flow completed a
                // handshake, 0 otherwise; the SYN-ACK itself always starts at 0
                seq: if !record.syn && handshaken { SeqNo::from_raw(1) } else { SeqNo::ZERO },
                ack: record.seq.expected_ack(record.payload_len as u32, record.syn),
                syn_ack: record.syn,
                mss: if record.syn { Some(self.mss.get(&record.flow).copied().unwrap_or(0)) } else { None },
                delayed,
                coalesced,
            });
            self.last_acked_arrival.insert(record.flow, record.arrived_at);

            if !delayed {
                self.samples.push(record.regime, now.duration_since(record.arrived_at));
            }
        }

        if !plans.is_empty() {
            self.prune();
        }
        plans
    }

    /// Records covered by an acknowledgment can never be acknowledged again.
    fn prune(&mut self) {
        let markers = &self.last_acked_arrival;
        self.records.retain(|record| match markers.get(&record.flow) {
            Some(&marker) => record.arrived_at > marker,
            None => true,
        });
    }

    /// Earliest instant any pending acknowledgment becomes due.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.candidates().iter()
            .map(|record| self.scheduled_at(record))
            .min()
    }

    /// The instant at which the idle watchdog fires, if one is configured:
    ///  the latest arrival (or process start) plus the idle timeout.
    pub fn idle_deadline(&self) -> Option<Instant> {
        self.idle_timeout.map(|timeout| self.last_activity + timeout)
    }
}

/// Parse one datagram into a record. ACK frames, foreign traffic and
///  malformed frames yield `None` and are dropped without affecting state;
///  a frame without payload counts as zero-length.
fn capture(
    buf: &[u8],
    from: SocketAddr,
    now: Instant,
    policy: &LatencyPolicy,
    rng: &mut impl Rng,
) -> Option<InboundRecord> {
    let mut parse_buf = buf;
    let header = FrameHeader::deser(&mut parse_buf).ok()?;
    if header.flags.contains(FrameFlags::ACK) {
        trace!("ignoring acknowledgment frame {:?}", header);
        return None;
    }

    let payload_len = parse_buf.len() as u16;
    let (latency, regime) = policy.draw(rng);
    debug!("IN  {:?} len={} latency={:?} ({:?})", header, payload_len, latency, regime);

    Some(InboundRecord {
        flow: (header.src_port, header.dst_port),
        reply_to: from,
        arrived_at: now,
        seq: header.seq,
        payload_len,
        syn: header.flags.contains(FrameFlags::SYN),
        mss: header.mss,
        latency,
        regime,
    })
}

async fn send_ack(socket: &impl FrameSocket, plan: &AckPlan) {
    let mut flags = FrameFlags::ACK;
    if plan.syn_ack {
        flags |= FrameFlags::SYN;
    }
    let header = FrameHeader {
        flags,
        src_port: plan.flow.1,
        dst_port: plan.flow.0,
        seq: plan.seq,
        ack: plan.ack,
        mss: plan.mss,
    };

    let mut buf = BytesMut::with_capacity(32);
    header.ser(&mut buf);

    debug!("OUT {:?} for {} segment(s){}", header, plan.coalesced, if plan.delayed { " delayed" } else { "" });
    socket.send_frame(plan.reply_to, buf.as_ref()).await;
}

/// Upper bound on how long the response loop sleeps when nothing is pending.
const FALLBACK_WAKE: Duration = Duration::from_secs(3600);

/// Run the responder until an interrupt or the idle timeout, then log the
///  mean response latencies per regime and persist the summary.
pub async fn run_receiver(config: ReceiverConfig) -> anyhow::Result<RegimeSamples> {
    let socket = Arc::new(UdpSocket::bind(config.bind_addr).await?);
    info!("listening on {}", FrameSocket::local_addr(&socket));

    let policy = LatencyPolicy {
        primary: config.primary_latency,
        alternate: config.alternate_latency,
        alternate_probability: config.alternate_probability,
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<InboundRecord>();
    let capture_socket = socket.clone();
    let capture_handle = tokio::spawn(async move {
        let mut rng = StdRng::from_entropy();
        let mut buf = vec![0u8; 2048];
        loop {
            let (len, from) = match capture_socket.recv_from(&mut buf).await {
                Ok(x) => x,
                Err(e) => {
                    error!("socket error: {}", e);
                    continue;
                }
            };
            if let Some(record) = capture(&buf[..len], from, Instant::now(), &policy, &mut rng) {
                if tx.send(record).is_err() {
                    // the responder is gone - stop capturing
                    return;
                }
            }
        }
    });

    let mut responder = Responder::new(&config, Instant::now());
    let reason = loop {
        let wake_at = [responder.next_deadline(), responder.idle_deadline()].into_iter()
            .flatten()
            .min()
            .unwrap_or_else(|| Instant::now() + FALLBACK_WAKE);

        select! {
            maybe_record = rx.recv() => {
                match maybe_record {
                    Some(record) => responder.ingest(record),
                    None => break "capture path closed",
                }
            }
            _ = tokio::time::sleep_until(wake_at.into()) => {}
            _ = tokio::signal::ctrl_c() => break "interrupt",
        }

        let now = Instant::now();
        for plan in responder.due(now) {
            send_ack(&socket, &plan).await;
        }
        if responder.idle_deadline().is_some_and(|deadline| now >= deadline) {
            break "idle timeout";
        }
    };
    info!("shutting down: {}", reason);
    capture_handle.abort();

    if let Some(mean) = responder.samples.primary.mean() {
        info!("mean latency (primary): {} s over {} samples", mean, responder.samples.primary.len());
    }
    if let Some(mean) = responder.samples.alternate.mean() {
        info!("mean latency (alternate): {} s over {} samples", mean, responder.samples.alternate.len());
    }
    if let Some(path) = &config.summary_path {
        write_summary(path, &responder.samples.summary_means())?;
    }
    Ok(responder.samples)
}
