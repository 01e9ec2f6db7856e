use clap::Parser;
use rttprobe::config::SenderConfig;
use rttprobe::link;
use rttprobe::sender::run_sender;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Synthetic TCP-shaped traffic generator: sends randomly sized series of
/// data segments and measures per-segment round-trip latency against the
/// delayed-ack responder.
#[derive(Debug, Parser)]
#[command(name = "sender")]
struct Args {
    /// Total number of full-size segments to send
    #[arg(short = 't', long, default_value_t = 100)]
    count: u32,

    /// Payload bytes per full segment
    #[arg(short = 'l', long, default_value_t = 10)]
    payload_len: u16,

    /// Minimum number of segments per series
    #[arg(short = 'n', long, default_value_t = 1)]
    burst_min: u32,

    /// Maximum number of segments per series
    #[arg(short = 'm', long, default_value_t = 1)]
    burst_max: u32,

    /// Probability that a series ends with a half-length segment
    #[arg(short = 'e', long, default_value_t = 0.0)]
    half_tail_probability: f64,

    /// Fixed delay between segment transmissions, seconds
    #[arg(short = 'w', long, default_value_t = 0.0)]
    spacing: f64,

    /// Protocol-level source port (random ephemeral when absent)
    #[arg(short = 's', long)]
    src_port: Option<u16>,

    /// Protocol-level destination port (random ephemeral when absent)
    #[arg(short = 'd', long)]
    dst_port: Option<u16>,

    /// Open each flow with a SYN handshake carrying the MSS option
    #[arg(short = 'k', long)]
    handshake: bool,

    /// Start at sequence 0 instead of a random value
    #[arg(short = 'z', long)]
    seq_from_zero: bool,

    /// Summary log file receiving the mean full-size RTT in seconds
    #[arg(short = 'g', long)]
    summary: Option<PathBuf>,

    /// Number of concurrent flows
    #[arg(short = 'f', long, default_value_t = 1)]
    flows: u32,

    /// Local UDP address (keep port 0 when running multiple flows)
    #[arg(long, default_value = "0.0.0.0:0")]
    bind: SocketAddr,

    /// UDP address the receiver listens on
    #[arg(long, default_value = "127.0.0.1:9000")]
    peer: SocketAddr,

    /// Interface naming convention that must be present on this host
    #[arg(long, default_value = "eth")]
    interface: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let interface = link::find_interface(&args.interface)?;
    info!("using interface {}", interface);

    let config = SenderConfig {
        bind_addr: args.bind,
        peer_addr: args.peer,
        segment_count: args.count,
        payload_len: args.payload_len,
        burst_min: args.burst_min,
        burst_max: args.burst_max,
        half_tail_probability: args.half_tail_probability,
        spacing: Duration::from_secs_f64(args.spacing),
        src_port: args.src_port,
        dst_port: args.dst_port,
        handshake: args.handshake,
        seq_from_zero: args.seq_from_zero,
        summary_path: args.summary,
    };
    config.validate()?;

    run_sender(config, args.flows).await
}
