use clap::Parser;
use rttprobe::config::{LatencyRange, ReceiverConfig};
use rttprobe::link;
use rttprobe::receiver::run_receiver;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Delayed-ack responder: observes inbound segments, answers each flow's
/// latest unacknowledged segment after a randomized response latency, and
/// emulates TCP's delayed and coalesced acknowledgment behavior.
#[derive(Debug, Parser)]
#[command(name = "receiver")]
struct Args {
    /// Minimum response latency, seconds
    #[arg(short = 'a', long, default_value_t = 0.5)]
    min_latency: f64,

    /// Maximum response latency, seconds
    #[arg(short = 'b', long, default_value_t = 0.5)]
    max_latency: f64,

    /// Minimum alternate response latency, seconds
    #[arg(long, default_value_t = 0.5)]
    alt_min_latency: f64,

    /// Maximum alternate response latency, seconds
    #[arg(long, default_value_t = 0.5)]
    alt_max_latency: f64,

    /// Probability that a segment draws from the alternate latency range
    #[arg(short = 'v', long, default_value_t = 0.0)]
    alt_probability: f64,

    /// Expected payload length of a full segment while no MSS is known
    #[arg(short = 'x', long, default_value_t = 10)]
    expected_payload_len: u16,

    /// Extra delay before acknowledging a partial segment, seconds
    #[arg(short = 'r', long, default_value_t = 0.5)]
    ack_delay: f64,

    /// Disable the delayed-ack behavior
    #[arg(short = 'i', long)]
    disable_delay: bool,

    /// Acknowledge every segment individually instead of coalescing per flow
    #[arg(short = 'c', long)]
    no_combined_ack: bool,

    /// Terminate after this long without inbound segments, seconds
    #[arg(short = 'o', long)]
    idle_timeout: Option<f64>,

    /// Summary log file receiving one or two space-separated mean latencies
    #[arg(short = 'g', long)]
    summary: Option<PathBuf>,

    /// Local UDP address to listen on
    #[arg(long, default_value = "0.0.0.0:9000")]
    bind: SocketAddr,

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

    let config = ReceiverConfig {
        bind_addr: args.bind,
        primary_latency: LatencyRange::new(
            Duration::from_secs_f64(args.min_latency),
            Duration::from_secs_f64(args.max_latency),
        ),
        alternate_latency: LatencyRange::new(
            Duration::from_secs_f64(args.alt_min_latency),
            Duration::from_secs_f64(args.alt_max_latency),
        ),
        alternate_probability: args.alt_probability,
        expected_payload_len: args.expected_payload_len,
        ack_delay: Duration::from_secs_f64(args.ack_delay),
        disable_delay: args.disable_delay,
        combined_ack: !args.no_combined_ack,
        idle_timeout: args.idle_timeout.map(Duration::from_secs_f64),
        summary_path: args.summary,
    };
    config.validate()?;

    run_receiver(config).await.map(|_| ())
}
