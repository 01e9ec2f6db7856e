//! End-to-end exercise of the endpoint pair over localhost UDP: the sender
//! completes only if the responder's acknowledgment clocking works, and the
//! responder terminates only through its idle watchdog.

use rttprobe::config::{LatencyRange, ReceiverConfig, SenderConfig};
use rttprobe::receiver::run_receiver;
use rttprobe::sender::run_sender;
use std::path::PathBuf;
use std::time::{Duration, Instant};

fn receiver_config(bind: &str, summary: PathBuf) -> ReceiverConfig {
    ReceiverConfig {
        bind_addr: bind.parse().unwrap(),
        primary_latency: LatencyRange::new(Duration::from_millis(1), Duration::from_millis(3)),
        alternate_latency: LatencyRange::new(Duration::from_millis(5), Duration::from_millis(8)),
        alternate_probability: 0.0,
        expected_payload_len: 10,
        ack_delay: Duration::from_millis(10),
        disable_delay: false,
        combined_ack: true,
        idle_timeout: Some(Duration::from_millis(500)),
        summary_path: Some(summary),
    }
}

fn sender_config(peer: &str, summary: PathBuf) -> SenderConfig {
    SenderConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        peer_addr: peer.parse().unwrap(),
        segment_count: 4,
        payload_len: 10,
        burst_min: 2,
        burst_max: 2,
        half_tail_probability: 0.0,
        spacing: Duration::from_millis(1),
        src_port: None,
        dst_port: None,
        handshake: true,
        seq_from_zero: false,
        summary_path: Some(summary),
    }
}

fn read_means(path: &PathBuf) -> Vec<f64> {
    std::fs::read_to_string(path).unwrap()
        .split_whitespace()
        .map(|field| field.parse().unwrap())
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn loopback_pair_completes_and_writes_summaries() {
    let dir = std::env::temp_dir();
    let receiver_summary = dir.join(format!("rttprobe-loopback-r-{}.txt", std::process::id()));
    let sender_summary = dir.join(format!("rttprobe-loopback-s-{}.txt", std::process::id()));

    let receiver_task = tokio::spawn(run_receiver(receiver_config("127.0.0.1:43117", receiver_summary.clone())));
    tokio::time::sleep(Duration::from_millis(100)).await;

    // two concurrent flows against the one responder
    let started = Instant::now();
    run_sender(sender_config("127.0.0.1:43117", sender_summary.clone()), 2).await.unwrap();

    // the responder keeps running until its idle watchdog fires
    let samples = receiver_task.await.unwrap().unwrap();
    assert!(started.elapsed() >= Duration::from_millis(500));

    // both flows' SYNs and full-size segments were acknowledged without delay
    assert!(samples.primary.len() >= 2);
    assert!(samples.alternate.is_empty());
    assert!(samples.primary.mean().unwrap() >= 0.001);

    let receiver_means = read_means(&receiver_summary);
    assert_eq!(receiver_means.len(), 1);
    assert!(receiver_means[0] >= 0.001);

    // the pooled full-size RTT includes the injected response latency
    let sender_means = read_means(&sender_summary);
    assert_eq!(sender_means.len(), 1);
    assert!(sender_means[0] >= 0.001, "sender mean {} below the injected latency", sender_means[0]);

    std::fs::remove_file(&receiver_summary).ok();
    std::fs::remove_file(&sender_summary).ok();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn loopback_half_tails_exercise_delayed_acks() {
    let dir = std::env::temp_dir();
    let sender_summary = dir.join(format!("rttprobe-loopback-h-{}.txt", std::process::id()));
    let receiver_summary = dir.join(format!("rttprobe-loopback-hr-{}.txt", std::process::id()));

    let receiver_task = tokio::spawn(run_receiver(receiver_config("127.0.0.1:43118", receiver_summary.clone())));
    tokio::time::sleep(Duration::from_millis(100)).await;

    // every series ends in a half-length segment, forcing the responder's
    // delayed-ack path on each series tail
    let mut config = sender_config("127.0.0.1:43118", sender_summary.clone());
    config.half_tail_probability = 1.0;
    config.seq_from_zero = true;
    run_sender(config, 1).await.unwrap();

    let samples = receiver_task.await.unwrap().unwrap();
    // the delayed tails are excluded from the responder's sample sets
    assert!(samples.primary.len() >= 1);

    // the final series is a lone full segment, so at least one full-size
    // sample is guaranteed even though every other series ends half-length
    let sender_means = read_means(&sender_summary);
    assert!(sender_means[0] >= 0.001);

    std::fs::remove_file(&sender_summary).ok();
    std::fs::remove_file(&receiver_summary).ok();
}
