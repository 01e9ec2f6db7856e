use anyhow::{bail, Context};
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{error, trace};

/// This is an abstraction for pushing a serialized frame onto the link,
///  introduced to facilitate mocking the I/O part away for testing.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FrameSocket: Send + Sync + 'static {
    async fn send_frame(&self, to: SocketAddr, frame_buf: &[u8]);

    fn local_addr(&self) -> SocketAddr;
}

#[async_trait]
impl FrameSocket for Arc<UdpSocket> {
    async fn send_frame(&self, to: SocketAddr, frame_buf: &[u8]) {
        trace!("UDP socket: sending frame to {:?}", to);

        if let Err(e) = self.send_to(frame_buf, to).await {
            error!("error sending UDP frame to {:?}: {}", to, e);
        }
    }

    fn local_addr(&self) -> SocketAddr {
        self.as_ref().local_addr()
            .expect("UdpSocket should have an initialized local addr")
    }
}

/// The first locally present network interface whose name contains `pattern`.
///  The traffic pair runs on hosts whose links follow a fixed naming
///  convention (mininet-style `h1-eth0`), so a missing match means the
///  process was started on the wrong host and must not proceed.
pub fn find_interface(pattern: &str) -> anyhow::Result<String> {
    let names = std::fs::read_dir("/sys/class/net")
        .context("cannot enumerate network interfaces")?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned());

    match first_matching(names, pattern) {
        Some(name) => Ok(name),
        None => bail!("no network interface matching '{}'", pattern),
    }
}

fn first_matching(names: impl Iterator<Item = String>, pattern: &str) -> Option<String> {
    let mut matching: Vec<String> = names
        .filter(|name| name.contains(pattern))
        .collect();
    matching.sort();
    matching.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::first_match(vec!["lo", "eth1", "eth0"], "eth", Some("eth0"))]
    #[case::substring(vec!["lo", "h1-eth0"], "eth", Some("h1-eth0"))]
    #[case::no_match(vec!["lo", "wlan0"], "eth", None)]
    #[case::empty(vec![], "eth", None)]
    fn test_first_matching(#[case] names: Vec<&str>, #[case] pattern: &str, #[case] expected: Option<&str>) {
        let result = first_matching(names.into_iter().map(str::to_owned), pattern);
        assert_eq!(result.as_deref(), expected);
    }
}
