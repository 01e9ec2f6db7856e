use anyhow::Context;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// An accumulating sequence of observed latencies, kept in seconds and used
///  only for the final summary.
#[derive(Default, Debug)]
pub struct LatencySamples {
    samples: Vec<f64>,
}

impl LatencySamples {
    pub fn push(&mut self, latency: Duration) {
        self.samples.push(latency.as_secs_f64());
    }

    pub fn merge(&mut self, other: &LatencySamples) {
        self.samples.extend_from_slice(&other.samples);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            None
        }
        else {
            Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
        }
    }
}

/// Which latency range a record was assigned at arrival time.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum LatencyRegime {
    Primary,
    Alternate,
}

/// Observed latencies split by the regime that produced them.
#[derive(Default, Debug)]
pub struct RegimeSamples {
    pub primary: LatencySamples,
    pub alternate: LatencySamples,
}

impl RegimeSamples {
    pub fn push(&mut self, regime: LatencyRegime, latency: Duration) {
        match regime {
            LatencyRegime::Primary => self.primary.push(latency),
            LatencyRegime::Alternate => self.alternate.push(latency),
        }
    }

    /// The means making up the summary artifact: always the primary mean, and
    ///  the alternate mean only when that regime was ever drawn.
    pub fn summary_means(&self) -> Vec<f64> {
        let mut means = vec![self.primary.mean().unwrap_or(0.0)];
        if !self.alternate.is_empty() {
            means.push(self.alternate.mean().unwrap_or(0.0));
        }
        means
    }
}

/// Write mean latencies (seconds) as a single space-separated line.
pub fn write_summary(path: &Path, means: &[f64]) -> anyhow::Result<()> {
    let line = means.iter()
        .map(|mean| mean.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    fs::write(path, format!("{}\n", line))
        .with_context(|| format!("cannot write summary to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean() {
        let mut samples = LatencySamples::default();
        assert_eq!(samples.mean(), None);

        samples.push(Duration::from_millis(100));
        samples.push(Duration::from_millis(300));
        assert_eq!(samples.mean(), Some(0.2));
        assert_eq!(samples.len(), 2);
    }

    #[test]
    fn test_merge() {
        let mut a = LatencySamples::default();
        a.push(Duration::from_millis(100));
        let mut b = LatencySamples::default();
        b.push(Duration::from_millis(300));

        a.merge(&b);
        assert_eq!(a.mean(), Some(0.2));
    }

    #[test]
    fn test_summary_means_skips_unused_alternate() {
        let mut samples = RegimeSamples::default();
        samples.push(LatencyRegime::Primary, Duration::from_millis(500));
        assert_eq!(samples.summary_means(), vec![0.5]);

        samples.push(LatencyRegime::Alternate, Duration::from_millis(700));
        assert_eq!(samples.summary_means(), vec![0.5, 0.7]);
    }

    #[test]
    fn test_write_summary() {
        let path = std::env::temp_dir().join(format!("rttprobe-summary-{}.txt", std::process::id()));
        write_summary(&path, &[0.5, 0.7]).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(written, "0.5 0.7\n");
        fs::remove_file(&path).ok();
    }
}
