//! Per-frame save timing
//!
//! The frame pump measures how long each delivered frame takes from the
//! rendered release to the sink returning (wait, draw, readback and sink).

use std::time::Duration;

/// Save timing statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveStats {
    /// Average save time in milliseconds
    pub avg_ms: f64,
    /// Minimum save time in milliseconds
    pub min_ms: f64,
    /// Maximum save time in milliseconds
    pub max_ms: f64,
    /// 50th percentile (median) save time
    pub p50_ms: f64,
    /// 95th percentile save time
    pub p95_ms: f64,
    /// Number of saved frames
    pub sample_count: usize,
}

/// Collected save durations
#[derive(Debug, Clone, Default)]
pub struct SaveTimings {
    samples: Vec<Duration>,
    total: Duration,
}

impl SaveTimings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one saved frame
    pub fn record(&mut self, elapsed: Duration) {
        self.samples.push(elapsed);
        self.total += elapsed;
    }

    /// Summed save time over all frames
    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }

    /// Average save time, `None` when nothing was saved
    pub fn average(&self) -> Option<Duration> {
        let count = u32::try_from(self.samples.len()).ok().filter(|c| *c > 0)?;
        Some(self.total / count)
    }

    /// Get save timing statistics
    pub fn stats(&self) -> SaveStats {
        if self.samples.is_empty() {
            return SaveStats::default();
        }

        let mut times: Vec<f64> = self
            .samples
            .iter()
            .map(|d| d.as_secs_f64() * 1000.0)
            .collect();
        times.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let sum: f64 = times.iter().sum();

        SaveStats {
            avg_ms: sum / times.len() as f64,
            min_ms: times.first().copied().unwrap_or(0.0),
            max_ms: times.last().copied().unwrap_or(0.0),
            p50_ms: percentile(&times, 0.50),
            p95_ms: percentile(&times, 0.95),
            sample_count: times.len(),
        }
    }
}

/// Calculate percentile from sorted array
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * p) as usize;
    sorted[idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_timings() {
        let timings = SaveTimings::new();
        assert_eq!(timings.average(), None);
        assert_eq!(timings.stats(), SaveStats::default());
        assert_eq!(timings.total(), Duration::ZERO);
    }

    #[test]
    fn test_stats() {
        let mut timings = SaveTimings::new();
        for ms in [4, 1, 3, 2, 10] {
            timings.record(Duration::from_millis(ms));
        }
        assert_eq!(timings.count(), 5);
        assert_eq!(timings.total(), Duration::from_millis(20));
        assert_eq!(timings.average(), Some(Duration::from_millis(4)));

        let stats = timings.stats();
        assert_eq!(stats.min_ms, 1.0);
        assert_eq!(stats.max_ms, 10.0);
        assert_eq!(stats.p50_ms, 3.0);
        assert_eq!(stats.sample_count, 5);
    }

    #[test]
    fn test_percentile() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        assert_eq!(percentile(&values, 0.5), 5.0); // Median
        assert_eq!(percentile(&values, 0.0), 1.0); // Min
        assert_eq!(percentile(&values, 1.0), 10.0); // Max
    }
}
