//! In-memory latency histogram for the scan pipeline.
//! Records fetch → evaluate → notify duration per watchlist entry.

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

/// Shared latency stats. Scheduler records, API reads.
/// Values stored in milliseconds.
pub struct LatencyStats {
    inner: Mutex<hdrhistogram::Histogram<u64>>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct LatencySnapshot {
    pub samples: u64,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
    pub max_ms: Option<u64>,
}

impl LatencyStats {
    /// Tracks 1ms to 1h, 3 significant figures.
    pub fn new() -> Self {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, 3_600_000, 3)
            .expect("valid histogram bounds");
        Self {
            inner: Mutex::new(histogram),
        }
    }

    pub fn record(&self, d: Duration) {
        let ms = d.as_millis().clamp(1, 3_600_000) as u64;
        if let Ok(mut h) = self.inner.lock() {
            let _ = h.record(ms);
        }
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        let Ok(h) = self.inner.lock() else {
            return LatencySnapshot { samples: 0, p50_ms: None, p95_ms: None, p99_ms: None, max_ms: None };
        };
        if h.len() == 0 {
            return LatencySnapshot { samples: 0, p50_ms: None, p95_ms: None, p99_ms: None, max_ms: None };
        }
        LatencySnapshot {
            samples: h.len(),
            p50_ms: Some(h.value_at_quantile(0.5)),
            p95_ms: Some(h.value_at_quantile(0.95)),
            p99_ms: Some(h.value_at_quantile(0.99)),
            max_ms: Some(h.max()),
        }
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_has_no_percentiles() {
        let stats = LatencyStats::new();
        let snap = stats.snapshot();
        assert_eq!(snap.samples, 0);
        assert!(snap.p50_ms.is_none());
    }

    #[test]
    fn records_in_milliseconds() {
        let stats = LatencyStats::new();
        for ms in [10, 20, 30, 40, 1000] {
            stats.record(Duration::from_millis(ms));
        }
        // Sub-millisecond durations still count as one sample.
        stats.record(Duration::from_micros(10));
        let snap = stats.snapshot();
        assert_eq!(snap.samples, 6);
        assert_eq!(snap.p50_ms, Some(20));
        assert!(snap.max_ms.unwrap() >= 1000);
    }
}
