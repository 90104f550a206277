//! Rolling latency statistics over named series.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use statrs::statistics::Statistics;
use tracing::info;

/// Default number of samples retained per series.
pub const DEFAULT_WINDOW: usize = 100;

/// Series name for end-to-end order execution latency.
pub const ORDER_EXECUTION: &str = "orderExecution";
/// Series name for REST reference price lookups.
pub const PRICE_LOOKUP: &str = "priceLookup";
/// Series name for streaming socket open + auth.
pub const STREAM_CONNECT: &str = "streamConnect";

/// Summary of one latency series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencyStats {
    pub count: usize,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub p95: f64,
}

impl LatencyStats {
    /// Compute statistics over a snapshot of samples. `None` when empty.
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let count = sorted.len();
        // floor(count * 0.95) is always < count
        let p95_index = (count as f64 * 0.95).floor() as usize;

        Some(Self {
            count,
            avg: sorted.iter().mean(),
            min: sorted[0],
            max: sorted[count - 1],
            p95: sorted[p95_index.min(count - 1)],
        })
    }
}

/// Bounded, named latency series. Each series is created on its first sample
/// and keeps only the most recent `window` values.
pub struct MetricsRecorder {
    window: usize,
    series: Mutex<HashMap<String, VecDeque<f64>>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            window: window.max(1),
            series: Mutex::new(HashMap::new()),
        }
    }

    /// Append a sample, evicting the oldest once the window is full.
    pub fn record(&self, name: &str, value: f64) {
        let mut series = self.series.lock();
        let samples = series
            .entry(name.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.window));
        samples.push_back(value);
        while samples.len() > self.window {
            samples.pop_front();
        }
    }

    /// Statistics for a series, or `None` if it has never been recorded.
    pub fn stats(&self, name: &str) -> Option<LatencyStats> {
        let snapshot: Vec<f64> = {
            let series = self.series.lock();
            series.get(name)?.iter().copied().collect()
        };
        LatencyStats::from_samples(&snapshot)
    }

    /// Mean of a series, 0 when empty.
    pub fn average(&self, name: &str) -> f64 {
        self.stats(name).map(|s| s.avg).unwrap_or(0.0)
    }

    /// Statistics for every series, ordered by name.
    pub fn all_stats(&self) -> BTreeMap<String, LatencyStats> {
        let names: Vec<String> = self.series.lock().keys().cloned().collect();
        names
            .into_iter()
            .filter_map(|name| self.stats(&name).map(|s| (name, s)))
            .collect()
    }

    /// Drop every series.
    pub fn clear(&self) {
        self.series.lock().clear();
    }

    /// Time an async operation into `name` (milliseconds), whatever its result.
    pub async fn measure<F, T>(&self, name: &str, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let start = Instant::now();
        let out = fut.await;
        self.record(name, start.elapsed().as_secs_f64() * 1000.0);
        out
    }

    /// Log one line per series.
    pub fn log_report(&self) {
        for (name, s) in self.all_stats() {
            info!(
                metric = %name,
                count = s.count,
                avg_ms = format!("{:.2}", s.avg),
                min_ms = format!("{:.2}", s.min),
                max_ms = format!("{:.2}", s.max),
                p95_ms = format!("{:.2}", s.p95),
                "Performance report"
            );
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_basic() {
        let recorder = MetricsRecorder::new();
        for v in [5.0, 1.0, 3.0, 2.0, 4.0] {
            recorder.record("x", v);
        }
        let s = recorder.stats("x").unwrap();
        assert_eq!(s.count, 5);
        assert!((s.avg - 3.0).abs() < 1e-9);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 5.0);
        // floor(5 * 0.95) = 4 -> largest sample
        assert_eq!(s.p95, 5.0);
    }

    #[test]
    fn test_unknown_series() {
        let recorder = MetricsRecorder::new();
        assert!(recorder.stats("missing").is_none());
        assert_eq!(recorder.average("missing"), 0.0);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let recorder = MetricsRecorder::new();
        // Sample 0 is the smallest; after 101 records it must be gone.
        for i in 0..101 {
            recorder.record("lat", i as f64);
        }
        let s = recorder.stats("lat").unwrap();
        assert_eq!(s.count, 100);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 100.0);
        // sorted[floor(100 * 0.95)] = sorted[95] = 96
        assert_eq!(s.p95, 96.0);
    }

    #[test]
    fn test_all_stats_and_clear() {
        let recorder = MetricsRecorder::with_window(3);
        recorder.record("b", 1.0);
        recorder.record("a", 2.0);
        let all = recorder.all_stats();
        assert_eq!(all.keys().cloned().collect::<Vec<_>>(), vec!["a", "b"]);

        recorder.clear();
        assert!(recorder.all_stats().is_empty());
    }

    #[tokio::test]
    async fn test_measure_records_sample() {
        let recorder = MetricsRecorder::new();
        let value = recorder.measure("op", async { 7 }).await;
        assert_eq!(value, 7);
        assert_eq!(recorder.stats("op").unwrap().count, 1);
    }
}
