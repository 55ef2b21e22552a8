/*!
 * Metrics Collection
 * Lightweight metrics collector fed once per pass
 */

use crate::core::serde::is_zero_u64;
use ahash::RandomState;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Names recorded by the adjuster
pub mod names {
    pub const PASS_DURATION: &str = "pass_duration_seconds";
    pub const KILLS_TOTAL: &str = "kills_total";
    pub const FREEZES_TOTAL: &str = "freezes_total";
    pub const UNFREEZES_TOTAL: &str = "unfreezes_total";
    pub const CYCLE_ROUNDS_TOTAL: &str = "cycle_rounds_total";
    pub const PROCESSES: &str = "processes";
    pub const CACHED_PROCESSES: &str = "cached_processes";
    pub const EMPTY_PROCESSES: &str = "empty_processes";
}

const DURATION_BUCKETS: [f64; 9] = [0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0];

#[derive(Debug, Clone)]
struct Histogram {
    buckets: Vec<f64>,
    counts: Vec<u64>,
    sum: f64,
    count: u64,
}

impl Histogram {
    fn new(buckets: &[f64]) -> Self {
        Self {
            buckets: buckets.to_vec(),
            counts: vec![0; buckets.len()],
            sum: 0.0,
            count: 0,
        }
    }

    fn observe(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
        for (i, &bucket) in self.buckets.iter().enumerate() {
            if value <= bucket {
                self.counts[i] += 1;
            }
        }
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let target = (self.count as f64 * p).ceil() as u64;
        for (i, &count) in self.counts.iter().enumerate() {
            if count >= target {
                return self.buckets[i];
            }
        }
        self.buckets.last().copied().unwrap_or(0.0)
    }
}

/// Metrics collector
///
/// # Performance
/// - Cache-line aligned to prevent false sharing in metric updates
#[repr(C, align(64))]
pub struct MetricsCollector {
    counters: Arc<DashMap<String, f64, RandomState>>,
    gauges: Arc<DashMap<String, f64, RandomState>>,
    histograms: Arc<DashMap<String, Histogram, RandomState>>,
    start_time: Instant,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(DashMap::with_hasher(RandomState::new())),
            gauges: Arc::new(DashMap::with_hasher(RandomState::new())),
            histograms: Arc::new(DashMap::with_hasher(RandomState::new())),
            start_time: Instant::now(),
        }
    }

    pub fn inc_counter(&self, name: &str, value: f64) {
        self.counters
            .entry(name.to_string())
            .and_modify(|v| *v += value)
            .or_insert(value);
    }

    pub fn set_gauge(&self, name: &str, value: f64) {
        self.gauges.insert(name.to_string(), value);
    }

    pub fn observe_histogram(&self, name: &str, value: f64) {
        self.histograms
            .entry(name.to_string())
            .and_modify(|hist| hist.observe(value))
            .or_insert_with(|| {
                let mut hist = Histogram::new(&DURATION_BUCKETS);
                hist.observe(value);
                hist
            });
    }

    pub fn record_duration(&self, name: &str, duration: Duration) {
        self.observe_histogram(name, duration.as_secs_f64());
    }

    pub fn counter(&self, name: &str) -> f64 {
        self.counters.get(name).map_or(0.0, |v| *v)
    }

    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.gauges.get(name).map(|v| *v)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self
            .counters
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        let gauges = self
            .gauges
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        let histograms = self
            .histograms
            .iter()
            .map(|entry| {
                let hist = entry.value();
                let stats = HistogramStats {
                    count: hist.count,
                    sum: hist.sum,
                    avg: if hist.count > 0 {
                        hist.sum / hist.count as f64
                    } else {
                        0.0
                    },
                    p50: hist.percentile(0.50),
                    p95: hist.percentile(0.95),
                    p99: hist.percentile(0.99),
                };
                (entry.key().clone(), stats)
            })
            .collect();

        MetricsSnapshot {
            counters,
            gauges,
            histograms,
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    pub fn reset(&self) {
        self.counters.clear();
        self.gauges.clear();
        self.histograms.clear();
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HistogramStats {
    #[serde(skip_serializing_if = "is_zero_u64")]
    pub count: u64,
    pub sum: f64,
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Snapshot of all metrics at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MetricsSnapshot {
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub counters: HashMap<String, f64>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub gauges: HashMap<String, f64>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub histograms: HashMap<String, HistogramStats>,
    pub uptime_secs: u64,
}

/// Measures a span of work and records it on drop
pub struct Timer<'a> {
    collector: &'a MetricsCollector,
    name: &'static str,
    start: Instant,
}

impl<'a> Timer<'a> {
    pub fn start(collector: &'a MetricsCollector, name: &'static str) -> Self {
        Self {
            collector,
            name,
            start: Instant::now(),
        }
    }
}

impl Drop for Timer<'_> {
    fn drop(&mut self) {
        self.collector.record_duration(self.name, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_counters_accumulate() {
        let metrics = MetricsCollector::new();
        metrics.inc_counter(names::KILLS_TOTAL, 2.0);
        metrics.inc_counter(names::KILLS_TOTAL, 1.0);
        assert_eq!(metrics.counter(names::KILLS_TOTAL), 3.0);
        assert_eq!(metrics.counter(names::FREEZES_TOTAL), 0.0);
    }

    #[test]
    fn test_timer_observes_histogram() {
        let metrics = MetricsCollector::new();
        {
            let _timer = Timer::start(&metrics, names::PASS_DURATION);
        }
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.histograms[names::PASS_DURATION].count, 1);
    }

    #[test]
    fn test_reset_clears_everything() {
        let metrics = MetricsCollector::new();
        metrics.set_gauge(names::PROCESSES, 12.0);
        assert_eq!(metrics.gauge(names::PROCESSES), Some(12.0));
        metrics.reset();
        assert!(metrics.snapshot().gauges.is_empty());
    }
}
