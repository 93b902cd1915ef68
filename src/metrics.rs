//! Abstract metrics sink. The core only ever emits counters/gauges through
//! this trait; binding an HTTP scrape endpoint on `METRICS_PORT` is an
//! external collaborator's job, not this crate's.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use parking_lot::Mutex;

pub trait MetricsSink: Send + Sync {
    fn incr_counter(&self, name: &str, labels: &[(&str, &str)]);
    fn set_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]);
}

fn label_key(name: &str, labels: &[(&str, &str)]) -> String {
    let mut key = name.to_string();
    for (k, v) in labels {
        key.push(':');
        key.push_str(k);
        key.push('=');
        key.push_str(v);
    }
    key
}

/// In-process counter/gauge registry, grounded on the teacher's
/// field-based `LatencyAuditor`/`PerformanceMonitor` style rather than a
/// standalone metrics crate.
#[derive(Default)]
pub struct AtomicMetricsSink {
    counters: Mutex<HashMap<String, AtomicU64>>,
    gauges: Mutex<HashMap<String, AtomicI64>>,
}

impl AtomicMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter_value(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters
            .lock()
            .get(&label_key(name, labels))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn gauge_value(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        self.gauges
            .lock()
            .get(&label_key(name, labels))
            .map(|g| g.load(Ordering::Relaxed) as f64 / 1000.0)
            .unwrap_or(0.0)
    }
}

impl MetricsSink for AtomicMetricsSink {
    fn incr_counter(&self, name: &str, labels: &[(&str, &str)]) {
        let key = label_key(name, labels);
        let mut counters = self.counters.lock();
        counters.entry(key).or_insert_with(|| AtomicU64::new(0)).fetch_add(1, Ordering::Relaxed);
    }

    fn set_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let key = label_key(name, labels);
        let mut gauges = self.gauges.lock();
        gauges
            .entry(key)
            .or_insert_with(|| AtomicI64::new(0))
            .store((value * 1000.0) as i64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_increments() {
        let sink = AtomicMetricsSink::new();
        sink.incr_counter("events_total", &[("channel", "trades")]);
        sink.incr_counter("events_total", &[("channel", "trades")]);
        assert_eq!(sink.counter_value("events_total", &[("channel", "trades")]), 2);
    }

    #[test]
    fn gauge_stores_latest_value() {
        let sink = AtomicMetricsSink::new();
        sink.set_gauge("lag_ms", 12.5, &[]);
        assert!((sink.gauge_value("lag_ms", &[]) - 12.5).abs() < 1e-6);
    }
}
