//! `MetricsHub` (spec §4.12): in-process counters and histograms for the
//! recall/capture/lifecycle pipeline, exposed as JSON or Prometheus text.
//! No external metrics crate in the dependency stack (the pack's example
//! repos reach for hand-rolled atomics-based registries over `metrics`/
//! `prometheus` for in-process counters this small), so this follows suit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// A fixed set of millisecond buckets, tracked as running counts — enough
/// for p50/p95 estimation without pulling in a histogram crate.
const LATENCY_BUCKETS_MS: &[u64] = &[5, 10, 25, 50, 100, 250, 500, 1000, 2000, 5000];

struct Histogram {
    buckets: Vec<AtomicU64>,
    sum_ms: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    fn new() -> Self {
        Self { buckets: LATENCY_BUCKETS_MS.iter().map(|_| AtomicU64::new(0)).collect(), sum_ms: AtomicU64::new(0), count: AtomicU64::new(0) }
    }

    fn observe(&self, value_ms: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_ms.fetch_add(value_ms, Ordering::Relaxed);
        for (bucket, limit) in self.buckets.iter().zip(LATENCY_BUCKETS_MS) {
            if value_ms <= *limit {
                bucket.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn percentile(&self, p: f64) -> u64 {
        let total = self.count.load(Ordering::Relaxed);
        if total == 0 {
            return 0;
        }
        let target = (total as f64 * p).ceil() as u64;
        for (bucket, limit) in self.buckets.iter().zip(LATENCY_BUCKETS_MS) {
            if bucket.load(Ordering::Relaxed) >= target {
                return *limit;
            }
        }
        *LATENCY_BUCKETS_MS.last().unwrap()
    }
}

/// Central registry of counters/histograms for one process. One instance is
/// threaded through `CoreContext` and shared by every component.
pub struct MetricsHub {
    counters: Mutex<HashMap<&'static str, AtomicU64>>,
    histograms: Mutex<HashMap<&'static str, Histogram>>,
}

impl Default for MetricsHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsHub {
    pub fn new() -> Self {
        Self { counters: Mutex::new(HashMap::new()), histograms: Mutex::new(HashMap::new()) }
    }

    pub fn incr(&self, name: &'static str) {
        self.incr_by(name, 1);
    }

    pub fn incr_by(&self, name: &'static str, delta: u64) {
        let mut counters = self.counters.lock().expect("metrics mutex poisoned");
        counters.entry(name).or_insert_with(|| AtomicU64::new(0)).fetch_add(delta, Ordering::Relaxed);
    }

    pub fn observe_ms(&self, name: &'static str, value_ms: u64) {
        let mut histograms = self.histograms.lock().expect("metrics mutex poisoned");
        histograms.entry(name).or_insert_with(Histogram::new).observe(value_ms);
    }

    pub fn counter_value(&self, name: &str) -> u64 {
        self.counters.lock().expect("metrics mutex poisoned").get(name).map(|c| c.load(Ordering::Relaxed)).unwrap_or(0)
    }

    pub fn p50_ms(&self, name: &str) -> u64 {
        self.histograms.lock().expect("metrics mutex poisoned").get(name).map(|h| h.percentile(0.5)).unwrap_or(0)
    }

    pub fn p95_ms(&self, name: &str) -> u64 {
        self.histograms.lock().expect("metrics mutex poisoned").get(name).map(|h| h.percentile(0.95)).unwrap_or(0)
    }

    /// JSON snapshot of every counter and histogram summary, for `/v1/metrics`.
    pub fn to_json(&self) -> serde_json::Value {
        let counters = self.counters.lock().expect("metrics mutex poisoned");
        let histograms = self.histograms.lock().expect("metrics mutex poisoned");

        let counters_json: serde_json::Map<String, serde_json::Value> =
            counters.iter().map(|(k, v)| (k.to_string(), serde_json::json!(v.load(Ordering::Relaxed)))).collect();

        let histograms_json: serde_json::Map<String, serde_json::Value> = histograms
            .iter()
            .map(|(k, h)| {
                (
                    k.to_string(),
                    serde_json::json!({
                        "count": h.count.load(Ordering::Relaxed),
                        "sum_ms": h.sum_ms.load(Ordering::Relaxed),
                        "p50_ms": h.percentile(0.5),
                        "p95_ms": h.percentile(0.95),
                    }),
                )
            })
            .collect();

        serde_json::json!({ "counters": counters_json, "histograms": histograms_json })
    }

    /// Prometheus text exposition format, for `/v1/metrics/prometheus`.
    pub fn to_prometheus_text(&self) -> String {
        let counters = self.counters.lock().expect("metrics mutex poisoned");
        let histograms = self.histograms.lock().expect("metrics mutex poisoned");

        let mut out = String::new();
        for (name, value) in counters.iter() {
            out.push_str(&format!("# TYPE agent_memory_{name} counter\nagent_memory_{name} {}\n", value.load(Ordering::Relaxed)));
        }
        for (name, hist) in histograms.iter() {
            out.push_str(&format!("# TYPE agent_memory_{name}_ms summary\n"));
            out.push_str(&format!("agent_memory_{name}_ms{{quantile=\"0.5\"}} {}\n", hist.percentile(0.5)));
            out.push_str(&format!("agent_memory_{name}_ms{{quantile=\"0.95\"}} {}\n", hist.percentile(0.95)));
            out.push_str(&format!("agent_memory_{name}_ms_sum {}\n", hist.sum_ms.load(Ordering::Relaxed)));
            out.push_str(&format!("agent_memory_{name}_ms_count {}\n", hist.count.load(Ordering::Relaxed)));
        }
        out
    }
}
