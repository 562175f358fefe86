//! Retrieval metrics
//!
//! Lock-free counters and a latency histogram, shared between the hybrid
//! retriever and its reranker. Exported as a serializable snapshot or in
//! Prometheus text format.

use serde::{Deserialize, Serialize};
use std::fmt::Write as FmtWrite;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Latency histogram with fixed microsecond buckets
#[derive(Debug)]
pub struct Histogram {
    bounds_micros: Vec<u64>,
    buckets: Vec<AtomicU64>,
    overflow: AtomicU64,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Buckets from 1ms to 5s, tuned for query latency
    pub fn new_latency() -> Self {
        let bounds_micros = vec![
            1_000, 5_000, 10_000, 25_000, 50_000, 100_000, 250_000, 500_000, 1_000_000, 5_000_000,
        ];
        let buckets = bounds_micros.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            bounds_micros,
            buckets,
            overflow: AtomicU64::new(0),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.sum_micros.fetch_add(micros, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        match self.bounds_micros.iter().position(|&bound| micros <= bound) {
            Some(i) => self.buckets[i].fetch_add(1, Ordering::Relaxed),
            None => self.overflow.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn mean_ms(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            return 0.0;
        }
        self.sum_micros.load(Ordering::Relaxed) as f64 / count as f64 / 1000.0
    }

    /// Non-cumulative count per bucket
    pub fn bucket_counts(&self) -> Vec<u64> {
        self.buckets.iter().map(|c| c.load(Ordering::Relaxed)).collect()
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new_latency()
    }
}

/// Counters for the hybrid query path
#[derive(Debug, Default)]
pub struct RetrievalMetrics {
    /// Queries answered, including degraded ones
    pub queries_total: Counter,
    /// Queries answered from a single source after the other failed
    pub degraded_total: Counter,
    /// Queries where every source failed
    pub failures_total: Counter,
    /// Rerank calls that fell back to fused order
    pub rerank_fallbacks_total: Counter,
    pub query_latency: Histogram,
}

impl RetrievalMetrics {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queries_total: self.queries_total.get(),
            degraded_total: self.degraded_total.get(),
            failures_total: self.failures_total.get(),
            rerank_fallbacks_total: self.rerank_fallbacks_total.get(),
            query_latency_ms: self.query_latency.mean_ms(),
        }
    }

    /// Prometheus exposition format
    pub fn to_prometheus(&self) -> String {
        let mut out = String::with_capacity(1024);
        write_counter(&mut out, "queries_total", "Hybrid queries answered", self.queries_total.get());
        write_counter(
            &mut out,
            "degraded_total",
            "Queries answered by a single surviving source",
            self.degraded_total.get(),
        );
        write_counter(&mut out, "failures_total", "Queries where all sources failed", self.failures_total.get());
        write_counter(
            &mut out,
            "rerank_fallbacks_total",
            "Rerank calls that kept the fused order",
            self.rerank_fallbacks_total.get(),
        );
        write_histogram(&mut out, "query_latency_seconds", "Hybrid query latency", &self.query_latency);
        out
    }
}

const METRIC_PREFIX: &str = "hybrid_retrieval_";

fn write_counter(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {}{} {}", METRIC_PREFIX, name, help);
    let _ = writeln!(out, "# TYPE {}{} counter", METRIC_PREFIX, name);
    let _ = writeln!(out, "{}{} {}", METRIC_PREFIX, name, value);
}

fn write_histogram(out: &mut String, name: &str, help: &str, hist: &Histogram) {
    let _ = writeln!(out, "# HELP {}{} {}", METRIC_PREFIX, name, help);
    let _ = writeln!(out, "# TYPE {}{} histogram", METRIC_PREFIX, name);

    let mut cumulative = 0u64;
    for (bound, count) in hist.bounds_micros.iter().zip(hist.bucket_counts()) {
        cumulative += count;
        let _ = writeln!(
            out,
            "{}{}_bucket{{le=\"{:.3}\"}} {}",
            METRIC_PREFIX,
            name,
            *bound as f64 / 1_000_000.0,
            cumulative
        );
    }
    let total = hist.count();
    let _ = writeln!(out, "{}{}_bucket{{le=\"+Inf\"}} {}", METRIC_PREFIX, name, total);
    let _ = writeln!(
        out,
        "{}{}_sum {:.6}",
        METRIC_PREFIX,
        name,
        hist.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
    );
    let _ = writeln!(out, "{}{}_count {}", METRIC_PREFIX, name, total);
}

/// Point-in-time copy of [`RetrievalMetrics`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub queries_total: u64,
    pub degraded_total: u64,
    pub failures_total: u64,
    pub rerank_fallbacks_total: u64,
    pub query_latency_ms: f64,
}

/// Measures one operation into a histogram
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn record(self, histogram: &Histogram) -> Duration {
        let elapsed = self.start.elapsed();
        histogram.observe(elapsed);
        elapsed
    }
}
