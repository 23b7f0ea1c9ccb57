//! # Metrics & Recovery (C11)
//!
//! Lock-free counters and a fixed-bucket latency histogram for the decision
//! and control planes, exposed in two textual formats over HTTP (spec
//! §4.10, §6), plus a panic-containment helper used to wrap request
//! handlers and worker closures so a panic never takes the process down.
//!
//! Everything here is built on plain atomics, the same no-lock approach
//! `policy_engine::rate_limit` uses for its token bucket: a counter that is
//! incremented on every request is hotter than anything a mutex should
//! guard.

use serde_json::json;
use std::panic::catch_unwind;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tracing::error;

/// Upper bounds (milliseconds) of each latency bucket, per spec §4.10. The
/// last bucket is implicitly `+Inf`.
pub const LATENCY_BUCKETS_MS: [u64; 8] = [1, 5, 10, 50, 100, 500, 1_000, 5_000];

#[derive(Debug, Default)]
struct Histogram {
    buckets: [AtomicU64; LATENCY_BUCKETS_MS.len() + 1],
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    fn observe(&self, micros: u64) {
        let millis = micros / 1_000;
        let idx = LATENCY_BUCKETS_MS
            .iter()
            .position(|&bound| millis <= bound)
            .unwrap_or(LATENCY_BUCKETS_MS.len());
        // Cumulative histogram: every bucket at or above `idx` counts this
        // observation, matching Prometheus histogram semantics.
        for bucket in &self.buckets[idx..] {
            bucket.fetch_add(1, Ordering::Relaxed);
        }
        self.sum_micros.fetch_add(micros, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            buckets: self.buckets.iter().map(|b| b.load(Ordering::Relaxed)).collect(),
            sum_micros: self.sum_micros.load(Ordering::Relaxed),
            count: self.count.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistogramSnapshot {
    /// Cumulative counts, one per entry of [`LATENCY_BUCKETS_MS`] plus a
    /// trailing `+Inf` bucket.
    pub buckets: Vec<u64>,
    pub sum_micros: u64,
    pub count: u64,
}

/// Process-wide counters and histograms for the decision plane (spec
/// §4.10). Cheap to share: every field is an atomic, so `&Metrics` can be
/// handed to every worker without a lock.
#[derive(Debug, Default)]
pub struct Metrics {
    requests_total: AtomicU64,
    requests_success: AtomicU64,
    requests_failure: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    policies_loaded: AtomicI64,
    panics_recovered: AtomicU64,
    latency: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, success: bool, duration_micros: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.requests_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.requests_failure.fetch_add(1, Ordering::Relaxed);
        }
        self.latency.observe(duration_micros);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_policies_loaded(&self, count: usize) {
        self.policies_loaded.store(count as i64, Ordering::Relaxed);
    }

    fn record_panic(&self) {
        self.panics_recovered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_success: self.requests_success.load(Ordering::Relaxed),
            requests_failure: self.requests_failure.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            policies_loaded: self.policies_loaded.load(Ordering::Relaxed),
            panics_recovered: self.panics_recovered.load(Ordering::Relaxed),
            latency: self.latency.snapshot(),
        }
    }

    /// Renders the Prometheus text exposition format (spec §6 `GET
    /// /metrics`).
    pub fn render_prometheus(&self) -> String {
        self.snapshot().render_prometheus()
    }

    /// Renders the JSON exposition format (spec §6 `GET /metrics/json`).
    pub fn render_json(&self) -> serde_json::Value {
        self.snapshot().render_json()
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_success: u64,
    pub requests_failure: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub policies_loaded: i64,
    pub panics_recovered: u64,
    pub latency: HistogramSnapshot,
}

impl MetricsSnapshot {
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();
        out.push_str("# HELP reaper_requests_total Total decision requests handled.\n");
        out.push_str("# TYPE reaper_requests_total counter\n");
        out.push_str(&format!("reaper_requests_total {}\n", self.requests_total));

        out.push_str("# HELP reaper_requests_success_total Decision requests completed without error.\n");
        out.push_str("# TYPE reaper_requests_success_total counter\n");
        out.push_str(&format!("reaper_requests_success_total {}\n", self.requests_success));

        out.push_str("# HELP reaper_requests_failure_total Decision requests that returned an error.\n");
        out.push_str("# TYPE reaper_requests_failure_total counter\n");
        out.push_str(&format!("reaper_requests_failure_total {}\n", self.requests_failure));

        out.push_str("# HELP reaper_cache_hits_total Decision cache hits.\n");
        out.push_str("# TYPE reaper_cache_hits_total counter\n");
        out.push_str(&format!("reaper_cache_hits_total {}\n", self.cache_hits));

        out.push_str("# HELP reaper_cache_misses_total Decision cache misses.\n");
        out.push_str("# TYPE reaper_cache_misses_total counter\n");
        out.push_str(&format!("reaper_cache_misses_total {}\n", self.cache_misses));

        out.push_str("# HELP reaper_policies_loaded Number of policies in the active snapshot.\n");
        out.push_str("# TYPE reaper_policies_loaded gauge\n");
        out.push_str(&format!("reaper_policies_loaded {}\n", self.policies_loaded));

        out.push_str("# HELP reaper_panics_recovered_total Panics caught and contained per request.\n");
        out.push_str("# TYPE reaper_panics_recovered_total counter\n");
        out.push_str(&format!("reaper_panics_recovered_total {}\n", self.panics_recovered));

        out.push_str("# HELP reaper_request_duration_seconds Decision request latency.\n");
        out.push_str("# TYPE reaper_request_duration_seconds histogram\n");
        for (bound, count) in LATENCY_BUCKETS_MS.iter().zip(self.latency.buckets.iter()) {
            out.push_str(&format!(
                "reaper_request_duration_seconds_bucket{{le=\"{}\"}} {}\n",
                *bound as f64 / 1_000.0,
                count
            ));
        }
        out.push_str(&format!(
            "reaper_request_duration_seconds_bucket{{le=\"+Inf\"}} {}\n",
            self.latency.buckets.last().copied().unwrap_or(0)
        ));
        out.push_str(&format!(
            "reaper_request_duration_seconds_sum {}\n",
            self.latency.sum_micros as f64 / 1_000_000.0
        ));
        out.push_str(&format!("reaper_request_duration_seconds_count {}\n", self.latency.count));

        out
    }

    pub fn render_json(&self) -> serde_json::Value {
        json!({
            "requests_total": self.requests_total,
            "requests_success": self.requests_success,
            "requests_failure": self.requests_failure,
            "cache_hits": self.cache_hits,
            "cache_misses": self.cache_misses,
            "policies_loaded": self.policies_loaded,
            "panics_recovered": self.panics_recovered,
            "latency": {
                "buckets_ms": LATENCY_BUCKETS_MS,
                "bucket_counts": self.latency.buckets,
                "sum_micros": self.latency.sum_micros,
                "count": self.latency.count,
            },
        })
    }
}

/// Runs `f`, catching a panic and translating it into `ReaperError::Internal`
/// instead of letting it unwind past the caller (spec §4.10 "Recovery: a
/// panic in any request handler or worker is caught, logged with stack, and
/// translated to `Internal`; the process remains live").
pub fn guarded<F, T>(metrics: &Metrics, label: &str, f: F) -> reaper_core::Result<T>
where
    F: FnOnce() -> T + std::panic::UnwindSafe,
{
    match catch_unwind(f) {
        Ok(value) => Ok(value),
        Err(payload) => {
            metrics.record_panic();
            let message = panic_message(&payload);
            error!(handler = label, panic = %message, "panic recovered, request failed");
            Err(reaper_core::ReaperError::Internal {
                reason: format!("{label} panicked: {message}"),
            })
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = Metrics::new();
        metrics.record_request(true, 500);
        metrics.record_request(false, 1_500);
        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_miss();

        let snap = metrics.snapshot();
        assert_eq!(snap.requests_total, 2);
        assert_eq!(snap.requests_success, 1);
        assert_eq!(snap.requests_failure, 1);
        assert_eq!(snap.cache_hits, 2);
        assert_eq!(snap.cache_misses, 1);
    }

    #[test]
    fn histogram_buckets_are_cumulative() {
        let metrics = Metrics::new();
        metrics.record_request(true, 2_000); // 2ms -> falls in bucket <=5
        let snap = metrics.snapshot();
        // bucket index 0 is <=1ms: should not have counted this observation.
        assert_eq!(snap.latency.buckets[0], 0);
        // bucket index 1 is <=5ms: should have counted it.
        assert_eq!(snap.latency.buckets[1], 1);
        // every larger bucket (cumulative) also counts it.
        assert_eq!(*snap.latency.buckets.last().unwrap(), 1);
        assert_eq!(snap.latency.count, 1);
    }

    #[test]
    fn policies_loaded_gauge_can_be_set_and_updated() {
        let metrics = Metrics::new();
        metrics.set_policies_loaded(12);
        assert_eq!(metrics.snapshot().policies_loaded, 12);
        metrics.set_policies_loaded(3);
        assert_eq!(metrics.snapshot().policies_loaded, 3);
    }

    #[test]
    fn prometheus_exposition_contains_expected_metric_names() {
        let metrics = Metrics::new();
        metrics.record_request(true, 100);
        let text = metrics.render_prometheus();
        assert!(text.contains("reaper_requests_total 1"));
        assert!(text.contains("# TYPE reaper_request_duration_seconds histogram"));
    }

    #[test]
    fn json_exposition_round_trips_counts() {
        let metrics = Metrics::new();
        metrics.record_cache_hit();
        let json = metrics.render_json();
        assert_eq!(json["cache_hits"], 1);
    }

    #[test]
    fn guarded_contains_panics_and_increments_counter() {
        let metrics = Metrics::new();
        let result: reaper_core::Result<()> = guarded(&metrics, "test-handler", || {
            panic!("boom");
        });
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().code(), "Internal");
        assert_eq!(metrics.snapshot().panics_recovered, 1);
    }

    #[test]
    fn guarded_passes_through_successful_result() {
        let metrics = Metrics::new();
        let result = guarded(&metrics, "test-handler", || 42);
        assert_eq!(result.unwrap(), 42);
    }
}
