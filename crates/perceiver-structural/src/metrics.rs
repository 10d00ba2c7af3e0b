//! Telemetry helpers for the observation pipeline.
//!
//! Lightweight counters + latency aggregates per stage, readable without an
//! external metrics backend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

static COLLECT_TOTAL: AtomicU64 = AtomicU64::new(0);
static COLLECT_LAT_NS: AtomicU64 = AtomicU64::new(0);
static COLLECT_LAT_SAMPLES: AtomicU64 = AtomicU64::new(0);

static FUSE_TOTAL: AtomicU64 = AtomicU64::new(0);
static FUSE_LAT_NS: AtomicU64 = AtomicU64::new(0);
static FUSE_LAT_SAMPLES: AtomicU64 = AtomicU64::new(0);

static FILTER_TOTAL: AtomicU64 = AtomicU64::new(0);
static FILTER_LAT_NS: AtomicU64 = AtomicU64::new(0);
static FILTER_LAT_SAMPLES: AtomicU64 = AtomicU64::new(0);

static SERIALIZE_TOTAL: AtomicU64 = AtomicU64::new(0);
static SERIALIZE_TRUNCATED: AtomicU64 = AtomicU64::new(0);
static SERIALIZE_LAT_NS: AtomicU64 = AtomicU64::new(0);
static SERIALIZE_LAT_SAMPLES: AtomicU64 = AtomicU64::new(0);

static QUERY_TOTAL: AtomicU64 = AtomicU64::new(0);
static QUERY_LAT_NS: AtomicU64 = AtomicU64::new(0);
static QUERY_LAT_SAMPLES: AtomicU64 = AtomicU64::new(0);

static STALE_TOTAL: AtomicU64 = AtomicU64::new(0);
static DEGRADED_SOURCES: AtomicU64 = AtomicU64::new(0);
static CANCELLED_TOTAL: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricCounter {
    pub total: u64,
    pub avg_ms: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricSnapshot {
    pub collect: MetricCounter,
    pub fuse: MetricCounter,
    pub filter: MetricCounter,
    pub serialize: MetricCounter,
    pub serialize_truncated: u64,
    pub query: MetricCounter,
    pub stale_documents: u64,
    pub degraded_sources: u64,
    pub cancelled: u64,
}

pub fn record_collect(duration: Duration) {
    COLLECT_TOTAL.fetch_add(1, Ordering::Relaxed);
    record_latency(&COLLECT_LAT_NS, &COLLECT_LAT_SAMPLES, duration);
}

pub fn record_fuse(duration: Duration) {
    FUSE_TOTAL.fetch_add(1, Ordering::Relaxed);
    record_latency(&FUSE_LAT_NS, &FUSE_LAT_SAMPLES, duration);
}

pub fn record_filter(duration: Duration) {
    FILTER_TOTAL.fetch_add(1, Ordering::Relaxed);
    record_latency(&FILTER_LAT_NS, &FILTER_LAT_SAMPLES, duration);
}

pub fn record_serialize(truncated: bool, duration: Duration) {
    SERIALIZE_TOTAL.fetch_add(1, Ordering::Relaxed);
    if truncated {
        SERIALIZE_TRUNCATED.fetch_add(1, Ordering::Relaxed);
    }
    record_latency(&SERIALIZE_LAT_NS, &SERIALIZE_LAT_SAMPLES, duration);
}

pub fn record_query(duration: Duration) {
    QUERY_TOTAL.fetch_add(1, Ordering::Relaxed);
    record_latency(&QUERY_LAT_NS, &QUERY_LAT_SAMPLES, duration);
}

pub fn record_stale() {
    STALE_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub fn record_degraded(sources: usize) {
    DEGRADED_SOURCES.fetch_add(sources as u64, Ordering::Relaxed);
}

pub fn record_cancelled() {
    CANCELLED_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub fn snapshot() -> MetricSnapshot {
    MetricSnapshot {
        collect: make_counter(
            COLLECT_TOTAL.load(Ordering::Relaxed),
            COLLECT_LAT_NS.load(Ordering::Relaxed),
            COLLECT_LAT_SAMPLES.load(Ordering::Relaxed),
        ),
        fuse: make_counter(
            FUSE_TOTAL.load(Ordering::Relaxed),
            FUSE_LAT_NS.load(Ordering::Relaxed),
            FUSE_LAT_SAMPLES.load(Ordering::Relaxed),
        ),
        filter: make_counter(
            FILTER_TOTAL.load(Ordering::Relaxed),
            FILTER_LAT_NS.load(Ordering::Relaxed),
            FILTER_LAT_SAMPLES.load(Ordering::Relaxed),
        ),
        serialize: make_counter(
            SERIALIZE_TOTAL.load(Ordering::Relaxed),
            SERIALIZE_LAT_NS.load(Ordering::Relaxed),
            SERIALIZE_LAT_SAMPLES.load(Ordering::Relaxed),
        ),
        serialize_truncated: SERIALIZE_TRUNCATED.load(Ordering::Relaxed),
        query: make_counter(
            QUERY_TOTAL.load(Ordering::Relaxed),
            QUERY_LAT_NS.load(Ordering::Relaxed),
            QUERY_LAT_SAMPLES.load(Ordering::Relaxed),
        ),
        stale_documents: STALE_TOTAL.load(Ordering::Relaxed),
        degraded_sources: DEGRADED_SOURCES.load(Ordering::Relaxed),
        cancelled: CANCELLED_TOTAL.load(Ordering::Relaxed),
    }
}

fn make_counter(total: u64, nanos: u64, samples: u64) -> MetricCounter {
    let avg_ms = if samples == 0 {
        0.0
    } else {
        (nanos as f64 / samples as f64) / 1_000_000.0
    };
    MetricCounter { total, avg_ms }
}

fn record_latency(total_ns: &AtomicU64, samples: &AtomicU64, duration: Duration) {
    let nanos = duration_to_nanos(duration);
    total_ns.fetch_add(nanos, Ordering::Relaxed);
    samples.fetch_add(1, Ordering::Relaxed);
}

fn duration_to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
