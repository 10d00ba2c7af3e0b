use std::time::Duration;

use cdp_adapter::DocumentIdentity;
use tracing::debug;

use crate::metrics;
use crate::policy::SerializeMode;

pub fn emit_collect(identity: &DocumentIdentity, degraded: usize, duration: Duration) {
    metrics::record_collect(duration);
    debug!(
        target: "perceiver.events",
        document = %identity,
        degraded,
        elapsed_ms = duration.as_millis() as u64,
        "structural.collect.completed"
    );
}

pub fn emit_fuse(nodes: usize, diagnostics: usize, duration: Duration) {
    metrics::record_fuse(duration);
    debug!(
        target: "perceiver.events",
        nodes,
        diagnostics,
        elapsed_ms = duration.as_millis() as u64,
        "structural.fuse.completed"
    );
}

pub fn emit_filter(kept: usize, indexed: usize, duration: Duration) {
    metrics::record_filter(duration);
    debug!(
        target: "perceiver.events",
        kept,
        indexed,
        elapsed_ms = duration.as_millis() as u64,
        "structural.filter.completed"
    );
}

pub fn emit_serialize(mode: SerializeMode, chars: usize, truncated: bool, duration: Duration) {
    metrics::record_serialize(truncated, duration);
    debug!(
        target: "perceiver.events",
        ?mode,
        chars,
        truncated,
        "structural.serialize.completed"
    );
}

pub fn emit_query(kind: &str, results: usize, duration: Duration) {
    metrics::record_query(duration);
    debug!(
        target: "perceiver.events",
        kind,
        results,
        "structural.query.completed"
    );
}

pub fn emit_stale(expected: &DocumentIdentity, found: &DocumentIdentity) {
    metrics::record_stale();
    debug!(
        target: "perceiver.events",
        expected = %expected,
        found = %found,
        "structural.document.stale"
    );
}
