// SPDX-License-Identifier: Apache-2.0

//! Lightweight process-wide counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use serde::Serialize;

#[derive(Default)]
struct ServiceMetrics {
    queries_submitted: AtomicU64,
    fetches: AtomicU64,
    paging_misses: AtomicU64,
    paging_evictions: AtomicU64,
    batches_emitted: AtomicU64,
    rows_emitted: AtomicU64,
    stream_failures: AtomicU64,
    policy_denials: AtomicU64,
}

static SERVICE_METRICS: OnceLock<ServiceMetrics> = OnceLock::new();

fn metrics() -> &'static ServiceMetrics {
    SERVICE_METRICS.get_or_init(ServiceMetrics::default)
}

pub fn record_submit() {
    metrics().queries_submitted.fetch_add(1, Ordering::Relaxed);
}

pub fn record_fetch() {
    metrics().fetches.fetch_add(1, Ordering::Relaxed);
}

pub fn record_paging_miss() {
    metrics().paging_misses.fetch_add(1, Ordering::Relaxed);
}

pub fn record_evictions(count: u64) {
    metrics().paging_evictions.fetch_add(count, Ordering::Relaxed);
}

pub fn record_batch(rows: u64) {
    let metrics = metrics();
    metrics.batches_emitted.fetch_add(1, Ordering::Relaxed);
    metrics.rows_emitted.fetch_add(rows, Ordering::Relaxed);
}

pub fn record_stream_failure() {
    metrics().stream_failures.fetch_add(1, Ordering::Relaxed);
}

pub fn record_policy_denial() {
    metrics().policy_denials.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceMetricsSnapshot {
    pub queries_submitted: u64,
    pub fetches: u64,
    pub paging_misses: u64,
    pub paging_evictions: u64,
    pub batches_emitted: u64,
    pub rows_emitted: u64,
    pub stream_failures: u64,
    pub policy_denials: u64,
    pub avg_rows_per_batch: Option<f64>,
}

pub fn snapshot() -> ServiceMetricsSnapshot {
    let metrics = metrics();
    let batches = metrics.batches_emitted.load(Ordering::Relaxed);
    let rows = metrics.rows_emitted.load(Ordering::Relaxed);

    ServiceMetricsSnapshot {
        queries_submitted: metrics.queries_submitted.load(Ordering::Relaxed),
        fetches: metrics.fetches.load(Ordering::Relaxed),
        paging_misses: metrics.paging_misses.load(Ordering::Relaxed),
        paging_evictions: metrics.paging_evictions.load(Ordering::Relaxed),
        batches_emitted: batches,
        rows_emitted: rows,
        stream_failures: metrics.stream_failures.load(Ordering::Relaxed),
        policy_denials: metrics.policy_denials.load(Ordering::Relaxed),
        avg_rows_per_batch: (batches > 0).then(|| rows as f64 / batches as f64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_only_grow() {
        // Other tests record concurrently, so only lower bounds are checked.
        let initial = snapshot();

        record_submit();
        record_fetch();
        record_paging_miss();
        record_batch(42);
        record_policy_denial();
        record_evictions(2);

        let s = snapshot();
        assert!(s.queries_submitted > initial.queries_submitted);
        assert!(s.fetches > initial.fetches);
        assert!(s.paging_misses > initial.paging_misses);
        assert!(s.batches_emitted > initial.batches_emitted);
        assert!(s.rows_emitted >= initial.rows_emitted + 42);
        assert!(s.policy_denials > initial.policy_denials);
        assert!(s.paging_evictions >= initial.paging_evictions + 2);
        assert!(s.avg_rows_per_batch.is_some());
    }
}
