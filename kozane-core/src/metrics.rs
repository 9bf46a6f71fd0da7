//! # Metrics
//!
//! Operation counters for monitoring a store instance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics collector shared by a store and its callers.
#[derive(Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    gets: AtomicU64,
    sets: AtomicU64,
    snapshots_written: AtomicU64,
    deletes: AtomicU64,
    fsck_runs: AtomicU64,
    fsck_repairs: AtomicU64,
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub gets: u64,
    pub sets: u64,
    pub snapshots_written: u64,
    pub deletes: u64,
    pub fsck_runs: u64,
    pub fsck_repairs: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_get(&self) {
        self.inner.gets.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a write; `snapshot` says whether the value changed and a
    /// history snapshot was recorded alongside the live file.
    pub fn record_set(&self, snapshot: bool) {
        self.inner.sets.fetch_add(1, Ordering::Relaxed);
        if snapshot {
            self.inner.snapshots_written.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_delete(&self) {
        self.inner.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fsck_run(&self) {
        self.inner.fsck_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fsck_repairs(&self, count: u64) {
        self.inner.fsck_repairs.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            gets: self.inner.gets.load(Ordering::Relaxed),
            sets: self.inner.sets.load(Ordering::Relaxed),
            snapshots_written: self.inner.snapshots_written.load(Ordering::Relaxed),
            deletes: self.inner.deletes.load(Ordering::Relaxed),
            fsck_runs: self.inner.fsck_runs.load(Ordering::Relaxed),
            fsck_repairs: self.inner.fsck_repairs.load(Ordering::Relaxed),
        }
    }
}
