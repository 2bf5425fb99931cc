use std::sync::atomic::{AtomicU64, Ordering};

/// Write-path counters. Owned by the store; other components keep their
/// own counters rather than reaching into these.
#[derive(Debug, Default)]
pub struct Metrics {
    pub successful_writes: AtomicU64,
    pub failed_writes: AtomicU64,
    pub duplicates_skipped: AtomicU64,
    pub retries_needed: AtomicU64,
    pub recoveries: AtomicU64,
    pub backup_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub successful_writes: u64,
    pub failed_writes: u64,
    pub duplicates_skipped: u64,
    pub retries_needed: u64,
    pub recoveries: u64,
    pub backup_failures: u64,
}

impl Metrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            successful_writes: self.successful_writes.load(Ordering::Relaxed),
            failed_writes: self.failed_writes.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
            retries_needed: self.retries_needed.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
            backup_failures: self.backup_failures.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.successful_writes.store(0, Ordering::Relaxed);
        self.failed_writes.store(0, Ordering::Relaxed);
        self.duplicates_skipped.store(0, Ordering::Relaxed);
        self.retries_needed.store(0, Ordering::Relaxed);
        self.recoveries.store(0, Ordering::Relaxed);
        self.backup_failures.store(0, Ordering::Relaxed);
    }
}
