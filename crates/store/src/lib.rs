//! The authoritative pool store: validated writes with readback checksums,
//! correlation-id dedup, classified retry, and recovery.
//!
//! The store is the sole writer of the state key in the coordinator
//! process. Reads tolerate any historical encoding (legacy data is
//! upgraded in place, once); writes are observably readable before they
//! report success.

mod metrics;

pub use metrics::{Metrics, MetricsSnapshot};

use host::{now_ms, Storage, StorageError, StorageErrorKind};
use models::{checksum, is_valid, PoolState, Timestamp, CURRENT_SCHEMA_VERSION};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// The canonical persistent slot, shared by every process.
pub const STATE_KEY: &str = "quick_tabs_state_v2";

/// Secondary slot refreshed after successful writes; the recovery source.
pub const BACKUP_KEY: &str = "quick_tabs_state_v2_backup";

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Writes repeating the previous correlation id inside this window are
    /// absorbed as duplicates.
    pub dedup_window_ms: u64,
    pub max_retries: u32,
    pub backoff_ms: Vec<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dedup_window_ms: 50,
            max_retries: 3,
            backoff_ms: vec![100, 200, 400],
        }
    }
}

/// Result of one `write_state_with_validation` call. Never a panic or a
/// thrown error; failures are values.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub success: bool,
    pub skipped: bool,
    pub error: Option<StorageError>,
}

impl WriteOutcome {
    fn success() -> Self {
        Self {
            success: true,
            skipped: false,
            error: None,
        }
    }

    fn skipped() -> Self {
        Self {
            success: true,
            skipped: true,
            error: None,
        }
    }

    fn failed(error: StorageError) -> Self {
        Self {
            success: false,
            skipped: false,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoverySource {
    Backup,
    Reset,
}

#[derive(Debug, Clone, Copy)]
pub struct RecoveryOutcome {
    pub recovered: bool,
    pub source: RecoverySource,
}

#[derive(Default)]
struct DedupState {
    last_correlation_id: Option<String>,
    last_write_at: Option<Instant>,
}

enum AttemptError {
    Storage(StorageError),
    /// Readback disagreed with what was written; treated as transient.
    Readback(String),
}

pub struct StateStore {
    primary: Arc<dyn Storage>,
    backup: Arc<dyn Storage>,
    config: Config,
    metrics: Metrics,
    dedup: Mutex<DedupState>,
    unavailable: AtomicBool,
    modified_floor: AtomicI64,
}

impl StateStore {
    /// `primary` and `backup` may be the same surface; recovery only needs
    /// the backup slot to survive what clobbered the state slot.
    pub fn new(primary: Arc<dyn Storage>, backup: Arc<dyn Storage>, config: Config) -> Self {
        Self {
            primary,
            backup,
            config,
            metrics: Metrics::default(),
            dedup: Mutex::new(DedupState::default()),
            unavailable: AtomicBool::new(false),
            modified_floor: AtomicI64::new(0),
        }
    }

    /// Read the canonical state. Absent, corrupt, or legacy-encoded data
    /// never surfaces to the caller: legacy encodings are converted (and
    /// upgraded in storage, best-effort), anything else yields empty.
    pub async fn read_state(&self) -> PoolState {
        let raw = match self.primary.get(STATE_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return PoolState::empty(),
            Err(error) => {
                tracing::warn!(%error, "state read failed, returning empty");
                return PoolState::empty();
            }
        };

        let migration = migrate::parse(&raw, now_ms());
        if migration.needs_write {
            tracing::info!(
                strategy = ?migration.report.strategy,
                dropped = migration.report.dropped_entries,
                "upgrading legacy stored state"
            );
            for warning in &migration.report.warnings {
                tracing::warn!(%warning, "migration salvage");
            }
            let correlation_id = format!("migration-{}", uuid::Uuid::new_v4());
            let outcome = self
                .write_state_with_validation(&migration.state, &correlation_id)
                .await;
            if outcome.success {
                // Serve exactly what the store now holds, so repeated cold
                // reads are indistinguishable.
                if let Ok(Some(raw)) = self.primary.get(STATE_KEY).await {
                    if let Ok(stored) = serde_json::from_value::<PoolState>(raw) {
                        return stored;
                    }
                }
            } else {
                tracing::warn!("legacy upgrade write-back failed, serving converted state");
            }
        }
        migration.state
    }

    /// The write algorithm: dedup, stamp, then submit/readback/validate up
    /// to `max_retries` times with backoff. A `success` return means the
    /// payload was observably readable from the store.
    pub async fn write_state_with_validation(
        &self,
        state: &PoolState,
        correlation_id: &str,
    ) -> WriteOutcome {
        if self.absorb_duplicate(correlation_id) {
            tracing::debug!(correlation_id, "duplicate write skipped");
            return WriteOutcome::skipped();
        }

        if self.unavailable.load(Ordering::Acquire) {
            self.metrics.failed_writes.fetch_add(1, Ordering::Relaxed);
            return WriteOutcome::failed(StorageError::new(
                StorageErrorKind::Unavailable,
                "storage unavailable, failing fast",
            ));
        }

        let mut payload = state.clone();
        payload.schema_version = CURRENT_SCHEMA_VERSION;
        payload.last_modified = self.next_modified_stamp();

        let expect_count = payload.all_quick_tabs.len();
        let expect_checksum = checksum(&payload);
        let encoded = match serde_json::to_value(&payload) {
            Ok(encoded) => encoded,
            Err(error) => {
                self.metrics.failed_writes.fetch_add(1, Ordering::Relaxed);
                return WriteOutcome::failed(StorageError::new(
                    StorageErrorKind::Unknown,
                    format!("state not encodable: {error}"),
                ));
            }
        };

        let mut last_error = None;
        for attempt in 1..=self.config.max_retries {
            match self
                .attempt_write(&encoded, expect_count, expect_checksum)
                .await
            {
                Ok(()) => {
                    self.metrics.successful_writes.fetch_add(1, Ordering::Relaxed);
                    if attempt > 1 {
                        self.metrics.retries_needed.fetch_add(1, Ordering::Relaxed);
                    }
                    self.refresh_backup(&encoded).await;
                    return WriteOutcome::success();
                }
                Err(AttemptError::Storage(error)) => {
                    match error.kind {
                        StorageErrorKind::Unavailable => {
                            self.unavailable.store(true, Ordering::Release);
                            self.metrics.failed_writes.fetch_add(1, Ordering::Relaxed);
                            tracing::error!(%error, "storage unavailable, disabling writes");
                            return WriteOutcome::failed(error);
                        }
                        StorageErrorKind::Permission => {
                            self.metrics.failed_writes.fetch_add(1, Ordering::Relaxed);
                            tracing::error!(%error, "storage permission failure");
                            return WriteOutcome::failed(error);
                        }
                        StorageErrorKind::Quota => {
                            // No retry storm on quota; the caller decides.
                            self.metrics.failed_writes.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(%error, "storage quota exceeded");
                            return WriteOutcome::failed(error);
                        }
                        StorageErrorKind::Transient | StorageErrorKind::Unknown => {
                            tracing::debug!(%error, attempt, "write attempt failed");
                            last_error = Some(error);
                        }
                    }
                }
                Err(AttemptError::Readback(why)) => {
                    tracing::debug!(%why, attempt, "readback validation failed");
                    last_error = Some(StorageError::new(StorageErrorKind::Transient, why));
                }
            }

            if attempt < self.config.max_retries {
                let backoff = self
                    .config
                    .backoff_ms
                    .get(attempt as usize - 1)
                    .copied()
                    .unwrap_or(100);
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
        }

        self.metrics.failed_writes.fetch_add(1, Ordering::Relaxed);
        let recovery = self.trigger_storage_recovery(correlation_id).await;
        tracing::error!(
            correlation_id,
            recovered = recovery.recovered,
            source = ?recovery.source,
            "write exhausted retries"
        );
        WriteOutcome::failed(last_error.unwrap_or_else(|| {
            StorageError::new(StorageErrorKind::Unknown, "write exhausted retries")
        }))
    }

    /// Restore from the backup slot, or reset to empty. Always leaves the
    /// state slot holding a canonical value.
    pub async fn trigger_storage_recovery(&self, correlation_id: &str) -> RecoveryOutcome {
        self.metrics.recoveries.fetch_add(1, Ordering::Relaxed);

        if let Ok(Some(raw)) = self.backup.get(BACKUP_KEY).await {
            let salvage = serde_json::from_value::<PoolState>(raw.clone()).ok();
            if salvage.as_ref().map_or(false, is_valid)
                && self.primary.set(STATE_KEY, raw).await.is_ok()
            {
                tracing::error!(correlation_id, "state restored from backup");
                return RecoveryOutcome {
                    recovered: true,
                    source: RecoverySource::Backup,
                };
            }
        }

        let empty = serde_json::to_value(PoolState::empty())
            .unwrap_or_else(|_| serde_json::json!({}));
        let _ = self.primary.set(STATE_KEY, empty).await;
        tracing::error!(correlation_id, "state reset to empty after storage failure");
        RecoveryOutcome {
            recovered: false,
            source: RecoverySource::Reset,
        }
    }

    /// Probe the storage surface. A healthy probe re-arms writes after an
    /// UNAVAILABLE episode; an unhealthy one trips the fail-fast flag.
    pub async fn health_check(&self) -> bool {
        match self.primary.get(STATE_KEY).await {
            Ok(_) => {
                if self.unavailable.swap(false, Ordering::AcqRel) {
                    tracing::info!("storage reachable again, writes re-enabled");
                }
                true
            }
            Err(error) => {
                if error.kind == StorageErrorKind::Unavailable {
                    self.unavailable.store(true, Ordering::Release);
                }
                tracing::warn!(%error, "storage health probe failed");
                false
            }
        }
    }

    pub fn storage_unavailable(&self) -> bool {
        self.unavailable.load(Ordering::Acquire)
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset()
    }

    /// A handle to the underlying primary surface, for observers doing
    /// direct revalidation reads.
    pub fn primary(&self) -> Arc<dyn Storage> {
        self.primary.clone()
    }

    // Dedup is checked and recorded in one critical section; the lock is
    // never held across an await point.
    fn absorb_duplicate(&self, correlation_id: &str) -> bool {
        let mut dedup = self.dedup.lock().unwrap();
        let now = Instant::now();

        let duplicate = match (&dedup.last_correlation_id, dedup.last_write_at) {
            (Some(last_id), Some(last_at)) => {
                last_id == correlation_id
                    && now.duration_since(last_at)
                        < Duration::from_millis(self.config.dedup_window_ms)
            }
            _ => false,
        };
        if duplicate {
            self.metrics.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
            return true;
        }

        dedup.last_correlation_id = Some(correlation_id.to_string());
        dedup.last_write_at = Some(now);
        false
    }

    async fn attempt_write(
        &self,
        encoded: &Value,
        expect_count: usize,
        expect_checksum: u32,
    ) -> Result<(), AttemptError> {
        self.primary
            .set(STATE_KEY, encoded.clone())
            .await
            .map_err(AttemptError::Storage)?;

        let readback = self
            .primary
            .get(STATE_KEY)
            .await
            .map_err(AttemptError::Storage)?
            .ok_or_else(|| AttemptError::Readback("state missing after write".to_string()))?;

        let state: PoolState = serde_json::from_value(readback)
            .map_err(|err| AttemptError::Readback(format!("readback not decodable: {err}")))?;

        if !is_valid(&state) {
            return Err(AttemptError::Readback("readback fails validation".to_string()));
        }
        if state.all_quick_tabs.len() != expect_count {
            return Err(AttemptError::Readback(format!(
                "readback holds {} quick tabs, wrote {expect_count}",
                state.all_quick_tabs.len()
            )));
        }
        let found = checksum(&state);
        if found != expect_checksum {
            return Err(AttemptError::Readback(format!(
                "readback checksum {found:#010x} != written {expect_checksum:#010x}"
            )));
        }
        Ok(())
    }

    async fn refresh_backup(&self, encoded: &Value) {
        if let Err(error) = self.backup.set(BACKUP_KEY, encoded.clone()).await {
            self.metrics.backup_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(%error, "backup refresh failed");
        }
    }

    // lastModified never decreases across successive writes, even when the
    // wall clock does.
    fn next_modified_stamp(&self) -> Timestamp {
        let now = now_ms();
        let prev = self.modified_floor.fetch_max(now, Ordering::AcqRel);
        now.max(prev)
    }
}

#[cfg(test)]
mod tests;
