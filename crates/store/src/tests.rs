use crate::{Config, StateStore, BACKUP_KEY, STATE_KEY};
use host::memory::MemoryStorage;
use host::{StorageError, StorageErrorKind};
use models::{checksum, PoolState, Position, QuickTab, Size};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn quick_tab(id: &str, origin: i64) -> QuickTab {
    QuickTab {
        id: id.into(),
        origin_tab_id: origin,
        url: format!("https://example.com/{id}"),
        position: Position { x: 10, y: 20 },
        size: Size { w: 400, h: 300 },
        minimized: false,
        created_at: 100,
        title: None,
        origin_container_id: None,
    }
}

fn store_over(storage: &Arc<MemoryStorage>) -> StateStore {
    StateStore::new(storage.clone(), storage.clone(), Config::default())
}

#[tokio::test(start_paused = true)]
async fn successful_writes_are_immediately_readable_with_matching_checksum() {
    let storage = Arc::new(MemoryStorage::new());
    let store = store_over(&storage);

    let state = PoolState::empty()
        .add(quick_tab("qt-a", 7), 1)
        .add(quick_tab("qt-b", 9), 2);
    let outcome = store.write_state_with_validation(&state, "c1").await;
    assert!(outcome.success && !outcome.skipped);

    let read = store.read_state().await;
    assert_eq!(read.all_quick_tabs, state.all_quick_tabs);
    assert_eq!(checksum(&read), checksum(&state));
}

#[tokio::test(start_paused = true)]
async fn distinct_correlation_ids_never_dedup() {
    let storage = Arc::new(MemoryStorage::new());
    let store = store_over(&storage);

    for n in 0..5 {
        let state = PoolState::empty().add(quick_tab(&format!("qt-{n}"), 7), n);
        let outcome = store
            .write_state_with_validation(&state, &format!("c{n}"))
            .await;
        assert!(outcome.success && !outcome.skipped);
    }

    let metrics = store.get_metrics();
    assert_eq!(metrics.successful_writes, 5);
    assert_eq!(metrics.duplicates_skipped, 0);
}

#[tokio::test(start_paused = true)]
async fn repeated_correlation_id_inside_the_window_writes_once() {
    let storage = Arc::new(MemoryStorage::new());
    let store = store_over(&storage);
    let state = PoolState::empty().add(quick_tab("qt-a", 7), 1);

    let first = store.write_state_with_validation(&state, "c3").await;
    assert!(first.success && !first.skipped);

    let second = store.write_state_with_validation(&state, "c3").await;
    assert!(second.success && second.skipped);

    // Outside the window the same correlation id is a fresh write.
    tokio::time::advance(Duration::from_millis(60)).await;
    let third = store.write_state_with_validation(&state, "c3").await;
    assert!(third.success && !third.skipped);

    let metrics = store.get_metrics();
    assert_eq!(metrics.successful_writes, 2);
    assert_eq!(metrics.duplicates_skipped, 1);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_retry_with_backoff() {
    let storage = Arc::new(MemoryStorage::new());
    let store = store_over(&storage);
    storage.fail_next_set(StorageError::new(StorageErrorKind::Transient, "locked"));

    let state = PoolState::empty().add(quick_tab("qt-a", 7), 1);
    let outcome = store.write_state_with_validation(&state, "c1").await;
    assert!(outcome.success);

    let metrics = store.get_metrics();
    assert_eq!(metrics.successful_writes, 1);
    assert_eq!(metrics.retries_needed, 1);
}

#[tokio::test(start_paused = true)]
async fn readback_mismatch_is_retried_as_transient() {
    let storage = Arc::new(MemoryStorage::new());
    let store = store_over(&storage);
    // First attempt acknowledges but persists nothing, so readback misses.
    storage.drop_next_set();

    let state = PoolState::empty().add(quick_tab("qt-a", 7), 1);
    let outcome = store.write_state_with_validation(&state, "c1").await;
    assert!(outcome.success);
    assert_eq!(store.get_metrics().retries_needed, 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_recover_from_backup() {
    let storage = Arc::new(MemoryStorage::new());
    let store = store_over(&storage);

    // Populate state and backup with a good write, then wreck three attempts.
    let good = PoolState::empty().add(quick_tab("qt-a", 7), 1);
    assert!(store.write_state_with_validation(&good, "c1").await.success);
    let backup_before = storage.peek(BACKUP_KEY).unwrap();

    for _ in 0..3 {
        storage.fail_next_set(StorageError::new(StorageErrorKind::Transient, "locked"));
    }
    let worse = good.add(quick_tab("qt-b", 9), 2);
    let outcome = store.write_state_with_validation(&worse, "c2").await;

    assert!(!outcome.success);
    assert_eq!(outcome.error.unwrap().kind, StorageErrorKind::Transient);
    let metrics = store.get_metrics();
    assert_eq!(metrics.failed_writes, 1);
    assert_eq!(metrics.recoveries, 1);
    // Recovery restored the backup into the state slot.
    assert_eq!(storage.peek(STATE_KEY).unwrap(), backup_before);
}

#[tokio::test(start_paused = true)]
async fn unavailable_disables_writes_until_a_healthy_probe() {
    let storage = Arc::new(MemoryStorage::new());
    let store = store_over(&storage);
    storage.fail_next_set(StorageError::new(
        StorageErrorKind::Unavailable,
        "extension context invalidated",
    ));

    let state = PoolState::empty().add(quick_tab("qt-a", 7), 1);
    let first = store.write_state_with_validation(&state, "c1").await;
    assert!(!first.success);
    assert!(store.storage_unavailable());

    // Fail-fast: no storage traffic, same classification.
    let second = store.write_state_with_validation(&state, "c2").await;
    assert!(!second.success);
    assert_eq!(second.error.unwrap().kind, StorageErrorKind::Unavailable);
    assert_eq!(storage.peek(STATE_KEY), None);

    assert!(store.health_check().await);
    assert!(!store.storage_unavailable());
    assert!(store.write_state_with_validation(&state, "c3").await.success);
}

#[tokio::test(start_paused = true)]
async fn quota_failures_do_not_retry() {
    let storage = Arc::new(MemoryStorage::new());
    let store = store_over(&storage);
    storage.fail_next_set(StorageError::new(StorageErrorKind::Quota, "QUOTA_BYTES"));

    let state = PoolState::empty().add(quick_tab("qt-a", 7), 1);
    let outcome = store.write_state_with_validation(&state, "c1").await;

    assert!(!outcome.success);
    assert_eq!(outcome.error.unwrap().kind, StorageErrorKind::Quota);
    // One attempt, no recovery, nothing written.
    assert_eq!(store.get_metrics().recoveries, 0);
    assert_eq!(storage.peek(STATE_KEY), None);
}

#[tokio::test(start_paused = true)]
async fn cold_reads_upgrade_legacy_data_exactly_once() {
    let storage = Arc::new(MemoryStorage::new());
    storage.seed(
        STATE_KEY,
        json!({
            "containers": {
                "firefox-default": {
                    "tabs": [
                        {"id": "a", "url": "u", "position": {"x": 1, "y": 1}, "size": {"w": 400, "h": 300}},
                    ],
                },
            },
        }),
    );
    let store = store_over(&storage);

    let first = store.read_state().await;
    assert_eq!(first.all_quick_tabs.len(), 1);
    assert_eq!(first.all_quick_tabs[0].id.as_str(), "a");

    // Storage now holds the unified encoding.
    let upgraded = storage.peek(STATE_KEY).unwrap();
    assert_eq!(upgraded["schemaVersion"], json!(2));
    assert!(upgraded["allQuickTabs"].is_array());

    let second = store.read_state().await;
    assert_eq!(second, first);
    // The second read took the no-op path: still exactly one write.
    assert_eq!(store.get_metrics().successful_writes, 1);
}

#[tokio::test(start_paused = true)]
async fn last_modified_is_monotonic_across_writes() {
    let storage = Arc::new(MemoryStorage::new());
    let store = store_over(&storage);

    let state = PoolState::empty().add(quick_tab("qt-a", 7), 1);
    assert!(store.write_state_with_validation(&state, "c1").await.success);
    let first = store.read_state().await.last_modified;

    tokio::time::advance(Duration::from_millis(5)).await;
    assert!(store.write_state_with_validation(&state, "c2").await.success);
    let second = store.read_state().await.last_modified;

    assert!(second >= first);
}

#[tokio::test(start_paused = true)]
async fn corrupt_stored_data_reads_as_empty() {
    let storage = Arc::new(MemoryStorage::new());
    storage.seed(STATE_KEY, json!("not even an object"));
    let store = store_over(&storage);

    let state = store.read_state().await;
    assert_eq!(state, PoolState::empty());
}
