//! Bootstrap behavior: single-flight init, migration gating, the feature
//! flag, and the timeout ceiling.

mod support;

use coordinator::{Config, InitBarrier, Mode};
use host::memory::{MemoryStorage, MemoryTabs};
use host::{Storage, StorageError};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use store::{StateStore, STATE_KEY};

fn legacy_blob() -> serde_json::Value {
    json!({
        "containers": {
            "firefox-default": {
                "tabs": [
                    {"id": "a", "url": "u", "position": {"x": 1, "y": 1}, "size": {"w": 400, "h": 300}},
                ],
            },
        },
    })
}

fn fixture() -> (Arc<MemoryStorage>, Arc<dyn Storage>, Arc<StateStore>) {
    let storage = Arc::new(MemoryStorage::new());
    let erased: Arc<dyn Storage> = storage.clone();
    let store = Arc::new(StateStore::new(
        storage.clone(),
        storage.clone(),
        store::Config::default(),
    ));
    (storage, erased, store)
}

#[tokio::test(start_paused = true)]
async fn init_migrates_seeded_legacy_data_once() {
    let (storage, erased, store) = fixture();
    storage.seed(STATE_KEY, legacy_blob());

    let barrier = InitBarrier::new();
    let config = Config::default();

    let outcome = barrier.ready(&store, &erased, &config).await.unwrap();
    assert_eq!(outcome.mode, Mode::Full);
    assert!(outcome.migrated);

    let upgraded = storage.peek(STATE_KEY).unwrap();
    assert_eq!(upgraded["schemaVersion"], json!(2));
    assert_eq!(upgraded["allQuickTabs"].as_array().unwrap().len(), 1);

    // A later caller shares the first call's outcome; nothing re-runs.
    let again = barrier.ready(&store, &erased, &config).await.unwrap();
    assert!(again.migrated);
    assert_eq!(store.get_metrics().successful_writes, 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_init_calls_run_one_migration() {
    let (storage, erased, store) = fixture();
    storage.seed(STATE_KEY, legacy_blob());

    let barrier = Arc::new(InitBarrier::new());
    let config = Config::default();

    let calls = (0..8).map(|_| {
        let barrier = barrier.clone();
        let store = store.clone();
        let erased = erased.clone();
        let config = config.clone();
        tokio::spawn(async move { barrier.ready(&store, &erased, &config).await.unwrap() })
    });

    for call in calls {
        let outcome = call.await.unwrap();
        assert_eq!(outcome.mode, Mode::Full);
        assert!(outcome.migrated);
    }
    assert_eq!(store.get_metrics().successful_writes, 1);
}

#[tokio::test(start_paused = true)]
async fn disabled_flag_starts_minimal_and_leaves_storage_alone() {
    let (storage, erased, store) = fixture();
    storage.seed(STATE_KEY, legacy_blob());

    let barrier = InitBarrier::new();
    let config = Config {
        use_quick_tabs_v2: false,
        ..Config::default()
    };

    let outcome = barrier.ready(&store, &erased, &config).await.unwrap();
    assert_eq!(outcome.mode, Mode::Minimal);
    assert!(!outcome.migrated);
    assert_eq!(storage.peek(STATE_KEY).unwrap(), legacy_blob());
}

#[tokio::test(start_paused = true)]
async fn minimal_mode_serves_the_same_router_contract() {
    let (_storage, _erased, store) = fixture();
    let tabs = Arc::new(MemoryTabs::new());
    let config = Config {
        use_quick_tabs_v2: false,
        ..Config::default()
    };
    let mut coordinator = coordinator::Coordinator::new(store, tabs, None, config);

    // Validation behaves identically to full mode.
    let rejected = coordinator
        .handle_raw(&json!({"type": "QT_WARPED"}), None)
        .await;
    assert!(!rejected.success);
    assert_eq!(rejected.error.as_deref(), Some("Invalid message"));

    let accepted = coordinator
        .handle_raw(
            &support::wire("REQUEST_FULL_STATE", "c1", 1_000, json!({})),
            None,
        )
        .await;
    assert!(accepted.success);
    assert!(accepted.state.is_some());
}

/// A storage surface that never answers, to exercise the init ceiling.
struct HangingStorage;

#[async_trait::async_trait]
impl Storage for HangingStorage {
    async fn get(&self, _key: &str) -> Result<Option<serde_json::Value>, StorageError> {
        std::future::pending().await
    }

    async fn set(&self, _key: &str, _value: serde_json::Value) -> Result<(), StorageError> {
        std::future::pending().await
    }

    async fn remove(&self, _key: &str) -> Result<(), StorageError> {
        std::future::pending().await
    }

    fn changes(&self) -> tokio::sync::broadcast::Receiver<host::StorageChange> {
        tokio::sync::broadcast::channel(1).1
    }
}

#[tokio::test(start_paused = true)]
async fn init_fails_with_a_diagnostic_at_the_ceiling() {
    let hanging: Arc<dyn Storage> = Arc::new(HangingStorage);
    let store = Arc::new(StateStore::new(
        hanging.clone(),
        hanging.clone(),
        store::Config::default(),
    ));

    let barrier = InitBarrier::new();
    let config = Config::default();

    let error = barrier.ready(&store, &hanging, &config).await.unwrap_err();
    assert!(error.to_string().contains("did not complete"));
}
