//! In-process implementations of the host capabilities.
//!
//! These are the co-located transport variants (coordinator and observers in
//! one process share them directly) and double as the test host. Fault
//! queues let tests script storage failures and dropped acknowledgements
//! without reaching into the store.

use crate::{
    HostError, MessagePort, Storage, StorageChange, StorageError, TabChanges, TabEvent, TabInfo,
    Tabs,
};
use models::TabId;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use tokio::sync::{broadcast, mpsc};

const CHANGE_CHANNEL_CAP: usize = 256;

/// Scripted failure for the next matching storage operation.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail the operation with this error.
    Fail(StorageError),
    /// Acknowledge a set() but drop the payload, so readback mismatches.
    DropWrite,
}

#[derive(Default)]
struct MemoryStorageInner {
    data: HashMap<String, Value>,
    set_faults: VecDeque<Fault>,
    get_faults: VecDeque<Fault>,
}

pub struct MemoryStorage {
    inner: Mutex<MemoryStorageInner>,
    changes_tx: broadcast::Sender<StorageChange>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        let (changes_tx, _) = broadcast::channel(CHANGE_CHANNEL_CAP);
        Self {
            inner: Mutex::new(MemoryStorageInner::default()),
            changes_tx,
        }
    }

    /// Seed a key without emitting a change event, as if written by a
    /// previous session.
    pub fn seed(&self, key: &str, value: Value) {
        self.inner.lock().unwrap().data.insert(key.to_string(), value);
    }

    pub fn fail_next_set(&self, error: StorageError) {
        self.inner
            .lock()
            .unwrap()
            .set_faults
            .push_back(Fault::Fail(error));
    }

    /// The next set() acknowledges but persists nothing.
    pub fn drop_next_set(&self) {
        self.inner
            .lock()
            .unwrap()
            .set_faults
            .push_back(Fault::DropWrite);
    }

    pub fn fail_next_get(&self, error: StorageError) {
        self.inner
            .lock()
            .unwrap()
            .get_faults
            .push_back(Fault::Fail(error));
    }

    /// Direct snapshot of a stored value, bypassing faults.
    pub fn peek(&self, key: &str) -> Option<Value> {
        self.inner.lock().unwrap().data.get(key).cloned()
    }
}

#[async_trait::async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.get_faults.pop_front() {
            Some(Fault::Fail(error)) => return Err(error),
            Some(Fault::DropWrite) | None => {}
        }
        Ok(inner.data.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let old_value = {
            let mut inner = self.inner.lock().unwrap();
            match inner.set_faults.pop_front() {
                Some(Fault::Fail(error)) => return Err(error),
                Some(Fault::DropWrite) => return Ok(()),
                None => {}
            }
            inner.data.insert(key.to_string(), value.clone())
        };

        // Nobody listening is fine; observers attach when they bootstrap.
        let _ = self.changes_tx.send(StorageChange {
            key: key.to_string(),
            old_value,
            new_value: Some(value),
        });
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let old_value = self.inner.lock().unwrap().data.remove(key);
        if old_value.is_some() {
            let _ = self.changes_tx.send(StorageChange {
                key: key.to_string(),
                old_value,
                new_value: None,
            });
        }
        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<StorageChange> {
        self.changes_tx.subscribe()
    }
}

#[derive(Default)]
struct MemoryTabsInner {
    tabs: HashMap<TabId, TabInfo>,
    inboxes: HashMap<TabId, mpsc::UnboundedSender<Value>>,
    unreachable: HashSet<TabId>,
}

/// The page-tab registry: tabs are upserted by tests or embedders, observer
/// inboxes attach per tab, and lifecycle events fan out to subscribers.
pub struct MemoryTabs {
    inner: Mutex<MemoryTabsInner>,
    events_tx: broadcast::Sender<TabEvent>,
}

impl Default for MemoryTabs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTabs {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(CHANGE_CHANNEL_CAP);
        Self {
            inner: Mutex::new(MemoryTabsInner::default()),
            events_tx,
        }
    }

    pub fn open_tab(&self, tab: TabInfo) {
        self.inner.lock().unwrap().tabs.insert(tab.id, tab);
    }

    /// Attach the observer inbox for a tab. Messages sent to the tab are
    /// delivered here; a tab without an inbox has no receiving end.
    pub fn attach_inbox(&self, tab_id: TabId) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().unwrap().inboxes.insert(tab_id, tx);
        rx
    }

    /// Make message delivery to a tab fail, without closing it.
    pub fn set_unreachable(&self, tab_id: TabId, unreachable: bool) {
        let mut inner = self.inner.lock().unwrap();
        if unreachable {
            inner.unreachable.insert(tab_id);
        } else {
            inner.unreachable.remove(&tab_id);
        }
    }

    pub fn activate(&self, tab_id: TabId) {
        let _ = self.events_tx.send(TabEvent::Activated { tab_id });
    }

    pub fn close_tab(&self, tab_id: TabId, window_closing: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.tabs.remove(&tab_id);
        inner.inboxes.remove(&tab_id);
        drop(inner);
        let _ = self.events_tx.send(TabEvent::Removed {
            tab_id,
            window_closing,
        });
    }

    /// Apply property changes to a tab and emit the corresponding event.
    pub fn update_tab(&self, tab_id: TabId, changes: TabChanges) {
        let snapshot = {
            let mut inner = self.inner.lock().unwrap();
            let Some(tab) = inner.tabs.get_mut(&tab_id) else {
                return;
            };
            if let Some(url) = &changes.url {
                tab.url = url::Url::parse(url).ok();
            }
            if let Some(title) = &changes.title {
                tab.title = Some(title.clone());
            }
            if let Some(favicon_url) = &changes.favicon_url {
                tab.favicon_url = Some(favicon_url.clone());
            }
            if let Some(container_id) = &changes.container_id {
                tab.container_id = Some(container_id.clone());
            }
            tab.clone()
        };
        let _ = self.events_tx.send(TabEvent::Updated {
            tab_id,
            changes,
            tab: snapshot,
        });
    }
}

#[async_trait::async_trait]
impl Tabs for MemoryTabs {
    async fn query(&self) -> Vec<TabInfo> {
        let mut tabs: Vec<TabInfo> = self.inner.lock().unwrap().tabs.values().cloned().collect();
        tabs.sort_by_key(|tab| tab.id);
        tabs
    }

    async fn get(&self, tab_id: TabId) -> Option<TabInfo> {
        self.inner.lock().unwrap().tabs.get(&tab_id).cloned()
    }

    async fn send_message(&self, tab_id: TabId, message: Value) -> Result<Value, HostError> {
        let inbox = {
            let inner = self.inner.lock().unwrap();
            if inner.unreachable.contains(&tab_id) {
                return Err(HostError::NoReceiver);
            }
            inner.inboxes.get(&tab_id).cloned()
        };
        match inbox {
            Some(inbox) => inbox
                .send(message)
                .map(|()| Value::Null)
                .map_err(|_| HostError::Disconnected),
            None => Err(HostError::NoReceiver),
        }
    }

    fn events(&self) -> broadcast::Receiver<TabEvent> {
        self.events_tx.subscribe()
    }
}

/// A port that records everything sent to it. Stands in for the manager
/// panel sink and for per-tab assertions.
#[derive(Default)]
pub struct RecorderPort {
    sent: Mutex<Vec<Value>>,
}

impl RecorderPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<Value> {
        std::mem::take(&mut self.sent.lock().unwrap())
    }

    pub fn len(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.lock().unwrap().is_empty()
    }
}

#[async_trait::async_trait]
impl MessagePort for RecorderPort {
    async fn send(&self, message: Value) -> Result<Value, HostError> {
        self.sent.lock().unwrap().push(message);
        Ok(Value::Null)
    }
}
