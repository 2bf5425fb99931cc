use crate::HostError;
use models::TabId;
use serde_json::Value;
use tokio::sync::broadcast;

/// Snapshot of one host page tab.
#[derive(Debug, Clone)]
pub struct TabInfo {
    pub id: TabId,
    pub url: Option<url::Url>,
    pub title: Option<String>,
    pub favicon_url: Option<String>,
    pub container_id: Option<String>,
    pub window_id: i64,
    pub active: bool,
}

/// Coalescible subset of tab properties the lifecycle tracker cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabChanges {
    pub url: Option<String>,
    pub title: Option<String>,
    pub favicon_url: Option<String>,
    pub container_id: Option<String>,
}

impl TabChanges {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Later changes win field-wise, matching host event semantics where
    /// each event carries only the properties that changed.
    pub fn merge(self, later: TabChanges) -> TabChanges {
        TabChanges {
            url: later.url.or(self.url),
            title: later.title.or(self.title),
            favicon_url: later.favicon_url.or(self.favicon_url),
            container_id: later.container_id.or(self.container_id),
        }
    }
}

/// Host tab lifecycle signals consumed by the coordinator.
#[derive(Debug, Clone)]
pub enum TabEvent {
    Activated {
        tab_id: TabId,
    },
    Removed {
        tab_id: TabId,
        /// True when the removal is part of an entire window closing; the
        /// cleanup path then relies on storage-level dedup alone.
        window_closing: bool,
    },
    Updated {
        tab_id: TabId,
        changes: TabChanges,
        tab: TabInfo,
    },
}

/// The host's page-tab registry and per-tab messaging surface.
#[async_trait::async_trait]
pub trait Tabs: Send + Sync + 'static {
    /// All currently open tabs.
    async fn query(&self) -> Vec<TabInfo>;

    async fn get(&self, tab_id: TabId) -> Option<TabInfo>;

    /// Deliver a message to the observer living in `tab_id` and await its
    /// acknowledgement.
    async fn send_message(&self, tab_id: TabId, message: Value) -> Result<Value, HostError>;

    fn events(&self) -> broadcast::Receiver<TabEvent>;
}
