use crate::{QuickTabId, QuickTabPatch, TabId, Timestamp, CURRENT_SCHEMA_VERSION};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub w: i32,
    pub h: i32,
}

/// A floating overlay viewport owned by one origin page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickTab {
    pub id: QuickTabId,
    pub origin_tab_id: TabId,
    pub url: String,
    pub position: Position,
    pub size: Size,
    #[serde(default)]
    pub minimized: bool,
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_container_id: Option<String>,
}

/// Placement of the manager panel, persisted alongside the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerState {
    pub position: Position,
    pub size: Size,
    pub collapsed: bool,
}

impl Default for ManagerState {
    fn default() -> Self {
        Self {
            position: Position { x: 20, y: 20 },
            size: Size { w: 320, h: 480 },
            collapsed: false,
        }
    }
}

/// The canonical pool state shared by the coordinator and every observer.
///
/// `allQuickTabs` preserves insertion order; it is observable and no
/// operation re-sorts it. Updates retain an entity's position, removal is
/// the only operation that changes the sequence shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolState {
    pub schema_version: u32,
    pub last_modified: Timestamp,
    #[serde(default)]
    pub all_quick_tabs: Vec<QuickTab>,
    #[serde(default)]
    pub manager_state: ManagerState,
}

impl PoolState {
    pub fn empty() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            last_modified: 0,
            all_quick_tabs: Vec::new(),
            manager_state: ManagerState::default(),
        }
    }

    /// Append a quick tab, preserving the order of existing entries.
    pub fn add(&self, quick_tab: QuickTab, now: Timestamp) -> Self {
        let mut next = self.clone();
        next.all_quick_tabs.push(quick_tab);
        next.stamped(now)
    }

    /// Apply field overrides to the entity with `id`, retaining its position
    /// in the sequence. A missing id yields an unchanged (restamped) state.
    pub fn update(&self, id: &QuickTabId, patch: &QuickTabPatch, now: Timestamp) -> Self {
        let mut next = self.clone();
        if let Some(entry) = next.all_quick_tabs.iter_mut().find(|qt| qt.id == *id) {
            patch.apply(entry);
        }
        next.stamped(now)
    }

    pub fn remove(&self, id: &QuickTabId, now: Timestamp) -> Self {
        let mut next = self.clone();
        next.all_quick_tabs.retain(|qt| qt.id != *id);
        next.stamped(now)
    }

    /// Drop every entity spawned by the given origin tab.
    pub fn remove_by_origin_tab(&self, tab_id: TabId, now: Timestamp) -> Self {
        let mut next = self.clone();
        next.all_quick_tabs.retain(|qt| qt.origin_tab_id != tab_id);
        next.stamped(now)
    }

    pub fn clear_all(&self, now: Timestamp) -> Self {
        let mut next = self.clone();
        next.all_quick_tabs.clear();
        next.stamped(now)
    }

    pub fn set_manager_state(&self, manager_state: ManagerState, now: Timestamp) -> Self {
        let mut next = self.clone();
        next.manager_state = manager_state;
        next.stamped(now)
    }

    pub fn find_by_id(&self, id: &QuickTabId) -> Option<&QuickTab> {
        self.all_quick_tabs.iter().find(|qt| qt.id == *id)
    }

    pub fn filter_by_origin_tab(&self, tab_id: TabId) -> impl Iterator<Item = &QuickTab> {
        self.all_quick_tabs
            .iter()
            .filter(move |qt| qt.origin_tab_id == tab_id)
    }

    pub fn minimized(&self) -> impl Iterator<Item = &QuickTab> {
        self.all_quick_tabs.iter().filter(|qt| qt.minimized)
    }

    pub fn active(&self) -> impl Iterator<Item = &QuickTab> {
        self.all_quick_tabs.iter().filter(|qt| !qt.minimized)
    }

    fn stamped(mut self, now: Timestamp) -> Self {
        self.schema_version = CURRENT_SCHEMA_VERSION;
        self.last_modified = now;
        self
    }
}
