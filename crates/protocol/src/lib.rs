//! The typed message contract between observers, the coordinator, and the
//! manager panel. The contract is identical across transports: in-process
//! channels and the host push channel carry the same envelopes.

mod envelope;
mod response;

pub use envelope::{new_correlation_id, parse_envelope, Envelope, InvalidMessage, MESSAGE_TYPES};
pub use response::Response;

use models::{ManagerState, PoolState, Position, QuickTab, QuickTabId, Size, TabId, Timestamp};
use serde::{Deserialize, Serialize};

/// How the coordinator treats an accepted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Pattern {
    /// Mutation applied; no broadcast, no manager notification.
    Local,
    /// Mutation applied; broadcast to every eligible observer; manager notified.
    Global,
    /// Bulk mutation; broadcast and manager notification.
    Manager,
    /// Read-only; sender receives post-state filtered to its origin tab.
    Sync,
    /// No mutation; returns the initial projection and records liveness.
    Lifecycle,
    /// Outbound-only state delivery.
    Push,
}

/// The closed set of messages. `type` tags and field names are wire-stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Payload {
    QtPositionChanged {
        quick_tab_id: QuickTabId,
        new_position: Position,
    },
    QtSizeChanged {
        quick_tab_id: QuickTabId,
        new_size: Size,
    },
    QtCreated {
        quick_tab: QuickTabDraft,
    },
    QtMinimized {
        quick_tab_id: QuickTabId,
    },
    QtRestored {
        quick_tab_id: QuickTabId,
    },
    QtClosed {
        quick_tab_id: QuickTabId,
    },
    ManagerCloseAll,
    ManagerCloseMinimized,
    ManagerStateChanged {
        manager_state: ManagerState,
    },
    RequestFullState,
    ContentScriptReady,
    ContentScriptUnload,
    QtStateSync {
        state: PoolState,
        source: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        removed_quick_tab_ids: Vec<QuickTabId>,
    },
    SidebarUpdate {
        state: PoolState,
    },
}

impl Payload {
    pub fn pattern(&self) -> Pattern {
        match self {
            Payload::QtPositionChanged { .. }
            | Payload::QtSizeChanged { .. }
            | Payload::ManagerStateChanged { .. } => Pattern::Local,
            Payload::QtCreated { .. }
            | Payload::QtMinimized { .. }
            | Payload::QtRestored { .. }
            | Payload::QtClosed { .. } => Pattern::Global,
            Payload::ManagerCloseAll | Payload::ManagerCloseMinimized => Pattern::Manager,
            Payload::RequestFullState => Pattern::Sync,
            Payload::ContentScriptReady | Payload::ContentScriptUnload => Pattern::Lifecycle,
            Payload::QtStateSync { .. } | Payload::SidebarUpdate { .. } => Pattern::Push,
        }
    }

    /// Wire name of this message's type tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            Payload::QtPositionChanged { .. } => "QT_POSITION_CHANGED",
            Payload::QtSizeChanged { .. } => "QT_SIZE_CHANGED",
            Payload::QtCreated { .. } => "QT_CREATED",
            Payload::QtMinimized { .. } => "QT_MINIMIZED",
            Payload::QtRestored { .. } => "QT_RESTORED",
            Payload::QtClosed { .. } => "QT_CLOSED",
            Payload::ManagerCloseAll => "MANAGER_CLOSE_ALL",
            Payload::ManagerCloseMinimized => "MANAGER_CLOSE_MINIMIZED",
            Payload::ManagerStateChanged { .. } => "MANAGER_STATE_CHANGED",
            Payload::RequestFullState => "REQUEST_FULL_STATE",
            Payload::ContentScriptReady => "CONTENT_SCRIPT_READY",
            Payload::ContentScriptUnload => "CONTENT_SCRIPT_UNLOAD",
            Payload::QtStateSync { .. } => "QT_STATE_SYNC",
            Payload::SidebarUpdate { .. } => "SIDEBAR_UPDATE",
        }
    }
}

/// A quick tab as submitted by a creation gesture. The coordinator assigns
/// the id and creation stamp when the sender leaves them out, and resolves
/// the origin tab from the message sender when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickTabDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<QuickTabId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_tab_id: Option<TabId>,
    pub url: String,
    pub position: Position,
    pub size: Size,
    #[serde(default)]
    pub minimized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_container_id: Option<String>,
}

impl QuickTabDraft {
    pub fn into_quick_tab(
        self,
        id: QuickTabId,
        origin_tab_id: TabId,
        created_at: Timestamp,
    ) -> QuickTab {
        QuickTab {
            id,
            origin_tab_id,
            url: self.url,
            position: self.position,
            size: self.size,
            minimized: self.minimized,
            created_at,
            title: self.title,
            origin_container_id: self.origin_container_id,
        }
    }
}

#[cfg(test)]
mod tests;
