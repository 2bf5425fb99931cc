use crate::{Position, QuickTab, Size, TabId};
use serde::{Deserialize, Serialize};

/// Field overrides applied to a quick tab by an update.
///
/// Merging two patches composes them: `earlier.merge(later)` produces the
/// patch whose application equals applying `earlier` then `later`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuickTabPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<Size>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimized: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_container_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_tab_id: Option<TabId>,
}

impl QuickTabPatch {
    pub fn position(position: Position) -> Self {
        Self {
            position: Some(position),
            ..Self::default()
        }
    }

    pub fn size(size: Size) -> Self {
        Self {
            size: Some(size),
            ..Self::default()
        }
    }

    pub fn minimized(minimized: bool) -> Self {
        Self {
            minimized: Some(minimized),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Compose with a later patch; its fields win where both are set.
    pub fn merge(self, later: QuickTabPatch) -> QuickTabPatch {
        QuickTabPatch {
            url: later.url.or(self.url),
            position: later.position.or(self.position),
            size: later.size.or(self.size),
            minimized: later.minimized.or(self.minimized),
            title: later.title.or(self.title),
            origin_container_id: later.origin_container_id.or(self.origin_container_id),
            origin_tab_id: later.origin_tab_id.or(self.origin_tab_id),
        }
    }

    pub fn apply(&self, quick_tab: &mut QuickTab) {
        if let Some(url) = &self.url {
            quick_tab.url = url.clone();
        }
        if let Some(position) = self.position {
            quick_tab.position = position;
        }
        if let Some(size) = self.size {
            quick_tab.size = size;
        }
        if let Some(minimized) = self.minimized {
            quick_tab.minimized = minimized;
        }
        if let Some(title) = &self.title {
            quick_tab.title = Some(title.clone());
        }
        if let Some(container) = &self.origin_container_id {
            quick_tab.origin_container_id = Some(container.clone());
        }
        if let Some(tab_id) = self.origin_tab_id {
            quick_tab.origin_tab_id = tab_id;
        }
    }
}
