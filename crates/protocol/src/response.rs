use crate::Pattern;
use models::{PoolState, QuickTabId, TabId};
use serde::{Deserialize, Serialize};

/// Reply to one message. A flat record on the wire: `success` always,
/// everything else per pattern.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Response {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
    /// Set when a duplicate write was absorbed by correlation-id dedup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quick_tab_id: Option<QuickTabId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<Pattern>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<PoolState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<TabId>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// The rejection shape for messages that fail contract validation.
    pub fn invalid(details: Vec<String>) -> Self {
        Self {
            success: false,
            error: Some("Invalid message".to_string()),
            details,
            ..Self::default()
        }
    }

    pub fn with_pattern(mut self, pattern: Pattern) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn with_state(mut self, state: PoolState) -> Self {
        self.state = Some(state);
        self
    }
}
