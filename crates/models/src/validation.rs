use crate::{PoolState, QuickTab, Size, TabId, CURRENT_SCHEMA_VERSION, MAX_QUICK_TABS};
use std::collections::HashSet;

pub const MAX_URL_LEN: usize = 2048;
pub const MAX_TITLE_LEN: usize = 255;
pub const WIDTH_MIN: i32 = 200;
pub const WIDTH_MAX: i32 = 3000;
pub const HEIGHT_MIN: i32 = 200;
pub const HEIGHT_MAX: i32 = 2000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BoundsError {
    #[error("url is {0} characters, maximum is {MAX_URL_LEN}")]
    UrlTooLong(usize),
    #[error("title is {0} characters, maximum is {MAX_TITLE_LEN}")]
    TitleTooLong(usize),
    #[error("width {0} is outside [{WIDTH_MIN}, {WIDTH_MAX}]")]
    Width(i32),
    #[error("height {0} is outside [{HEIGHT_MIN}, {HEIGHT_MAX}]")]
    Height(i32),
    #[error("originTabId {0} is negative")]
    OriginTab(TabId),
    #[error("duplicate quick tab id '{0}'")]
    DuplicateId(String),
    #[error("pool holds {0} quick tabs, maximum is {MAX_QUICK_TABS}")]
    TooManyQuickTabs(usize),
    #[error("schema version {0} does not match current version {CURRENT_SCHEMA_VERSION}")]
    SchemaVersion(u32),
}

/// Check a viewport size against the geometry bounds.
pub fn check_size(size: &Size) -> Result<(), BoundsError> {
    let Size { w, h } = *size;
    if !(WIDTH_MIN..=WIDTH_MAX).contains(&w) {
        return Err(BoundsError::Width(w));
    }
    if !(HEIGHT_MIN..=HEIGHT_MAX).contains(&h) {
        return Err(BoundsError::Height(h));
    }
    Ok(())
}

/// Check one entity against the field bounds.
pub fn check_quick_tab(quick_tab: &QuickTab) -> Result<(), BoundsError> {
    if quick_tab.url.len() > MAX_URL_LEN {
        return Err(BoundsError::UrlTooLong(quick_tab.url.len()));
    }
    if let Some(title) = &quick_tab.title {
        if title.len() > MAX_TITLE_LEN {
            return Err(BoundsError::TitleTooLong(title.len()));
        }
    }
    check_size(&quick_tab.size)?;
    if quick_tab.origin_tab_id < 0 {
        return Err(BoundsError::OriginTab(quick_tab.origin_tab_id));
    }
    Ok(())
}

/// Every invariant violation present in the state, in deterministic order.
pub fn violations(state: &PoolState) -> Vec<BoundsError> {
    let mut out = Vec::new();

    if state.schema_version != CURRENT_SCHEMA_VERSION {
        out.push(BoundsError::SchemaVersion(state.schema_version));
    }
    if state.all_quick_tabs.len() > MAX_QUICK_TABS {
        out.push(BoundsError::TooManyQuickTabs(state.all_quick_tabs.len()));
    }

    let mut seen = HashSet::new();
    for quick_tab in &state.all_quick_tabs {
        if !seen.insert(&quick_tab.id) {
            out.push(BoundsError::DuplicateId(quick_tab.id.to_string()));
        }
        if let Err(err) = check_quick_tab(quick_tab) {
            out.push(err);
        }
    }
    out
}

pub fn is_valid(state: &PoolState) -> bool {
    violations(state).is_empty()
}

/// Validation report surfaced to callers that tolerate imperfect state
/// (migration, diagnostics). Never panics, never fails.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub valid: bool,
    pub needs_migration: bool,
    pub warnings: Vec<String>,
}

pub fn validate_with_diagnostics(state: &PoolState) -> Diagnostics {
    let violations = violations(state);
    let needs_migration = state.schema_version < CURRENT_SCHEMA_VERSION;

    let mut warnings: Vec<String> = violations.iter().map(|v| v.to_string()).collect();
    for quick_tab in &state.all_quick_tabs {
        if !quick_tab.id.is_well_formed() {
            warnings.push(format!("quick tab id '{}' has a foreign format", quick_tab.id));
        }
    }

    Diagnostics {
        valid: violations.is_empty(),
        needs_migration,
        warnings,
    }
}
