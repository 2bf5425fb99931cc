//! Entry-wise salvage of legacy tab records into canonical `QuickTab`s.

use models::{
    ManagerState, PoolState, Position, QuickTab, QuickTabId, Size, Timestamp, HEIGHT_MAX,
    HEIGHT_MIN, MAX_QUICK_TABS, MAX_TITLE_LEN, MAX_URL_LEN, WIDTH_MAX, WIDTH_MIN,
};
use serde_json::Value;
use std::collections::HashSet;

const DEFAULT_POSITION: Position = Position { x: 50, y: 50 };
const DEFAULT_SIZE: Size = Size { w: 400, h: 300 };

/// Accumulates converted entries across one or more source containers,
/// deduplicating ids and enforcing the pool cap as it goes.
pub(crate) struct Converter {
    now: Timestamp,
    tabs: Vec<QuickTab>,
    seen_ids: HashSet<QuickTabId>,
    saw_container_entries: bool,
    saw_flat_entries: bool,
    manager_state: Option<ManagerState>,
    last_modified: Option<Timestamp>,
    dropped: usize,
    warnings: Vec<String>,
}

impl Converter {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now,
            tabs: Vec::new(),
            seen_ids: HashSet::new(),
            saw_container_entries: false,
            saw_flat_entries: false,
            manager_state: None,
            last_modified: None,
            dropped: 0,
            warnings: Vec::new(),
        }
    }

    pub fn warn(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    /// Convert the entries of one tabs array. `container` tags each entry's
    /// originContainerId when the source shape was container-keyed.
    pub fn take_tabs(&mut self, entries: &[Value], container: Option<&str>) {
        match container {
            Some(_) => self.saw_container_entries = true,
            None => self.saw_flat_entries = true,
        }
        for entry in entries {
            match self.convert(entry, container) {
                Some(quick_tab) => {
                    if self.tabs.len() >= MAX_QUICK_TABS {
                        self.dropped += 1;
                        continue;
                    }
                    if !self.seen_ids.insert(quick_tab.id.clone()) {
                        self.dropped += 1;
                        self.warn(format!("duplicate id '{}' dropped", quick_tab.id));
                        continue;
                    }
                    self.tabs.push(quick_tab);
                }
                None => self.dropped += 1,
            }
        }
    }

    /// Container-era blobs occasionally carry a flat tabs array alongside
    /// the containers; fold it in and flag the hybrid.
    pub fn take_flat_remainder(&mut self, data: &Value) {
        if let Some(tabs) = data.get("tabs").and_then(Value::as_array) {
            self.warn("flat entries alongside containers (hybrid format)".to_string());
            self.take_tabs(tabs, None);
        }
    }

    pub fn take_manager_state(&mut self, value: Option<&Value>) {
        if let Some(value) = value {
            match serde_json::from_value::<ManagerState>(value.clone()) {
                Ok(manager_state) => self.manager_state = Some(manager_state),
                Err(err) => self.warn(format!("managerState not salvageable: {err}")),
            }
        }
    }

    pub fn take_last_modified(&mut self, value: Option<&Value>) {
        self.last_modified = value.and_then(Value::as_i64);
    }

    pub fn finish(mut self) -> (PoolState, bool, usize, Vec<String>) {
        if self.tabs.len() == MAX_QUICK_TABS && self.dropped > 0 {
            self.warnings
                .push(format!("pool cap reached, {} entries dropped", self.dropped));
        }

        // Data without a modification stamp keeps the empty-state stamp;
        // the first write-back assigns the real one.
        let state = PoolState {
            all_quick_tabs: self.tabs,
            manager_state: self.manager_state.unwrap_or_default(),
            last_modified: self.last_modified.unwrap_or(0),
            ..PoolState::empty()
        };
        let hybrid = self.saw_container_entries && self.saw_flat_entries;
        (state, hybrid, self.dropped, self.warnings)
    }

    /// One entry. `id` and `url` are required; everything else is defaulted
    /// or clamped into bounds so the result always passes validation.
    fn convert(&mut self, entry: &Value, container: Option<&str>) -> Option<QuickTab> {
        let id = match entry.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => QuickTabId::from(id),
            _ => {
                self.warnings.push("entry without id dropped".to_string());
                return None;
            }
        };
        let url = match entry.get("url").and_then(Value::as_str) {
            Some(url) if !url.is_empty() && url.len() <= MAX_URL_LEN => url.to_string(),
            Some(url) if url.len() > MAX_URL_LEN => {
                self.warnings
                    .push(format!("entry '{id}' dropped: url exceeds {MAX_URL_LEN} chars"));
                return None;
            }
            _ => {
                self.warnings.push(format!("entry '{id}' without url dropped"));
                return None;
            }
        };

        let origin_tab_id = match entry.get("originTabId").and_then(Value::as_i64) {
            Some(tab_id) if tab_id >= 0 => tab_id,
            Some(tab_id) => {
                self.warnings
                    .push(format!("entry '{id}': negative originTabId {tab_id} reset to 0"));
                0
            }
            None => {
                self.warnings
                    .push(format!("entry '{id}': missing originTabId reset to 0"));
                0
            }
        };

        let position = entry
            .get("position")
            .and_then(|v| serde_json::from_value::<Position>(v.clone()).ok())
            .unwrap_or(DEFAULT_POSITION);

        let size = entry
            .get("size")
            .and_then(|v| serde_json::from_value::<Size>(v.clone()).ok())
            .map(|size| self.clamp_size(&id, size))
            .unwrap_or(DEFAULT_SIZE);

        let title = entry
            .get("title")
            .and_then(Value::as_str)
            .map(|title| truncate(title, MAX_TITLE_LEN));

        let origin_container_id = entry
            .get("originContainerId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| container.map(str::to_string));

        Some(QuickTab {
            id,
            origin_tab_id,
            url,
            position,
            size,
            minimized: entry
                .get("minimized")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            created_at: entry
                .get("createdAt")
                .and_then(Value::as_i64)
                .unwrap_or(self.now),
            title,
            origin_container_id,
        })
    }

    fn clamp_size(&mut self, id: &QuickTabId, size: Size) -> Size {
        let clamped = Size {
            w: size.w.clamp(WIDTH_MIN, WIDTH_MAX),
            h: size.h.clamp(HEIGHT_MIN, HEIGHT_MAX),
        };
        if clamped != size {
            self.warnings
                .push(format!("entry '{id}': size clamped into bounds"));
        }
        clamped
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
