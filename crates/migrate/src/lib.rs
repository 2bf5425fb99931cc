//! Detection and one-shot conversion of legacy pool encodings.
//!
//! The store has shipped four distinct on-disk shapes over time. Each is
//! handled by a strategy; detection walks the registry in order and the
//! first match wins, so adding a shape never changes how older shapes are
//! classified. Conversion is best-effort and never fails: entries that
//! cannot be salvaged are dropped with a warning, and unrecognizable input
//! produces the canonical empty state.

use models::{PoolState, Timestamp, CURRENT_SCHEMA_VERSION};
use serde_json::Value;

mod convert;

use convert::Converter;

/// Container id assumed for flat legacy data that predates containers.
pub const DEFAULT_CONTAINER: &str = "firefox-default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Current unified encoding; already canonical or trivially re-keyed.
    UnifiedV2,
    /// Container-wrapped encoding: `{containers: {<id>: {tabs: [...]}}}`.
    ContainerV1,
    /// Container entries spread across top-level `firefox-*` keys.
    UnwrappedContainer,
    /// Flat `{tabs: [...]}` with neither containers nor a version marker.
    Legacy,
    /// Matches anything; yields the empty canonical state.
    Empty,
}

/// Registry order is the detection order and must not be re-arranged.
const STRATEGIES: [Strategy; 5] = [
    Strategy::UnifiedV2,
    Strategy::ContainerV1,
    Strategy::UnwrappedContainer,
    Strategy::Legacy,
    Strategy::Empty,
];

impl Strategy {
    /// Format version this strategy recognizes.
    pub fn version(&self) -> u32 {
        match self {
            Strategy::UnifiedV2 | Strategy::Empty => CURRENT_SCHEMA_VERSION,
            Strategy::ContainerV1 | Strategy::UnwrappedContainer | Strategy::Legacy => 1,
        }
    }

    fn matches(&self, data: &Value) -> bool {
        match self {
            Strategy::UnifiedV2 => {
                version_field(data, "formatVersion") == Some(2)
                    || version_field(data, "schemaVersion") == Some(2)
                    || data.get("allQuickTabs").map_or(false, Value::is_array)
            }
            Strategy::ContainerV1 => {
                version_field(data, "formatVersion") == Some(1)
                    || data
                        .get("containers")
                        .and_then(Value::as_object)
                        .map_or(false, |containers| {
                            containers.is_empty()
                                || containers.values().any(|c| {
                                    c.get("tabs").map_or(false, Value::is_array)
                                })
                        })
            }
            Strategy::UnwrappedContainer => data.as_object().map_or(false, |object| {
                object.iter().any(|(key, value)| {
                    key.starts_with("firefox-")
                        && value.get("tabs").map_or(false, Value::is_array)
                })
            }),
            Strategy::Legacy => data.get("tabs").map_or(false, Value::is_array),
            Strategy::Empty => true,
        }
    }
}

/// Pick the strategy for raw stored data. Deterministic in registry order.
pub fn detect(data: &Value) -> Strategy {
    STRATEGIES
        .iter()
        .copied()
        .find(|strategy| strategy.matches(data))
        .unwrap_or(Strategy::Empty)
}

/// What conversion did, for diagnostics. Warnings describe salvage
/// decisions; `hybridFormat` flags container-style and flat entries
/// co-existing in one blob.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub strategy: Strategy,
    pub hybrid_format: bool,
    pub dropped_entries: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Migration {
    pub state: PoolState,
    /// True when the canonical form differs from what is stored, and a
    /// write-back should follow.
    pub needs_write: bool,
    pub report: Report,
}

/// Convert raw stored data to canonical state. Never fails; the worst
/// input yields the empty state and a report explaining why.
pub fn parse(data: &Value, now: Timestamp) -> Migration {
    let strategy = detect(data);
    let mut converter = Converter::new(now);

    let canonical_shape = match strategy {
        Strategy::UnifiedV2 => {
            let canonical = version_field(data, "schemaVersion") == Some(2)
                && data.get("allQuickTabs").map_or(false, Value::is_array);

            let entries = data
                .get("allQuickTabs")
                .or_else(|| data.get("tabs"))
                .and_then(Value::as_array);
            if let Some(entries) = entries {
                converter.take_tabs(entries, None);
            }
            converter.take_manager_state(data.get("managerState"));
            converter.take_last_modified(data.get("lastModified"));
            canonical
        }
        Strategy::ContainerV1 => {
            if let Some(containers) = data.get("containers").and_then(Value::as_object) {
                for (container_id, container) in containers {
                    if let Some(tabs) = container.get("tabs").and_then(Value::as_array) {
                        converter.take_tabs(tabs, Some(container_id.as_str()));
                    } else {
                        converter.warn(format!(
                            "container '{container_id}' has no tabs array"
                        ));
                    }
                }
            }
            converter.take_flat_remainder(data);
            false
        }
        Strategy::UnwrappedContainer => {
            if let Some(object) = data.as_object() {
                for (key, value) in object {
                    if !key.starts_with("firefox-") {
                        continue;
                    }
                    if let Some(tabs) = value.get("tabs").and_then(Value::as_array) {
                        converter.take_tabs(tabs, Some(key.as_str()));
                    } else {
                        converter.warn(format!("container '{key}' has no tabs array"));
                    }
                }
            }
            converter.take_flat_remainder(data);
            false
        }
        Strategy::Legacy => {
            // Lift into the default container, which re-flattens to entries
            // tagged with that container id.
            if let Some(tabs) = data.get("tabs").and_then(Value::as_array) {
                converter.take_tabs(tabs, Some(DEFAULT_CONTAINER));
            }
            false
        }
        Strategy::Empty => {
            if !data.is_null() && !is_effectively_empty(data) {
                converter.warn("unrecognized stored shape, starting empty".to_string());
            }
            true
        }
    };

    let (state, hybrid_format, dropped_entries, warnings) = converter.finish();

    if hybrid_format {
        tracing::warn!(?strategy, "hybrid container/flat format detected");
    }

    Migration {
        needs_write: !canonical_shape || dropped_entries > 0,
        state,
        report: Report {
            strategy,
            hybrid_format,
            dropped_entries,
            warnings,
        },
    }
}

fn version_field(data: &Value, key: &str) -> Option<u64> {
    data.get(key).and_then(Value::as_u64)
}

fn is_effectively_empty(data: &Value) -> bool {
    match data {
        Value::Null => true,
        Value::Object(object) => object.is_empty(),
        _ => false,
    }
}
