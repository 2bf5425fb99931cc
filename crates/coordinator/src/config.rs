/// Boot-time knobs for the coordinator process. There is no CLI surface;
/// embedders deserialize or construct this directly.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Hard cap on the pool; creations beyond it are rejected.
    pub max_quick_tabs: usize,
    /// Per-target ceiling on broadcast and manager sends.
    pub message_timeout_ms: u64,
    /// Ceiling on the whole bootstrap sequence.
    pub init_barrier_timeout_ms: u64,
    /// Coalescing window for tab metadata churn.
    pub tab_updated_debounce_ms: u64,
    /// Pending metadata older than this is discarded, not flushed.
    pub tab_updated_max_age_ms: u64,
    pub storage_health_check_interval_ms: u64,
    /// Feature flag: disabled wires the message router in minimal mode.
    pub use_quick_tabs_v2: bool,
    pub store: store::Config,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_quick_tabs: models::MAX_QUICK_TABS,
            message_timeout_ms: 3_000,
            init_barrier_timeout_ms: 10_000,
            tab_updated_debounce_ms: 500,
            tab_updated_max_age_ms: 5_000,
            storage_health_check_interval_ms: 5_000,
            use_quick_tabs_v2: true,
            store: store::Config::default(),
        }
    }
}
