mod checksum;
mod ids;
mod patch;
mod state;
mod validation;

pub use checksum::checksum;
pub use ids::{QuickTabId, TabId, ID_PREFIX};
pub use patch::QuickTabPatch;
pub use state::{ManagerState, PoolState, Position, QuickTab, Size};
pub use validation::{
    check_quick_tab, check_size, is_valid, validate_with_diagnostics, violations, BoundsError,
    Diagnostics, HEIGHT_MAX, HEIGHT_MIN, MAX_TITLE_LEN, MAX_URL_LEN, WIDTH_MAX, WIDTH_MIN,
};

/// Schema version written by this build. Downgrades are never observed.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Hard cap on the pool size.
pub const MAX_QUICK_TABS: usize = 100;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;
