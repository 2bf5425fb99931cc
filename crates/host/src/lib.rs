//! Capability traits over the host platform: the persistent key-value
//! surface, the page-tab registry, and point-to-point message ports.
//!
//! The synchronization core is written against these seams only. Production
//! embedders bind them to the real browser surfaces; the `memory` module
//! provides the in-process variants used for co-located components and for
//! tests, with fault injection.

mod error;
pub mod memory;
mod port;
mod storage;
mod tabs;

pub use error::{HostError, StorageError, StorageErrorKind};
pub use port::{channel_port, ChannelPort, MessagePort, PortRequest};
pub use storage::{Storage, StorageChange};
pub use tabs::{TabChanges, TabEvent, TabInfo, Tabs};

/// Milliseconds since the Unix epoch, from the wall clock.
pub fn now_ms() -> models::Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as models::Timestamp)
        .unwrap_or(0)
}
