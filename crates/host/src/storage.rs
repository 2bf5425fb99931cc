use crate::StorageError;
use serde_json::Value;
use tokio::sync::broadcast;

/// One key transitioning on a storage surface. Mirrors the host's
/// change-listener payload: both sides of the transition, no diff.
#[derive(Debug, Clone)]
pub struct StorageChange {
    pub key: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// A persistent key-value surface.
///
/// Change events fan out to every subscriber, including the writer; callers
/// that must not observe their own writes suppress the echo themselves
/// (correlation ids, not listener bookkeeping).
#[async_trait::async_trait]
pub trait Storage: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;

    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Subscribe to change events. A lagged subscriber misses events rather
    /// than blocking writers; observers recover through revalidation.
    fn changes(&self) -> broadcast::Receiver<StorageChange>;
}
