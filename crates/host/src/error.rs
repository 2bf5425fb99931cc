/// Classification of host storage failures. The store's retry policy is
/// driven entirely by this kind: fail fast, warn, or back off and retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageErrorKind {
    Quota,
    Permission,
    Unavailable,
    Transient,
    Unknown,
}

impl StorageErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageErrorKind::Quota => "QUOTA",
            StorageErrorKind::Permission => "PERMISSION",
            StorageErrorKind::Unavailable => "UNAVAILABLE",
            StorageErrorKind::Transient => "TRANSIENT",
            StorageErrorKind::Unknown => "UNKNOWN",
        }
    }

    /// Whether a write hitting this kind may be retried with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageErrorKind::Transient | StorageErrorKind::Unknown)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{} storage error: {message}", kind.as_str())]
pub struct StorageError {
    pub kind: StorageErrorKind,
    pub message: String,
}

impl StorageError {
    pub fn new(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Map a raw host exception message onto the taxonomy. Host surfaces
    /// report failures as strings; the substrings here are the stable parts
    /// of those messages across browser versions.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_ascii_lowercase();

        let kind = if lowered.contains("quota") {
            StorageErrorKind::Quota
        } else if lowered.contains("permission") || lowered.contains("access denied") {
            StorageErrorKind::Permission
        } else if lowered.contains("unavailable")
            || lowered.contains("invalidated")
            || lowered.contains("destroyed")
        {
            StorageErrorKind::Unavailable
        } else if lowered.contains("timeout")
            || lowered.contains("temporar")
            || lowered.contains("busy")
            || lowered.contains("transient")
        {
            StorageErrorKind::Transient
        } else {
            StorageErrorKind::Unknown
        };

        Self { kind, message }
    }
}

/// Failures of the host messaging surfaces (runtime and tab messages).
#[derive(Debug, Clone, thiserror::Error)]
pub enum HostError {
    #[error("message timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("receiving end does not exist")]
    NoReceiver,
    #[error("message port disconnected")]
    Disconnected,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn classification_covers_the_taxonomy() {
        let cases = [
            ("QUOTA_BYTES exceeded", StorageErrorKind::Quota),
            ("Permission denied by policy", StorageErrorKind::Permission),
            ("Extension context invalidated", StorageErrorKind::Unavailable),
            ("storage backend unavailable", StorageErrorKind::Unavailable),
            ("operation timeout", StorageErrorKind::Transient),
            ("database temporarily locked", StorageErrorKind::Transient),
            ("something else entirely", StorageErrorKind::Unknown),
        ];
        for (message, kind) in cases {
            assert_eq!(StorageError::classify(message).kind, kind, "{message}");
        }
    }

    #[test]
    fn only_transient_and_unknown_retry() {
        assert!(StorageErrorKind::Transient.is_retryable());
        assert!(StorageErrorKind::Unknown.is_retryable());
        assert!(!StorageErrorKind::Quota.is_retryable());
        assert!(!StorageErrorKind::Permission.is_retryable());
        assert!(!StorageErrorKind::Unavailable.is_retryable());
    }
}
