use host::{TabInfo, Tabs};
use models::TabId;
use protocol::Envelope;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Eligibility filter over broadcast recipients.
pub type TargetPredicate = Arc<dyn Fn(&TabInfo) -> bool + Send + Sync>;

/// The stock predicate: observers live in pages, so only http(s) tabs are
/// reachable over the sync channel.
pub fn http_scheme_predicate() -> TargetPredicate {
    Arc::new(|tab: &TabInfo| {
        tab.url
            .as_ref()
            .map_or(false, |url| matches!(url.scheme(), "http" | "https"))
    })
}

/// Per-call delivery accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastStats {
    pub total_targets: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub duration_ms: u64,
}

/// Fans one envelope to every eligible observer, each send independent:
/// one slow or dead target never affects the others, and failures are
/// swallowed (the passive storage stream is the observers' safety net).
///
/// The broadcaster does not dedup; that is the router's and the
/// observers' job.
pub struct Broadcaster {
    tabs: Arc<dyn Tabs>,
    predicate: TargetPredicate,
    send_timeout: Duration,
}

impl Broadcaster {
    pub fn new(tabs: Arc<dyn Tabs>, predicate: TargetPredicate, send_timeout: Duration) -> Self {
        Self {
            tabs,
            predicate,
            send_timeout,
        }
    }

    pub async fn broadcast(&self, envelope: &Envelope) -> BroadcastStats {
        let started = Instant::now();

        let targets: Vec<TabId> = self
            .tabs
            .query()
            .await
            .into_iter()
            .filter(|tab| (self.predicate)(tab))
            .map(|tab| tab.id)
            .collect();

        let message = match serde_json::to_value(envelope) {
            Ok(message) => message,
            Err(error) => {
                tracing::error!(%error, "broadcast envelope not encodable");
                return BroadcastStats::default();
            }
        };

        let sends = targets.iter().map(|&tab_id| {
            let message = message.clone();
            async move { self.deliver(tab_id, message).await }
        });
        let results = futures::future::join_all(sends).await;

        let success_count = results.iter().filter(|&&delivered| delivered).count();
        let stats = BroadcastStats {
            total_targets: targets.len(),
            success_count,
            failed_count: targets.len() - success_count,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        tracing::debug!(
            correlation_id = %envelope.correlation_id,
            total = stats.total_targets,
            ok = stats.success_count,
            failed = stats.failed_count,
            "broadcast complete"
        );
        stats
    }

    /// Targeted delivery to one tab, same isolation rules as a fan-out.
    pub async fn send_to_tab(&self, tab_id: TabId, envelope: &Envelope) -> bool {
        match serde_json::to_value(envelope) {
            Ok(message) => self.deliver(tab_id, message).await,
            Err(_) => false,
        }
    }

    async fn deliver(&self, tab_id: TabId, message: serde_json::Value) -> bool {
        match tokio::time::timeout(self.send_timeout, self.tabs.send_message(tab_id, message))
            .await
        {
            Ok(Ok(_)) => true,
            Ok(Err(error)) => {
                tracing::debug!(tab_id, %error, "broadcast target failed");
                false
            }
            Err(_) => {
                tracing::debug!(tab_id, "broadcast target timed out");
                false
            }
        }
    }
}
