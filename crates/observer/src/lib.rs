//! Observer-side synchronization: one per host page (or manager panel).
//!
//! An observer owns a projection of the pool and reconciles two input
//! streams into it: pushed `QT_STATE_SYNC` envelopes and passive
//! storage-change events. The two streams overlap, arrive out of order,
//! and echo the observer's own edits; reconciliation suppresses, dedups,
//! and revalidates so both paths converge on the same projection.
//!
//! Observers never write the store. Intent goes out as messages; the
//! coordinator is the sole writer.

use host::{now_ms, HostError, MessagePort, Storage, StorageChange};
use models::{PoolState, QuickTab, TabId, Timestamp};
use protocol::{Envelope, Payload, Response};
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Window absorbing storage echoes and re-deliveries of one update.
    pub dedup_window_ms: u64,
    /// Window suppressing echoes of this observer's own outbound write.
    pub write_ignore_window_ms: u64,
    /// Ceiling on the tab-id bootstrap round trip.
    pub tab_id_timeout_ms: u64,
    /// Ceiling on ordinary request round trips.
    pub message_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dedup_window_ms: 300,
            write_ignore_window_ms: 100,
            tab_id_timeout_ms: 2_000,
            message_timeout_ms: 3_000,
        }
    }
}

/// Which slice of the pool this observer projects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// A page observer: entities whose originTabId matches its own tab.
    /// Until the tab id is known the full pool is held and filtered
    /// client-side.
    OriginTab,
    /// The manager panel: the full pool.
    Manager,
}

pub struct ObserverSync {
    config: Config,
    scope: Scope,
    coordinator: Arc<dyn MessagePort>,
    storage: Arc<dyn Storage>,
    origin_tab_id: Option<TabId>,
    projection: Vec<QuickTab>,
    last_outbound: Option<(String, Instant)>,
    // Fingerprint bookkeeping for dedup (step 3) and ordering (step 4).
    seen: HashMap<(u64, Timestamp), Instant>,
    last_accepted: HashMap<u64, (Timestamp, Instant)>,
    refreshed_tx: watch::Sender<u64>,
}

impl ObserverSync {
    pub fn new(
        scope: Scope,
        coordinator: Arc<dyn MessagePort>,
        storage: Arc<dyn Storage>,
        config: Config,
    ) -> Self {
        let (refreshed_tx, _) = watch::channel(0);
        Self {
            config,
            scope,
            coordinator,
            storage,
            origin_tab_id: None,
            projection: Vec::new(),
            last_outbound: None,
            seen: HashMap::new(),
            last_accepted: HashMap::new(),
            refreshed_tx,
        }
    }

    /// Subscribe to `state:refreshed`: the revision bumps whenever the
    /// projection is replaced. Renderers watch this.
    pub fn refreshed(&self) -> watch::Receiver<u64> {
        self.refreshed_tx.subscribe()
    }

    pub fn projection(&self) -> &[QuickTab] {
        &self.projection
    }

    pub fn origin_tab_id(&self) -> Option<TabId> {
        self.origin_tab_id
    }

    /// Announce readiness and learn this observer's tab identity, which
    /// only the host runtime knows. The same response carries the initial
    /// projection. On timeout the observer proceeds with an unknown tab id
    /// and holds the full pool, filtered client-side.
    pub async fn bootstrap(&mut self) -> Result<(), HostError> {
        let envelope = Envelope::new(Payload::ContentScriptReady, now_ms());
        let timeout = Duration::from_millis(self.config.tab_id_timeout_ms);

        let response = match self.request(&envelope, timeout).await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(%error, "tab-id bootstrap failed, filtering client-side");
                return Err(error);
            }
        };

        self.origin_tab_id = response.tab_id;
        if let Some(state) = response.state {
            self.replace_projection(state);
        }
        tracing::debug!(tab_id = ?self.origin_tab_id, "observer bootstrapped");
        Ok(())
    }

    /// Publish an intent message and await the coordinator's reply. The
    /// correlation id is recorded so the echo of this write is suppressed
    /// when it comes back on either stream; the projection refreshes from
    /// the store directly instead, which is what makes the suppression
    /// safe.
    pub async fn publish(&mut self, payload: Payload) -> Result<Response, HostError> {
        let envelope = Envelope::new(payload, now_ms());
        self.last_outbound = Some((envelope.correlation_id.clone(), Instant::now()));

        let timeout = Duration::from_millis(self.config.message_timeout_ms);
        let response = self.request(&envelope, timeout).await?;
        if response.success {
            self.refresh_from_store().await;
        }
        Ok(response)
    }

    /// Announce teardown; best-effort, the tab may already be unloading.
    pub async fn shutdown(&mut self) {
        let envelope = Envelope::new(Payload::ContentScriptUnload, now_ms());
        let timeout = Duration::from_millis(self.config.message_timeout_ms);
        if let Err(error) = self.request(&envelope, timeout).await {
            tracing::debug!(%error, "unload notice not delivered");
        }
    }

    /// Push stream input: a `QT_STATE_SYNC` (or `SIDEBAR_UPDATE`) envelope.
    pub async fn handle_push(&mut self, envelope: Envelope) {
        let (state, source) = match envelope.payload {
            Payload::QtStateSync { state, source, .. } => (state, source),
            Payload::SidebarUpdate { state } => (state, "sidebar".to_string()),
            other => {
                tracing::debug!(type_name = other.type_name(), "ignoring non-push envelope");
                return;
            }
        };
        tracing::trace!(%source, "push received");
        self.reconcile(state, Some(&envelope.correlation_id), envelope.timestamp)
            .await;
    }

    /// Passive stream input: a storage-change event for the state key.
    pub async fn handle_storage_change(&mut self, change: StorageChange) {
        if change.key != store::STATE_KEY {
            return;
        }
        let Some(raw) = change.new_value else {
            // Key removed: session teardown; an empty projection follows.
            self.replace_projection(PoolState::empty());
            return;
        };
        let state = match serde_json::from_value::<PoolState>(raw) {
            Ok(state) => state,
            Err(error) => {
                tracing::warn!(%error, "storage change not decodable, ignoring");
                return;
            }
        };
        let timestamp = state.last_modified;
        self.reconcile(state, None, timestamp).await;
    }

    /// The reconciliation pipeline of suppression, dedup, ordering
    /// validation, filtering, and atomic replacement.
    async fn reconcile(
        &mut self,
        candidate: PoolState,
        correlation_id: Option<&str>,
        timestamp: Timestamp,
    ) {
        // Self-write suppression: an echo of our own recent write carries
        // nothing our optimistic local edit does not already reflect.
        if let (Some(incoming), Some((outbound, at))) = (correlation_id, &self.last_outbound) {
            if incoming == outbound.as_str()
                && at.elapsed() < Duration::from_millis(self.config.write_ignore_window_ms)
            {
                tracing::trace!(correlation_id = incoming, "own write echo suppressed");
                return;
            }
        }

        self.prune();

        // Message dedup: the push and passive streams both deliver most
        // updates; identical (content, stamp) pairs inside the window are
        // one update.
        let print = fingerprint(&candidate);
        if let Some(seen_at) = self.seen.get(&(print, timestamp)) {
            if seen_at.elapsed() < Duration::from_millis(self.config.dedup_window_ms) {
                tracing::trace!(fingerprint = print, "duplicate delivery dropped");
                return;
            }
        }
        self.seen.insert((print, timestamp), Instant::now());

        // Ordering validation: a regression for a known fingerprint means
        // deliveries crossed; the store is the tiebreaker.
        let state = match self.last_accepted.get(&print) {
            Some(&(accepted, _)) if timestamp < accepted => {
                tracing::debug!(
                    fingerprint = print,
                    timestamp,
                    accepted,
                    "stale delivery, revalidating from store"
                );
                match self.revalidate().await {
                    Some(current) => current,
                    None => return,
                }
            }
            _ => candidate,
        };

        self.last_accepted.insert(
            fingerprint(&state),
            (timestamp.max(state.last_modified), Instant::now()),
        );
        self.replace_projection(state);
    }

    /// Replace the projection with the store's current truth, recording it
    /// as the newest accepted content.
    async fn refresh_from_store(&mut self) {
        if let Some(state) = self.revalidate().await {
            self.last_accepted.insert(
                fingerprint(&state),
                (state.last_modified, Instant::now()),
            );
            self.replace_projection(state);
        }
    }

    /// Direct read of the store's current value, bypassing both streams.
    async fn revalidate(&self) -> Option<PoolState> {
        match self.storage.get(store::STATE_KEY).await {
            Ok(Some(raw)) => match serde_json::from_value(raw) {
                Ok(state) => Some(state),
                Err(error) => {
                    tracing::warn!(%error, "revalidation read not decodable");
                    None
                }
            },
            Ok(None) => Some(PoolState::empty()),
            Err(error) => {
                tracing::warn!(%error, "revalidation read failed, keeping projection");
                None
            }
        }
    }

    fn replace_projection(&mut self, state: PoolState) {
        self.projection = match (self.scope, self.origin_tab_id) {
            (Scope::Manager, _) | (Scope::OriginTab, None) => state.all_quick_tabs,
            (Scope::OriginTab, Some(tab_id)) => state
                .filter_by_origin_tab(tab_id)
                .cloned()
                .collect(),
        };
        self.refreshed_tx.send_modify(|revision| *revision += 1);
    }

    async fn request(
        &self,
        envelope: &Envelope,
        timeout: Duration,
    ) -> Result<Response, HostError> {
        let message = match serde_json::to_value(envelope) {
            Ok(message) => message,
            Err(_) => return Err(HostError::Disconnected),
        };
        let reply = tokio::time::timeout(timeout, self.coordinator.send(message))
            .await
            .map_err(|_| HostError::Timeout(timeout))??;
        Ok(serde_json::from_value::<Response>(reply).unwrap_or_default())
    }

    // Both maps are windows over recent traffic; entries past any window's
    // reach are garbage.
    fn prune(&mut self) {
        let seen_horizon = Duration::from_millis(self.config.dedup_window_ms * 4);
        self.seen.retain(|_, at| at.elapsed() < seen_horizon);

        const ACCEPTED_HORIZON: Duration = Duration::from_secs(60);
        self.last_accepted
            .retain(|_, (_, at)| at.elapsed() < ACCEPTED_HORIZON);
    }
}

/// Identity of a pool's membership: a hash of the id sequence. Two states
/// with the same entities in the same order share a fingerprint.
fn fingerprint(state: &PoolState) -> u64 {
    let mut hasher = DefaultHasher::new();
    for quick_tab in &state.all_quick_tabs {
        quick_tab.id.as_str().hash(&mut hasher);
    }
    hasher.finish()
}
