//! The coordinator: the one process allowed to mutate the pool.
//!
//! A single logical task owns all mutation. It reads one message, composes
//! one write, awaits its outcome, then fans out; two mutations never
//! interleave, which linearizes the store without locks. Message arrival
//! order is the total order of mutations; conflicting concurrent actions
//! resolve last-write-wins by arrival.

mod broadcast;
mod config;
mod init;
mod tabs;

pub use broadcast::{http_scheme_predicate, BroadcastStats, Broadcaster, TargetPredicate};
pub use config::Config;
pub use init::{InitBarrier, InitOutcome, Mode};
pub use tabs::TabUpdateDebouncer;

use host::{now_ms, MessagePort, PortRequest, TabChanges, TabEvent, Tabs};
use models::{
    check_quick_tab, check_size, PoolState, QuickTab, QuickTabId, QuickTabPatch, TabId,
    MAX_URL_LEN,
};
use protocol::{parse_envelope, Envelope, Pattern, Payload, Response};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use store::StateStore;
use tokio::sync::{broadcast as tokio_broadcast, mpsc};
use tokio::time::Instant;

pub struct Coordinator {
    store: Arc<StateStore>,
    tabs: Arc<dyn Tabs>,
    broadcaster: Broadcaster,
    manager: Option<Arc<dyn MessagePort>>,
    config: Config,
    debouncer: TabUpdateDebouncer,
    ready_tabs: HashSet<TabId>,
    last_broadcast: Option<BroadcastStats>,
}

impl Coordinator {
    pub fn new(
        store: Arc<StateStore>,
        tabs: Arc<dyn Tabs>,
        manager: Option<Arc<dyn MessagePort>>,
        config: Config,
    ) -> Self {
        Self::with_target_predicate(store, tabs, manager, config, http_scheme_predicate())
    }

    /// Override which tabs count as broadcast-eligible observers.
    pub fn with_target_predicate(
        store: Arc<StateStore>,
        tabs: Arc<dyn Tabs>,
        manager: Option<Arc<dyn MessagePort>>,
        config: Config,
        predicate: TargetPredicate,
    ) -> Self {
        let send_timeout = Duration::from_millis(config.message_timeout_ms);
        let broadcaster = Broadcaster::new(tabs.clone(), predicate, send_timeout);
        let debouncer = TabUpdateDebouncer::new(
            Duration::from_millis(config.tab_updated_debounce_ms),
            Duration::from_millis(config.tab_updated_max_age_ms),
        );
        Self {
            store,
            tabs,
            broadcaster,
            manager,
            config,
            debouncer,
            ready_tabs: HashSet::new(),
            last_broadcast: None,
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Delivery accounting of the most recent fan-out.
    pub fn last_broadcast(&self) -> Option<BroadcastStats> {
        self.last_broadcast
    }

    /// Serve requests and host signals until `shutdown` resolves. This is
    /// the coordinator's entire concurrency story: one loop, one mutation
    /// in flight at any time.
    pub async fn serve(
        mut self,
        mut requests: mpsc::Receiver<PortRequest>,
        shutdown: impl std::future::Future<Output = ()>,
    ) {
        let mut tab_events = self.tabs.events();
        let mut tab_events_open = self.config.use_quick_tabs_v2;
        let mut requests_open = true;

        let mut health = tokio::time::interval(Duration::from_millis(
            self.config.storage_health_check_interval_ms,
        ));
        health.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        health.reset(); // No probe at time zero; init just touched storage.

        tokio::pin!(shutdown);
        loop {
            let flush_at = self.debouncer.next_flush();

            tokio::select! {
                () = &mut shutdown => break,

                request = requests.recv(), if requests_open => {
                    let Some(PortRequest { message, sender_tab, reply }) = request else {
                        // All ports dropped; host signals may still arrive.
                        requests_open = false;
                        continue;
                    };
                    let response = self.handle_raw(&message, sender_tab).await;
                    let encoded = serde_json::to_value(&response)
                        .unwrap_or_else(|_| serde_json::json!({"success": false}));
                    let _ = reply.send(encoded);
                }

                event = tab_events.recv(), if tab_events_open => match event {
                    Ok(event) => self.handle_tab_event(event).await,
                    Err(tokio_broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "tab event stream lagged");
                    }
                    Err(tokio_broadcast::error::RecvError::Closed) => {
                        tab_events_open = false;
                    }
                },

                _ = health.tick() => {
                    self.store.health_check().await;
                }

                () = flush_sleep(flush_at) => {
                    self.flush_tab_updates().await;
                }
            }
        }
        tracing::info!("coordinator loop stopped");
    }

    /// Validate and dispatch one raw inbound value.
    pub async fn handle_raw(
        &mut self,
        message: &serde_json::Value,
        sender_tab: Option<TabId>,
    ) -> Response {
        match parse_envelope(message) {
            Ok(envelope) => self.dispatch(envelope, sender_tab).await,
            Err(invalid) => {
                // Invalid input is the sender's problem, not an error here.
                tracing::debug!(details = ?invalid.details, "rejecting invalid message");
                Response::invalid(invalid.details)
            }
        }
    }

    /// Apply one accepted message: read, transform, write, then fan out
    /// per the message's delivery pattern.
    pub async fn dispatch(&mut self, envelope: Envelope, sender_tab: Option<TabId>) -> Response {
        let pattern = envelope.payload.pattern();
        let correlation_id = envelope.correlation_id.clone();
        tracing::debug!(
            type_name = envelope.payload.type_name(),
            %correlation_id,
            ?pattern,
            "dispatching"
        );

        match envelope.payload {
            Payload::QtPositionChanged {
                quick_tab_id,
                new_position,
            } => {
                let patch = QuickTabPatch::position(new_position);
                self.apply_patch(&quick_tab_id, patch, &correlation_id, pattern)
                    .await
            }
            Payload::QtSizeChanged {
                quick_tab_id,
                new_size,
            } => {
                if let Err(bounds) = check_size(&new_size) {
                    return Response::failure(bounds.to_string());
                }
                let patch = QuickTabPatch::size(new_size);
                self.apply_patch(&quick_tab_id, patch, &correlation_id, pattern)
                    .await
            }
            Payload::ManagerStateChanged { manager_state } => {
                let state = self.store.read_state().await;
                let next = state.set_manager_state(manager_state, now_ms());
                match self.commit(&next, &correlation_id).await {
                    Ok(response) => response.with_pattern(pattern),
                    Err(response) => response,
                }
            }
            Payload::QtCreated { quick_tab } => {
                self.create(quick_tab, sender_tab, &correlation_id).await
            }
            Payload::QtMinimized { quick_tab_id } => {
                self.global_patch(
                    &quick_tab_id,
                    QuickTabPatch::minimized(true),
                    &correlation_id,
                )
                .await
            }
            Payload::QtRestored { quick_tab_id } => {
                self.global_patch(
                    &quick_tab_id,
                    QuickTabPatch::minimized(false),
                    &correlation_id,
                )
                .await
            }
            Payload::QtClosed { quick_tab_id } => self.close(&quick_tab_id, &correlation_id).await,
            Payload::ManagerCloseAll => {
                let state = self.store.read_state().await;
                let closed: Vec<QuickTabId> =
                    state.all_quick_tabs.iter().map(|qt| qt.id.clone()).collect();
                self.bulk_close(state.clear_all(now_ms()), closed, &correlation_id)
                    .await
            }
            Payload::ManagerCloseMinimized => {
                let state = self.store.read_state().await;
                let closed: Vec<QuickTabId> = state.minimized().map(|qt| qt.id.clone()).collect();
                let mut next = state;
                for id in &closed {
                    next = next.remove(id, now_ms());
                }
                self.bulk_close(next, closed, &correlation_id).await
            }
            Payload::RequestFullState => {
                let state = self.store.read_state().await;
                Response::ok()
                    .with_state(projected(state, sender_tab))
                    .with_pattern(pattern)
            }
            Payload::ContentScriptReady => {
                if let Some(tab_id) = sender_tab {
                    self.ready_tabs.insert(tab_id);
                }
                let state = self.store.read_state().await;
                let mut response = Response::ok()
                    .with_state(projected(state, sender_tab))
                    .with_pattern(pattern);
                response.tab_id = sender_tab;
                response
            }
            Payload::ContentScriptUnload => {
                if let Some(tab_id) = sender_tab {
                    self.ready_tabs.remove(&tab_id);
                }
                Response::ok().with_pattern(pattern)
            }
            Payload::QtStateSync { .. } | Payload::SidebarUpdate { .. } => {
                Response::failure("push messages are outbound only")
            }
        }
    }

    /// Which tabs have announced a live observer.
    pub fn ready_tabs(&self) -> &HashSet<TabId> {
        &self.ready_tabs
    }

    async fn create(
        &mut self,
        draft: protocol::QuickTabDraft,
        sender_tab: Option<TabId>,
        correlation_id: &str,
    ) -> Response {
        let state = self.store.read_state().await;

        if state.all_quick_tabs.len() >= self.config.max_quick_tabs {
            return Response::failure(format!(
                "quick tab limit of {} reached",
                self.config.max_quick_tabs
            ));
        }
        if draft.url.len() > MAX_URL_LEN {
            return Response::failure(format!(
                "url is {} characters, maximum is {MAX_URL_LEN}",
                draft.url.len()
            ));
        }
        let Some(origin_tab_id) = draft.origin_tab_id.or(sender_tab) else {
            return Response::failure("origin tab unknown");
        };

        let id = match draft.id.clone() {
            Some(id) if state.find_by_id(&id).is_some() => {
                return Response::failure(format!("quick tab '{id}' already exists"));
            }
            Some(id) => id,
            None => QuickTabId::random(),
        };

        let quick_tab = draft.into_quick_tab(id.clone(), origin_tab_id, now_ms());
        if let Err(bounds) = check_quick_tab(&quick_tab) {
            return Response::failure(bounds.to_string());
        }

        let next = state.add(quick_tab, now_ms());
        match self.commit(&next, correlation_id).await {
            Ok(mut response) => {
                if response.skipped.is_none() {
                    self.fan_out(&next, correlation_id, "coordinator", vec![]).await;
                }
                response.created = Some(true);
                response.quick_tab_id = Some(id);
                response.with_pattern(Pattern::Global)
            }
            Err(response) => response,
        }
    }

    async fn close(&mut self, id: &QuickTabId, correlation_id: &str) -> Response {
        let state = self.store.read_state().await;
        if state.find_by_id(id).is_none() {
            return Response::failure(format!("unknown quick tab '{id}'"));
        }
        let next = state.remove(id, now_ms());
        match self.commit(&next, correlation_id).await {
            Ok(response) => {
                if response.skipped.is_none() {
                    self.fan_out(&next, correlation_id, "coordinator", vec![id.clone()])
                        .await;
                }
                response.with_pattern(Pattern::Global)
            }
            Err(response) => response,
        }
    }

    async fn bulk_close(
        &mut self,
        next: PoolState,
        closed: Vec<QuickTabId>,
        correlation_id: &str,
    ) -> Response {
        match self.commit(&next, correlation_id).await {
            Ok(mut response) => {
                if response.skipped.is_none() {
                    self.fan_out(&next, correlation_id, "manager", closed.clone())
                        .await;
                }
                response.closed_count = Some(closed.len());
                response.with_pattern(Pattern::Manager)
            }
            Err(response) => response,
        }
    }

    /// Local-pattern entity patch: write only, no fan-out.
    async fn apply_patch(
        &mut self,
        id: &QuickTabId,
        patch: QuickTabPatch,
        correlation_id: &str,
        pattern: Pattern,
    ) -> Response {
        let state = self.store.read_state().await;
        if state.find_by_id(id).is_none() {
            return Response::failure(format!("unknown quick tab '{id}'"));
        }
        let next = state.update(id, &patch, now_ms());
        match self.commit(&next, correlation_id).await {
            Ok(response) => response.with_pattern(pattern),
            Err(response) => response,
        }
    }

    /// Global-pattern entity patch: write, then fan out.
    async fn global_patch(
        &mut self,
        id: &QuickTabId,
        patch: QuickTabPatch,
        correlation_id: &str,
    ) -> Response {
        let state = self.store.read_state().await;
        if state.find_by_id(id).is_none() {
            return Response::failure(format!("unknown quick tab '{id}'"));
        }
        let next = state.update(id, &patch, now_ms());
        match self.commit(&next, correlation_id).await {
            Ok(response) => {
                if response.skipped.is_none() {
                    self.fan_out(&next, correlation_id, "coordinator", vec![]).await;
                }
                response.with_pattern(Pattern::Global)
            }
            Err(response) => response,
        }
    }

    /// Write S' through the store. A failed write (after recovery) aborts
    /// the operation; no broadcast happens.
    async fn commit(&self, next: &PoolState, correlation_id: &str) -> Result<Response, Response> {
        let outcome = self
            .store
            .write_state_with_validation(next, correlation_id)
            .await;
        if !outcome.success {
            let error = outcome
                .error
                .map(|error| error.to_string())
                .unwrap_or_else(|| "write failed".to_string());
            return Err(Response::failure(error));
        }
        let mut response = Response::ok();
        if outcome.skipped {
            response.skipped = Some(true);
        }
        Ok(response)
    }

    /// Broadcast the post-state to observers and notify the manager sink.
    /// Failures here are accounted and logged, never fatal and never
    /// retried: observers converge through the passive storage stream.
    async fn fan_out(
        &mut self,
        post_state: &PoolState,
        correlation_id: &str,
        source: &str,
        removed: Vec<QuickTabId>,
    ) {
        let sync = Envelope::correlated(
            Payload::QtStateSync {
                state: post_state.clone(),
                source: source.to_string(),
                removed_quick_tab_ids: removed,
            },
            correlation_id.to_string(),
            now_ms(),
        );
        let stats = self.broadcaster.broadcast(&sync).await;
        self.last_broadcast = Some(stats);

        self.notify_manager(post_state, correlation_id).await;
    }

    /// The manager sink is optional; its absence is not an error.
    async fn notify_manager(&self, post_state: &PoolState, correlation_id: &str) {
        let Some(manager) = &self.manager else {
            return;
        };
        let update = Envelope::correlated(
            Payload::SidebarUpdate {
                state: post_state.clone(),
            },
            correlation_id.to_string(),
            now_ms(),
        );
        let Ok(message) = serde_json::to_value(&update) else {
            return;
        };
        let timeout = Duration::from_millis(self.config.message_timeout_ms);
        match tokio::time::timeout(timeout, manager.send(message)).await {
            Ok(Ok(_)) => {}
            Ok(Err(error)) => tracing::debug!(%error, "manager notification failed"),
            Err(_) => tracing::debug!("manager notification timed out"),
        }
    }

    async fn handle_tab_event(&mut self, event: TabEvent) {
        match event {
            TabEvent::Activated { tab_id } => self.refresh_tab(tab_id).await,
            TabEvent::Removed {
                tab_id,
                window_closing,
            } => self.cleanup_tab(tab_id, window_closing).await,
            TabEvent::Updated {
                tab_id, changes, ..
            } => self.debouncer.coalesce(tab_id, changes),
        }
    }

    /// An activated tab gets a targeted refresh push; its observer may
    /// have slept through broadcasts.
    async fn refresh_tab(&mut self, tab_id: TabId) {
        let state = self.store.read_state().await;
        let refresh = Envelope::new(
            Payload::QtStateSync {
                state,
                source: "tab-activated".to_string(),
                removed_quick_tab_ids: vec![],
            },
            now_ms(),
        );
        if !self.broadcaster.send_to_tab(tab_id, &refresh).await {
            tracing::debug!(tab_id, "activated-tab refresh not delivered");
        }
    }

    /// A closed tab owns no entities after exactly one cleanup cycle.
    /// Window closes ride the same path; storage-level dedup absorbs any
    /// sibling cleanups without extra serialization.
    async fn cleanup_tab(&mut self, tab_id: TabId, window_closing: bool) {
        self.ready_tabs.remove(&tab_id);
        self.debouncer.forget(tab_id);

        let state = self.store.read_state().await;
        let removed: Vec<QuickTabId> = state
            .filter_by_origin_tab(tab_id)
            .map(|qt| qt.id.clone())
            .collect();
        if removed.is_empty() {
            return;
        }

        tracing::info!(
            tab_id,
            removed = removed.len(),
            window_closing,
            "removing quick tabs of closed tab"
        );
        let next = state.remove_by_origin_tab(tab_id, now_ms());
        let correlation_id = format!("tab-cleanup-{tab_id}-{}", protocol::new_correlation_id());
        match self.commit(&next, &correlation_id).await {
            Ok(_) => {
                self.fan_out(&next, &correlation_id, "tab-events-cleanup", removed)
                    .await;
            }
            Err(response) => {
                tracing::warn!(tab_id, error = ?response.error, "tab cleanup write failed");
            }
        }
    }

    /// Apply settled tab metadata to that tab's entities.
    async fn flush_tab_updates(&mut self) {
        for (tab_id, changes) in self.debouncer.take_due(Instant::now()) {
            let patch = metadata_patch(&changes);
            if patch.is_empty() {
                continue;
            }
            let state = self.store.read_state().await;
            let ids: Vec<QuickTabId> = state
                .filter_by_origin_tab(tab_id)
                .map(|qt| qt.id.clone())
                .collect();
            if ids.is_empty() {
                continue;
            }

            let mut next = state;
            for id in &ids {
                next = next.update(id, &patch, now_ms());
            }
            let correlation_id =
                format!("tab-metadata-{tab_id}-{}", protocol::new_correlation_id());
            match self.commit(&next, &correlation_id).await {
                Ok(_) => {
                    self.fan_out(&next, &correlation_id, "tab-metadata", vec![]).await;
                }
                Err(response) => {
                    tracing::warn!(tab_id, error = ?response.error, "metadata flush write failed");
                }
            }
        }
    }
}

/// Filter the pool down to one observer's domain. An unknown sender (the
/// manager, or a tab the runtime could not identify) sees the full pool.
fn projected(state: PoolState, sender_tab: Option<TabId>) -> PoolState {
    match sender_tab {
        Some(tab_id) => {
            let filtered: Vec<QuickTab> = state.filter_by_origin_tab(tab_id).cloned().collect();
            PoolState {
                all_quick_tabs: filtered,
                ..state
            }
        }
        None => state,
    }
}

/// The entity metadata that tab property changes map onto. A changed page
/// url or favicon has no entity field; the manager reads those live.
fn metadata_patch(changes: &TabChanges) -> QuickTabPatch {
    QuickTabPatch {
        title: changes.title.clone(),
        origin_container_id: changes.container_id.clone(),
        ..QuickTabPatch::default()
    }
}

async fn flush_sleep(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
