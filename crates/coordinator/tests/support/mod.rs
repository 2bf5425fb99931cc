//! Shared wiring for end-to-end pool tests: a memory host, a coordinator
//! serving on a channel, and observers attached to page tabs.
#![allow(dead_code)]

use coordinator::{Config, Coordinator};
use host::memory::{MemoryStorage, MemoryTabs, RecorderPort};
use host::{channel_port, PortRequest, TabInfo};
use models::TabId;
use observer::{ObserverSync, Scope};
use serde_json::Value;
use std::sync::Arc;
use store::StateStore;
use tokio::sync::{mpsc, oneshot};

pub struct Harness {
    pub storage: Arc<MemoryStorage>,
    pub tabs: Arc<MemoryTabs>,
    pub manager: Arc<RecorderPort>,
    pub store: Arc<StateStore>,
    pub requests: mpsc::Sender<PortRequest>,
    stop: Option<oneshot::Sender<()>>,
    served: tokio::task::JoinHandle<()>,
}

impl Harness {
    pub async fn start() -> Self {
        Self::start_with(Config::default()).await
    }

    pub async fn start_with(config: Config) -> Self {
        ops::try_init_logging(&ops::LogArgs::default());

        let storage = Arc::new(MemoryStorage::new());
        let tabs = Arc::new(MemoryTabs::new());
        let manager = Arc::new(RecorderPort::new());
        let store = Arc::new(StateStore::new(
            storage.clone(),
            storage.clone(),
            config.store.clone(),
        ));

        let coordinator = Coordinator::new(
            store.clone(),
            tabs.clone(),
            Some(manager.clone()),
            config,
        );

        let (requests, rx) = mpsc::channel(32);
        let (stop, stop_rx) = oneshot::channel();
        let served = tokio::spawn(coordinator.serve(rx, async move {
            let _ = stop_rx.await;
        }));

        Self {
            storage,
            tabs,
            manager,
            store,
            requests,
            stop: Some(stop),
            served,
        }
    }

    /// Open an http page tab and attach a bootstrapped observer to it.
    /// Returns the observer and the raw push inbox for the tab.
    pub async fn observer_on(
        &self,
        tab_id: TabId,
    ) -> (ObserverSync, mpsc::UnboundedReceiver<Value>) {
        self.open_page(tab_id);
        let inbox = self.tabs.attach_inbox(tab_id);
        let port = channel_port(Some(tab_id), self.requests.clone());
        let mut observer = ObserverSync::new(
            Scope::OriginTab,
            Arc::new(port),
            self.storage.clone(),
            observer::Config::default(),
        );
        observer.bootstrap().await.expect("bootstrap");
        (observer, inbox)
    }

    pub fn open_page(&self, tab_id: TabId) {
        self.tabs.open_tab(TabInfo {
            id: tab_id,
            url: url::Url::parse(&format!("https://page-{tab_id}.example/")).ok(),
            title: Some(format!("Page {tab_id}")),
            favicon_url: None,
            container_id: None,
            window_id: 1,
            active: false,
        });
    }

    /// Send a raw wire value as if from the given tab, returning the raw
    /// reply.
    pub async fn send_raw(&self, sender_tab: Option<TabId>, message: Value) -> Value {
        let port = channel_port(sender_tab, self.requests.clone());
        use host::MessagePort;
        port.send(message).await.expect("coordinator reply")
    }

    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = self.served.await;
    }
}

/// A creation draft in wire form.
pub fn draft(url: &str, origin_tab_id: TabId) -> Value {
    serde_json::json!({
        "url": url,
        "originTabId": origin_tab_id,
        "position": {"x": 10, "y": 20},
        "size": {"w": 400, "h": 300},
    })
}

/// Hand-built wire envelope, for tests that control the correlation id.
pub fn wire(type_name: &str, correlation_id: &str, timestamp: i64, fields: Value) -> Value {
    let mut message = serde_json::json!({
        "type": type_name,
        "correlationId": correlation_id,
        "timestamp": timestamp,
    });
    if let (Some(target), Some(extra)) = (message.as_object_mut(), fields.as_object()) {
        for (key, value) in extra {
            target.insert(key.clone(), value.clone());
        }
    }
    message
}
