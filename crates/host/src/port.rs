use crate::HostError;
use models::TabId;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

/// A point-to-point message channel to a single peer, with replies.
/// Observers hold one aimed at the coordinator; the coordinator holds an
/// optional one aimed at the manager panel.
#[async_trait::async_trait]
pub trait MessagePort: Send + Sync + 'static {
    async fn send(&self, message: Value) -> Result<Value, HostError>;
}

/// One inbound request on the coordinator's receiving end. The host runtime
/// stamps the sender's tab identity; message payloads never carry it.
#[derive(Debug)]
pub struct PortRequest {
    pub message: Value,
    pub sender_tab: Option<TabId>,
    pub reply: oneshot::Sender<Value>,
}

/// The in-process transport: an mpsc-backed port pair.
#[derive(Clone)]
pub struct ChannelPort {
    sender_tab: Option<TabId>,
    tx: mpsc::Sender<PortRequest>,
}

/// Build a sending port for one peer. `sender_tab` is the tab identity the
/// runtime attributes to this peer, if it lives in a page.
pub fn channel_port(sender_tab: Option<TabId>, tx: mpsc::Sender<PortRequest>) -> ChannelPort {
    ChannelPort { sender_tab, tx }
}

#[async_trait::async_trait]
impl MessagePort for ChannelPort {
    async fn send(&self, message: Value) -> Result<Value, HostError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PortRequest {
                message,
                sender_tab: self.sender_tab,
                reply: reply_tx,
            })
            .await
            .map_err(|_| HostError::Disconnected)?;

        reply_rx.await.map_err(|_| HostError::Disconnected)
    }
}
