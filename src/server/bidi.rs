//! BiDi server core
//!
//! One `BidiServer` per client connection: it owns the event queue, the
//! per-connection stores, and the command processor, and binds them so both
//! command responses and subscription events drain through the queue in
//! registration order.

use crate::browser::BrowserFactory;
use crate::commands::CommandProcessor;
use crate::config::Config;
use crate::context::{BrowsingContextStore, RealmStore};
use crate::events::queue::EventSink;
use crate::events::{EventManager, EventQueue};
use crate::network::NetworkStorage;
use crate::script::PreloadScriptStore;
use crate::target::SharedStores;
use crate::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Per-connection BiDi server
pub struct BidiServer {
    queue: Arc<EventQueue>,
    processor: Arc<CommandProcessor>,
}

impl std::fmt::Debug for BidiServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BidiServer").finish()
    }
}

impl BidiServer {
    /// Build the pipeline for one connection. Frames ready for the socket
    /// arrive on the returned receiver, channel already attached.
    pub fn new(
        config: Config,
        factory: BrowserFactory,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Value>) {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel::<Value>();

        let sink: EventSink = Arc::new(move |message| {
            let tx = outgoing_tx.clone();
            Box::pin(async move {
                let mut payload = message.payload;
                // The channel is attached verbatim just before transport.
                if let Some(channel) = message.channel {
                    payload["channel"] = json!(channel);
                }
                let _ = tx.send(payload);
            })
        });

        let queue = Arc::new(EventQueue::new(sink));
        let contexts = Arc::new(BrowsingContextStore::new());
        let events = Arc::new(EventManager::new(contexts.clone(), queue.clone()));
        let stores = SharedStores {
            contexts,
            realms: Arc::new(RealmStore::new()),
            preload: Arc::new(PreloadScriptStore::new()),
            network: Arc::new(NetworkStorage::new()),
            events,
        };

        let processor = Arc::new(CommandProcessor::new(config, factory, stores));
        (
            Arc::new(Self { queue, processor }),
            outgoing_rx,
        )
    }

    /// Bind a pre-minted session id (HTTP session-creation path).
    pub async fn associate_session(&self, session_id: &str) -> Result<()> {
        self.processor.associate_session(session_id).await
    }

    /// Handle one text frame: exactly one response goes through the queue.
    pub async fn handle_text(&self, raw: &str) {
        let response = self.processor.process_raw(raw).await;
        self.queue.add_ready(response, "command-response");
    }

    /// Handle a non-text frame.
    pub fn handle_non_text(&self) {
        self.queue
            .add_ready(self.processor.invalid_frame_response(), "invalid-frame");
    }

    /// Tear down connection resources (browser included).
    pub async fn close(&self) {
        self.processor.teardown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::transport_factory;
    use crate::cdp::mock::MockCdpTransport;
    use std::time::Duration;

    fn server() -> (Arc<BidiServer>, mpsc::UnboundedReceiver<Value>) {
        let mock = Arc::new(MockCdpTransport::new());
        let transport: Arc<dyn crate::cdp::CdpTransport> = mock;
        BidiServer::new(Config::default(), transport_factory(transport))
    }

    #[tokio::test]
    async fn responses_flow_through_the_queue() {
        let (server, mut rx) = server();
        server
            .handle_text(r#"{"id": 1, "method": "session.status", "params": {}}"#)
            .await;

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame["id"], 1);
        assert_eq!(frame["type"], "success");
        assert_eq!(frame["result"]["ready"], true);
    }

    #[tokio::test]
    async fn channel_is_attached_verbatim() {
        let (server, mut rx) = server();
        server
            .handle_text(r#"{"id": 1, "method": "session.status", "params": {}, "channel": "c9"}"#)
            .await;
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame["channel"], "c9");
    }

    #[tokio::test]
    async fn non_text_frames_get_error_responses() {
        let (server, mut rx) = server();
        server.handle_non_text();
        let frame = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame["type"], "error");
        assert_eq!(frame["error"], "invalid argument");
    }
}
