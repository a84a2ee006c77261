//! Channel proxy poll loops
//!
//! For every channel a preload script declares, the host polls the in-realm
//! queue's `getMessage` via `Runtime.callFunctionOn(awaitPromise: true)` and
//! re-emits each message as a `script.message` event. Pollers are cancellable
//! tasks registered per realm; realm destruction aborts them.

use crate::cdp::CdpSession;
use crate::events::EventManager;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

/// Poll tasks keyed by realm id
#[derive(Default)]
pub struct ChannelPollerRegistry {
    tasks: Mutex<HashMap<String, Vec<JoinHandle<()>>>>,
}

impl std::fmt::Debug for ChannelPollerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelPollerRegistry").finish()
    }
}

impl ChannelPollerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start polling one channel queue inside a realm.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn_poller(
        &self,
        session: CdpSession,
        event_manager: Arc<EventManager>,
        realm_id: &str,
        execution_context_id: i64,
        context_id: Option<String>,
        channel_key: &str,
        channel_name: &str,
    ) {
        let realm = realm_id.to_string();
        let key = channel_key.to_string();
        let name = channel_name.to_string();

        let handle = tokio::spawn(async move {
            loop {
                let result = session
                    .send_command(
                        "Runtime.callFunctionOn",
                        json!({
                            "functionDeclaration":
                                "(key) => window.__bidiChannels[key].getMessage()",
                            "arguments": [{"value": key}],
                            "executionContextId": execution_context_id,
                            "awaitPromise": true,
                            "returnByValue": true,
                        }),
                    )
                    .await;

                let value = match result {
                    Ok(value) => value,
                    Err(e) => {
                        // The realm (or its target) is gone; the poller dies
                        // with it.
                        debug!(realm = %realm, error = %e, "Channel poll ended");
                        break;
                    }
                };
                if value.get("exceptionDetails").is_some() || value.get("result").is_none() {
                    debug!(realm = %realm, "Channel queue unavailable");
                    break;
                }

                let data = value
                    .get("result")
                    .and_then(|r| r.get("value"))
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);

                let mut source = json!({"realm": realm});
                if let Some(context) = &context_id {
                    source["context"] = json!(context);
                }
                event_manager.register_event(
                    "script.message",
                    json!({
                        "channel": name,
                        "data": data,
                        "source": source,
                    }),
                    context_id.as_deref(),
                );
            }
        });

        self.tasks
            .lock()
            .expect("poller registry poisoned")
            .entry(realm_id.to_string())
            .or_default()
            .push(handle);
    }

    /// Abort every poller attached to a destroyed realm.
    pub fn cancel_realm(&self, realm_id: &str) {
        let handles = self
            .tasks
            .lock()
            .expect("poller registry poisoned")
            .remove(realm_id);
        if let Some(handles) = handles {
            for handle in handles {
                handle.abort();
            }
        }
    }

    /// Abort everything (target teardown).
    pub fn cancel_all(&self) {
        let mut map = self.tasks.lock().expect("poller registry poisoned");
        for (_, handles) in map.drain() {
            for handle in handles {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::mock::MockCdpTransport;
    use crate::cdp::CdpTransport;
    use crate::context::BrowsingContextStore;
    use crate::events::queue::{EventQueue, EventSink};
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn poller_emits_script_message_then_dies_on_error() {
        let contexts = Arc::new(BrowsingContextStore::new());
        contexts.add("top", None, "https://a.test/", "S1");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink: EventSink = Arc::new(move |message| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(message);
            })
        });
        let queue = Arc::new(EventQueue::new(sink));
        let event_manager = Arc::new(EventManager::new(contexts, queue));
        event_manager
            .subscribe(&["script.message".to_string()], &[], None)
            .unwrap();

        let mock = Arc::new(MockCdpTransport::new());
        // First poll resolves one message; the unscripted second poll gets an
        // empty result and the third errors out after close().
        mock.respond_with(
            "Runtime.callFunctionOn",
            Ok(json!({"result": {"type": "string", "value": "ping"}})),
        );

        let registry = ChannelPollerRegistry::new();
        registry.spawn_poller(
            CdpSession::for_target(mock.clone(), "S1"),
            event_manager,
            "realm-1",
            5,
            Some("top".to_string()),
            "script:chan",
            "chan",
        );

        let message = rx.recv().await.unwrap();
        assert_eq!(message.payload["method"], "script.message");
        assert_eq!(message.payload["params"]["channel"], "chan");
        assert_eq!(message.payload["params"]["data"], "ping");

        mock.close();
        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.cancel_realm("realm-1");
    }
}
