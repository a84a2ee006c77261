//! Event manager
//!
//! The bridge between domain modules producing BiDi events and the ordered
//! outgoing queue. Each event (or event future) is matched against the
//! subscription store per channel; unmatched events are dropped, and events
//! whose associated context closed before the payload resolved are dropped
//! at resolution time without disturbing queue order.

use crate::context::BrowsingContextStore;
use crate::events::names;
use crate::events::queue::EventQueue;
use crate::events::subscriptions::SubscriptionManager;
use crate::events::OutgoingMessage;
use crate::{Error, Result};
use futures::future::{FutureExt, Shared};
use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Event manager
pub struct EventManager {
    subscriptions: RwLock<SubscriptionManager>,
    contexts: Arc<BrowsingContextStore>,
    queue: Arc<EventQueue>,
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManager").finish()
    }
}

impl EventManager {
    pub fn new(contexts: Arc<BrowsingContextStore>, queue: Arc<EventQueue>) -> Self {
        Self {
            subscriptions: RwLock::new(SubscriptionManager::new(contexts.clone())),
            contexts,
            queue,
        }
    }

    /// Create a subscription. Returns its id.
    pub fn subscribe(
        &self,
        event_names: &[String],
        context_ids: &[String],
        channel: Option<&str>,
    ) -> Result<String> {
        self.subscriptions
            .write()
            .expect("subscription store poisoned")
            .subscribe(event_names, context_ids, channel)
    }

    /// Attribute-based unsubscribe.
    pub fn unsubscribe(
        &self,
        event_names: &[String],
        context_ids: &[String],
        channel: Option<&str>,
    ) -> Result<()> {
        self.subscriptions
            .write()
            .expect("subscription store poisoned")
            .unsubscribe(event_names, context_ids, channel)
    }

    /// Drop every subscription for a closed channel.
    pub fn remove_channel(&self, channel: Option<&str>) {
        self.subscriptions
            .write()
            .expect("subscription store poisoned")
            .remove_channel(channel);
    }

    /// Whether anything is subscribed to `name` scoped to `context_id`
    /// (a context id, not necessarily top-level).
    pub fn is_subscribed_to(&self, name: &str, context_id: Option<&str>) -> bool {
        let top_level = context_id.and_then(|id| self.contexts.find_top_level_context_id(id));
        self.subscriptions
            .read()
            .expect("subscription store poisoned")
            .is_subscribed_to(name, top_level.as_deref())
    }

    /// Whether any channel is subscribed to the `network` module. New CDP
    /// targets only enable the Network/Fetch domains when this holds.
    pub fn network_domain_enabled(&self) -> bool {
        self.subscriptions
            .read()
            .expect("subscription store poisoned")
            .is_module_subscribed_anywhere(names::NETWORK_MODULE)
    }

    /// Register an event whose payload is already known.
    pub fn register_event(&self, method: &str, params: Value, context_id: Option<&str>) {
        let payload: BoxFuture<'static, std::result::Result<Value, String>> =
            futures::future::ready(Ok(params)).boxed();
        self.register_payload(method, payload.shared(), context_id);
    }

    /// Register an event whose payload resolves later. The queue slot is
    /// claimed now, so delivery order follows registration order.
    pub fn register_promise_event<F>(&self, method: &str, future: F, context_id: Option<&str>)
    where
        F: Future<Output = Result<Value>> + Send + 'static,
    {
        let payload: BoxFuture<'static, std::result::Result<Value, String>> = future
            .map(|result| result.map_err(|e| e.to_string()))
            .boxed();
        self.register_payload(method, payload.shared(), context_id);
    }

    fn register_payload(
        &self,
        method: &str,
        payload: Shared<BoxFuture<'static, std::result::Result<Value, String>>>,
        context_id: Option<&str>,
    ) {
        let top_level = match context_id {
            Some(id) => match self.contexts.find_top_level_context_id(id) {
                Some(top) => Some(top),
                None => {
                    debug!(method, context = id, "Dropping event for unknown context");
                    return;
                }
            },
            None => None,
        };

        let channels = self
            .subscriptions
            .read()
            .expect("subscription store poisoned")
            .channels_subscribed_to_event(method, top_level.as_deref());
        if channels.is_empty() {
            return;
        }

        for channel in channels {
            let method = method.to_string();
            let payload = payload.clone();
            let context = top_level.clone();
            let contexts = self.contexts.clone();
            let tag = format!("{}[{}]", method, channel.as_deref().unwrap_or(""));
            self.queue.add(
                async move {
                    let params = payload
                        .await
                        .map_err(Error::Unknown)?;
                    // The context may have closed while the payload resolved.
                    if let Some(id) = &context {
                        if !contexts.contains(id) {
                            return Err(Error::unknown(format!(
                                "context {} closed before event resolved",
                                id
                            )));
                        }
                    }
                    Ok(OutgoingMessage {
                        payload: json!({
                            "type": "event",
                            "method": method,
                            "params": params,
                        }),
                        channel,
                        context,
                    })
                },
                tag,
            );
        }
    }
}
