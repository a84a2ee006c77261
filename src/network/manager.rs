//! Per-session network manager
//!
//! Routes one CDP session's `Network.*` and `Fetch.*` events into the
//! request state machines, handling request creation, redirect replacement,
//! and pre-request pause records.

use super::request::NetworkRequest;
use super::storage::NetworkStorage;
use crate::cdp::types::{
    FetchAuthRequiredParams, FetchRequestPausedParams, LoadingFailedParams,
    RequestServedFromCacheParams, RequestWillBeSentExtraInfoParams, RequestWillBeSentParams,
    ResponseReceivedExtraInfoParams, ResponseReceivedParams,
};
use crate::cdp::{CdpEvent, CdpSession};
use crate::events::EventManager;
use crate::Result;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

/// Network manager for one CDP session
pub struct NetworkManager {
    session: CdpSession,
    storage: Arc<NetworkStorage>,
    event_manager: Arc<EventManager>,
}

impl std::fmt::Debug for NetworkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkManager")
            .field("session", &self.session)
            .finish()
    }
}

impl NetworkManager {
    pub fn new(
        session: CdpSession,
        storage: Arc<NetworkStorage>,
        event_manager: Arc<EventManager>,
    ) -> Arc<Self> {
        Arc::new(Self {
            session,
            storage,
            event_manager,
        })
    }

    /// Enable the CDP Network domain, plus Fetch when intercepts exist.
    pub async fn enable(&self) -> Result<()> {
        self.session
            .send_command("Network.enable", json!({}))
            .await?;
        if self.storage.has_intercepts() {
            self.enable_fetch().await?;
        }
        Ok(())
    }

    /// Enable request pausing for this session.
    pub async fn enable_fetch(&self) -> Result<()> {
        self.session
            .send_command(
                "Fetch.enable",
                json!({
                    "patterns": [{"urlPattern": "*"}],
                    "handleAuthRequests": self.storage.has_auth_intercepts(),
                }),
            )
            .await?;
        Ok(())
    }

    pub async fn disable_fetch(&self) -> Result<()> {
        self.session.send_command("Fetch.disable", json!({})).await?;
        Ok(())
    }

    /// Start consuming this session's event stream.
    pub fn start(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let mut events = self.session.events();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                manager.process_event(event);
            }
        });
    }

    /// Drop every live request when the session detaches.
    pub fn clear(&self) {
        if let Some(session_id) = self.session.session_id() {
            self.storage.clear_session(session_id);
        }
    }

    fn get_or_create(&self, request_id: &str, redirect_count: u64) -> Arc<NetworkRequest> {
        if let Some(existing) = self.storage.get_request(request_id) {
            return existing;
        }
        let request = NetworkRequest::new(
            request_id,
            redirect_count,
            self.session.clone(),
            self.storage.clone(),
            self.event_manager.clone(),
        );
        self.storage.insert_request(request.clone());
        request
    }

    /// Route one CDP event. Unparseable payloads are logged and skipped.
    pub fn process_event(&self, event: CdpEvent) {
        match event.method.as_str() {
            "Network.requestWillBeSent" => {
                let params: RequestWillBeSentParams = match serde_json::from_value(event.params) {
                    Ok(params) => params,
                    Err(e) => return warn!(error = %e, "Bad requestWillBeSent payload"),
                };
                self.on_request_will_be_sent(params);
            }
            "Network.requestWillBeSentExtraInfo" => {
                let params: RequestWillBeSentExtraInfoParams =
                    match serde_json::from_value(event.params) {
                        Ok(params) => params,
                        Err(e) => return warn!(error = %e, "Bad requestWillBeSentExtraInfo payload"),
                    };
                self.get_or_create(&params.request_id.clone(), 0)
                    .on_request_will_be_sent_extra_info(params);
            }
            "Network.responseReceived" => {
                let params: ResponseReceivedParams = match serde_json::from_value(event.params) {
                    Ok(params) => params,
                    Err(e) => return warn!(error = %e, "Bad responseReceived payload"),
                };
                self.get_or_create(&params.request_id.clone(), 0)
                    .on_response_received(params);
            }
            "Network.responseReceivedExtraInfo" => {
                let params: ResponseReceivedExtraInfoParams =
                    match serde_json::from_value(event.params) {
                        Ok(params) => params,
                        Err(e) => {
                            return warn!(error = %e, "Bad responseReceivedExtraInfo payload")
                        }
                    };
                self.get_or_create(&params.request_id.clone(), 0)
                    .on_response_received_extra_info(params);
            }
            "Network.requestServedFromCache" => {
                let params: RequestServedFromCacheParams =
                    match serde_json::from_value(event.params) {
                        Ok(params) => params,
                        Err(e) => return warn!(error = %e, "Bad requestServedFromCache payload"),
                    };
                self.get_or_create(&params.request_id, 0).on_served_from_cache();
            }
            "Network.loadingFailed" => {
                let params: LoadingFailedParams = match serde_json::from_value(event.params) {
                    Ok(params) => params,
                    Err(e) => return warn!(error = %e, "Bad loadingFailed payload"),
                };
                self.get_or_create(&params.request_id.clone(), 0)
                    .on_loading_failed(params);
            }
            "Fetch.requestPaused" => {
                let params: FetchRequestPausedParams = match serde_json::from_value(event.params) {
                    Ok(params) => params,
                    Err(e) => return warn!(error = %e, "Bad requestPaused payload"),
                };
                self.on_request_paused(params);
            }
            "Fetch.authRequired" => {
                let params: FetchAuthRequiredParams = match serde_json::from_value(event.params) {
                    Ok(params) => params,
                    Err(e) => return warn!(error = %e, "Bad authRequired payload"),
                };
                self.on_auth_required(params);
            }
            _ => {}
        }
    }

    fn on_request_will_be_sent(&self, params: RequestWillBeSentParams) {
        let request_id = params.request_id.clone();

        if let Some(existing) = self.storage.get_request(&request_id) {
            if let Some(redirect_response) = params.redirect_response.clone() {
                // The old request flushes with the 30x; a fresh instance
                // under the same id continues the chain.
                existing.flush_for_redirect(redirect_response);
                self.storage.remove_request(&request_id);
                let fresh = NetworkRequest::new(
                    &request_id,
                    existing.redirect_count() + 1,
                    self.session.clone(),
                    self.storage.clone(),
                    self.event_manager.clone(),
                );
                self.storage.insert_request(fresh.clone());
                fresh.on_request_will_be_sent(params);
                return;
            }
            existing.on_request_will_be_sent(params);
            return;
        }

        let request = self.get_or_create(&request_id, 0);
        request.on_request_will_be_sent(params);
        if let Some(paused) = self.storage.take_pre_request_pause(&request_id) {
            request.on_request_paused(paused);
        }
    }

    fn on_request_paused(&self, params: FetchRequestPausedParams) {
        let network_id = params
            .network_id
            .clone()
            .unwrap_or_else(|| params.request_id.clone());

        match self.storage.get_request(&network_id) {
            Some(request) => request.on_request_paused(params),
            None => {
                // The pause outran its requestWillBeSent; replay it when the
                // request materializes.
                debug!(network_id = %network_id, "Recording pre-request pause");
                self.storage.record_pre_request_pause(&network_id, params);
            }
        }
    }

    fn on_auth_required(&self, params: FetchAuthRequiredParams) {
        let session_id = self.session.session_id().unwrap_or_default();
        let request = self
            .storage
            .requests_for_session(session_id)
            .into_iter()
            .find(|request| request.url().as_deref() == Some(params.request.url.as_str()));

        match request {
            Some(request) => request.on_auth_required(params),
            None => debug!(url = %params.request.url, "authRequired with no matching request"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::mock::MockCdpTransport;
    use crate::context::BrowsingContextStore;
    use crate::events::queue::{EventQueue, EventSink};
    use crate::events::OutgoingMessage;
    use tokio::sync::mpsc;

    struct Fixture {
        manager: Arc<NetworkManager>,
        storage: Arc<NetworkStorage>,
        events: mpsc::UnboundedReceiver<OutgoingMessage>,
    }

    fn fixture() -> Fixture {
        let contexts = Arc::new(BrowsingContextStore::new());
        contexts.add("frame-1", None, "https://a.test/", "S1");

        let (tx, events) = mpsc::unbounded_channel();
        let sink: EventSink = Arc::new(move |message| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(message);
            })
        });
        let queue = Arc::new(EventQueue::new(sink));
        let event_manager = Arc::new(EventManager::new(contexts, queue));
        event_manager
            .subscribe(&["network".to_string()], &[], None)
            .unwrap();

        let mock = Arc::new(MockCdpTransport::new());
        let storage = Arc::new(NetworkStorage::new());
        let manager = NetworkManager::new(
            CdpSession::for_target(mock, "S1"),
            storage.clone(),
            event_manager,
        );

        Fixture {
            manager,
            storage,
            events,
        }
    }

    fn cdp_event(method: &str, params: serde_json::Value) -> CdpEvent {
        CdpEvent {
            method: method.to_string(),
            params,
            session_id: Some("S1".to_string()),
        }
    }

    fn will_be_sent(url: &str, redirect: Option<&str>) -> serde_json::Value {
        let mut params = json!({
            "requestId": "R",
            "loaderId": "L",
            "documentURL": url,
            "request": {"url": url, "method": "GET", "headers": {}},
            "wallTime": 1700000000.0,
            "frameId": "frame-1"
        });
        if let Some(location) = redirect {
            params["redirectResponse"] = json!({
                "url": location,
                "status": 302,
                "statusText": "Found",
                "headers": {"location": url}
            });
        }
        params
    }

    #[tokio::test]
    async fn redirect_recreates_request_with_incremented_count() {
        let mut fx = fixture();

        fx.manager
            .process_event(cdp_event("Network.requestWillBeSent", will_be_sent("https://a.test/old", None)));
        fx.manager.process_event(cdp_event(
            "Network.requestWillBeSentExtraInfo",
            json!({"requestId": "R", "headers": {}}),
        ));

        // First event for the original request.
        let first = fx.events.recv().await.unwrap();
        assert_eq!(first.payload["method"], "network.beforeRequestSent");
        assert_eq!(first.payload["params"]["redirectCount"], 0);

        // Redirect: same id, fresh request.
        fx.manager.process_event(cdp_event(
            "Network.requestWillBeSent",
            will_be_sent("https://a.test/new", Some("https://a.test/old")),
        ));
        fx.manager.process_event(cdp_event(
            "Network.requestWillBeSentExtraInfo",
            json!({"requestId": "R", "headers": {}}),
        ));

        // The original request flushed responseStarted + responseCompleted.
        assert_eq!(
            fx.events.recv().await.unwrap().payload["method"],
            "network.responseStarted"
        );
        assert_eq!(
            fx.events.recv().await.unwrap().payload["method"],
            "network.responseCompleted"
        );

        // And the replacement emits with redirectCount = 1.
        let replayed = fx.events.recv().await.unwrap();
        assert_eq!(replayed.payload["method"], "network.beforeRequestSent");
        assert_eq!(replayed.payload["params"]["redirectCount"], 1);
        assert_eq!(fx.storage.get_request("R").unwrap().redirect_count(), 1);
    }

    #[tokio::test]
    async fn pre_request_pause_is_replayed() {
        let mut fx = fixture();
        fx.storage
            .add_intercept(
                vec![],
                vec![super::super::storage::InterceptPhase::BeforeRequestSent],
            )
            .unwrap();

        // Pause arrives before requestWillBeSent.
        fx.manager.process_event(cdp_event(
            "Fetch.requestPaused",
            json!({
                "requestId": "F",
                "request": {"url": "https://a.test/x", "method": "GET", "headers": {}},
                "networkId": "R"
            }),
        ));
        assert!(fx.storage.get_request("R").is_none());

        fx.manager.process_event(cdp_event(
            "Network.requestWillBeSent",
            will_be_sent("https://a.test/x", None),
        ));

        let event = fx.events.recv().await.unwrap();
        assert_eq!(event.payload["method"], "network.beforeRequestSent");
        assert_eq!(event.payload["params"]["isBlocked"], true);
    }

    #[tokio::test]
    async fn session_clear_drops_requests() {
        let fx = fixture();
        fx.manager
            .process_event(cdp_event("Network.requestWillBeSent", will_be_sent("https://a.test/x", None)));
        assert!(fx.storage.get_request("R").is_some());
        fx.manager.clear();
        assert!(fx.storage.get_request("R").is_none());
    }
}
