//! CDP target wrapper and target registry
//!
//! One `CdpTarget` per CDP session. Creation runs the domain-enabling
//! sequence, installs preload scripts, and releases the debugger; the
//! `unblocked` latch serializes every other accessor behind that sequence.
//! The registry listens for `Target.attachedToTarget` / `detachedFromTarget`
//! on the shared connection and keeps the stores in step.

use crate::cdp::types::{
    AttachedToTargetParams, ConsoleApiCalledParams, DetachedFromTargetParams,
    ExecutionContextCreatedParams, ExecutionContextDestroyedParams, LifecycleEventParams,
    NavigatedWithinDocumentParams,
};
use crate::cdp::{CdpEvent, CdpSession, CdpTransport};
use crate::context::{BrowsingContextStore, LifecycleState, RealmStore, RealmType};
use crate::events::EventManager;
use crate::network::{NetworkManager, NetworkStorage};
use crate::script::{ChannelPollerRegistry, PreloadScriptStore};
use crate::{Error, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// The per-connection stores every target shares
#[derive(Clone)]
pub struct SharedStores {
    pub contexts: Arc<BrowsingContextStore>,
    pub realms: Arc<RealmStore>,
    pub preload: Arc<PreloadScriptStore>,
    pub network: Arc<NetworkStorage>,
    pub events: Arc<EventManager>,
}

impl std::fmt::Debug for SharedStores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStores").finish()
    }
}

/// One attached CDP target
pub struct CdpTarget {
    target_id: String,
    target_type: String,
    session: CdpSession,
    stores: SharedStores,
    network_manager: Mutex<Option<Arc<NetworkManager>>>,
    pollers: ChannelPollerRegistry,
    unblocked_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for CdpTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdpTarget")
            .field("target_id", &self.target_id)
            .field("type", &self.target_type)
            .finish()
    }
}

impl CdpTarget {
    /// Attach a new target: wire event handling, run the init sequence, and
    /// release the debugger. Close-errors mid-init are swallowed (the target
    /// detached first); anything else propagates.
    pub async fn create(
        target_id: &str,
        target_type: &str,
        parent_context_id: Option<&str>,
        session: CdpSession,
        stores: SharedStores,
    ) -> Result<Arc<Self>> {
        let (unblocked_tx, _) = watch::channel(false);
        let target = Arc::new(Self {
            target_id: target_id.to_string(),
            target_type: target_type.to_string(),
            session,
            stores,
            network_manager: Mutex::new(None),
            pollers: ChannelPollerRegistry::new(),
            unblocked_tx,
        });

        target.spawn_event_loop();
        target.spawn_cdp_mirror();

        match target.initialize(parent_context_id).await {
            Ok(()) => {}
            Err(e) if e.is_close_error() => {
                debug!(target = %target.target_id, error = %e, "Target detached during init");
            }
            Err(e) => return Err(e),
        }

        let _ = target.unblocked_tx.send(true);
        Ok(target)
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn session(&self) -> &CdpSession {
        &self.session
    }

    pub fn cdp_session_id(&self) -> &str {
        self.session.session_id().unwrap_or_default()
    }

    pub fn network_manager(&self) -> Option<Arc<NetworkManager>> {
        self.network_manager
            .lock()
            .expect("network manager slot poisoned")
            .clone()
    }

    /// Await the end of the init sequence.
    pub async fn wait_unblocked(&self) {
        let mut rx = self.unblocked_tx.subscribe();
        let _ = rx.wait_for(|unblocked| *unblocked).await;
    }

    /// Make sure this target pauses matching requests. Creates and enables
    /// the network manager on demand (intercepts can precede subscriptions).
    pub async fn ensure_fetch_enabled(&self) -> Result<()> {
        let manager = self.ensure_network_manager();
        manager.enable_fetch().await
    }

    fn ensure_network_manager(&self) -> Arc<NetworkManager> {
        let mut slot = self
            .network_manager
            .lock()
            .expect("network manager slot poisoned");
        if let Some(manager) = slot.as_ref() {
            return manager.clone();
        }
        let manager = NetworkManager::new(
            self.session.clone(),
            self.stores.network.clone(),
            self.stores.events.clone(),
        );
        manager.start();
        *slot = Some(manager.clone());
        manager
    }

    async fn initialize(&self, parent_context_id: Option<&str>) -> Result<()> {
        // 1. Network domain, only when someone is listening.
        if self.stores.events.network_domain_enabled() {
            let manager = self.ensure_network_manager();
            manager.enable().await?;
        }

        // 2. Core domains, in order, each awaited.
        self.session.send_command("Runtime.enable", json!({})).await?;
        self.session.send_command("Page.enable", json!({})).await?;
        self.session
            .send_command("Page.setLifecycleEventsEnabled", json!({"enabled": true}))
            .await?;
        self.session
            .send_command(
                "Target.setAutoAttach",
                json!({
                    "autoAttach": true,
                    "waitForDebuggerOnStart": true,
                    "flatten": true,
                }),
            )
            .await?;

        // 3. Preload scripts in scope.
        for script in self.stores.preload.scripts_for_target(parent_context_id) {
            let mut params = json!({
                "source": script.wrapped_source(),
                "runImmediately": true,
            });
            if let Some(sandbox) = &script.sandbox {
                params["worldName"] = json!(sandbox);
            }
            let result = self
                .session
                .send_command("Page.addScriptToEvaluateOnNewDocument", params)
                .await?;
            if let Some(cdp_id) = result.get("identifier").and_then(Value::as_str) {
                self.stores
                    .preload
                    .record_cdp_id(&script.id, self.cdp_session_id(), cdp_id);
            }
        }

        // 4. Let the page run.
        self.session
            .send_command("Runtime.runIfWaitingForDebugger", json!({}))
            .await?;
        Ok(())
    }

    /// Re-emit the raw session stream as `cdp.<method>` events.
    fn spawn_cdp_mirror(self: &Arc<Self>) {
        let events = self.stores.events.clone();
        let session_id = self.cdp_session_id().to_string();
        let mut stream = self.session.events();
        tokio::spawn(async move {
            while let Some(event) = stream.recv().await {
                events.register_event(
                    &format!("cdp.{}", event.method),
                    json!({
                        "event": event.method,
                        "params": event.params,
                        "session": session_id,
                    }),
                    None,
                );
            }
        });
    }

    fn spawn_event_loop(self: &Arc<Self>) {
        let target = Arc::clone(self);
        let mut stream = self.session.events();
        tokio::spawn(async move {
            while let Some(event) = stream.recv().await {
                target.handle_event(event);
            }
        });
    }

    fn handle_event(self: &Arc<Self>, event: CdpEvent) {
        match event.method.as_str() {
            "Runtime.executionContextCreated" => {
                if let Ok(params) =
                    serde_json::from_value::<ExecutionContextCreatedParams>(event.params)
                {
                    self.on_execution_context_created(params);
                }
            }
            "Runtime.executionContextDestroyed" => {
                if let Ok(params) =
                    serde_json::from_value::<ExecutionContextDestroyedParams>(event.params)
                {
                    self.on_execution_context_destroyed(params.execution_context_id);
                }
            }
            "Runtime.executionContextsCleared" => {
                for realm in self.stores.realms.remove_by_session(self.cdp_session_id()) {
                    self.pollers.cancel_realm(&realm.id);
                    self.emit_realm_destroyed(&realm.id);
                }
            }
            "Runtime.consoleAPICalled" => {
                if let Ok(params) = serde_json::from_value::<ConsoleApiCalledParams>(event.params)
                {
                    self.on_console_api_called(params);
                }
            }
            "Runtime.exceptionThrown" => {
                self.on_exception_thrown(event.params);
            }
            "Page.lifecycleEvent" => {
                if let Ok(params) = serde_json::from_value::<LifecycleEventParams>(event.params) {
                    self.on_lifecycle_event(params);
                }
            }
            "Page.frameNavigated" => {
                if let Ok(params) = serde_json::from_value::<crate::cdp::types::FrameNavigatedParams>(
                    event.params,
                ) {
                    let frame = params.frame;
                    self.stores.contexts.set_url(&frame.id, &frame.url);
                    self.stores.contexts.set_loader(&frame.id, &frame.loader_id);
                    self.stores.events.register_event(
                        "browsingContext.navigationStarted",
                        json!({
                            "context": frame.id,
                            "navigation": frame.loader_id,
                            "timestamp": chrono::Utc::now().timestamp_millis(),
                            "url": frame.url,
                        }),
                        Some(&frame.id),
                    );
                }
            }
            "Page.navigatedWithinDocument" => {
                if let Ok(params) =
                    serde_json::from_value::<NavigatedWithinDocumentParams>(event.params)
                {
                    self.stores.contexts.set_url(&params.frame_id, &params.url);
                    self.stores.events.register_event(
                        "browsingContext.fragmentNavigated",
                        json!({
                            "context": params.frame_id,
                            "navigation": Value::Null,
                            "timestamp": chrono::Utc::now().timestamp_millis(),
                            "url": params.url,
                        }),
                        Some(&params.frame_id),
                    );
                }
            }
            _ => {}
        }
    }

    fn realm_type_for_target(&self) -> RealmType {
        match self.target_type.as_str() {
            "worker" | "dedicated_worker" => RealmType::DedicatedWorker,
            "shared_worker" => RealmType::SharedWorker,
            "service_worker" => RealmType::ServiceWorker,
            _ => RealmType::Window,
        }
    }

    fn on_execution_context_created(self: &Arc<Self>, params: ExecutionContextCreatedParams) {
        let context = params.context;
        let aux = context.aux_data.clone().unwrap_or(Value::Null);
        let frame_id = aux
            .get("frameId")
            .and_then(Value::as_str)
            .map(str::to_string);
        let is_default = aux.get("isDefault").and_then(Value::as_bool).unwrap_or(true);

        let realm_type = self.realm_type_for_target();
        let sandbox = if realm_type == RealmType::Window && !is_default {
            Some(context.name.clone())
        } else {
            None
        };
        let associated = frame_id.clone().into_iter().collect();

        let realm = self.stores.realms.add(
            realm_type,
            self.cdp_session_id(),
            context.id,
            &context.origin,
            sandbox.clone(),
            associated,
        );

        self.stores.events.register_event(
            "script.realmCreated",
            realm.to_json(),
            frame_id.as_deref(),
        );

        // Host side of preload channels: one poller per declared channel.
        if realm_type == RealmType::Window {
            let scope = frame_id
                .as_deref()
                .and_then(|id| self.stores.contexts.find_top_level_context_id(id));
            for script in self.stores.preload.scripts_for_target(scope.as_deref()) {
                if script.sandbox != sandbox {
                    continue;
                }
                for channel in &script.channels {
                    self.pollers.spawn_poller(
                        self.session.clone(),
                        self.stores.events.clone(),
                        &realm.id,
                        context.id,
                        frame_id.clone(),
                        &script.channel_key(channel),
                        &channel.channel,
                    );
                }
            }
        }
    }

    fn on_execution_context_destroyed(&self, execution_context_id: i64) {
        if let Some(realm) = self
            .stores
            .realms
            .remove_by_execution_context(self.cdp_session_id(), execution_context_id)
        {
            self.pollers.cancel_realm(&realm.id);
            self.emit_realm_destroyed(&realm.id);
        }
    }

    fn emit_realm_destroyed(&self, realm_id: &str) {
        self.stores.events.register_event(
            "script.realmDestroyed",
            json!({"realm": realm_id}),
            None,
        );
    }

    fn on_console_api_called(&self, params: ConsoleApiCalledParams) {
        let realm = self.stores.realms.find_realm(&crate::context::RealmFilter {
            cdp_session_id: Some(self.cdp_session_id().to_string()),
            execution_context_id: Some(params.execution_context_id),
            ..Default::default()
        });
        let context = realm
            .as_ref()
            .and_then(|realm| realm.associated_contexts.first().cloned());

        let level = match params.call_type.as_str() {
            "error" | "assert" => "error",
            "warning" => "warn",
            "debug" => "debug",
            _ => "info",
        };
        let text = params
            .args
            .iter()
            .map(|arg| {
                arg.get("value")
                    .map(|value| match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .or_else(|| {
                        arg.get("description")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                    })
                    .unwrap_or_default()
            })
            .collect::<Vec<_>>()
            .join(" ");

        let mut source = json!({});
        if let Some(realm) = &realm {
            source["realm"] = json!(realm.id);
        }
        if let Some(context_id) = &context {
            source["context"] = json!(context_id);
        }

        self.stores.events.register_event(
            "log.entryAdded",
            json!({
                "type": "console",
                "level": level,
                "method": params.call_type,
                "text": text,
                "timestamp": params.timestamp as i64,
                "args": params.args,
                "source": source,
            }),
            context.as_deref(),
        );
    }

    fn on_exception_thrown(&self, params: Value) {
        let text = params
            .get("exceptionDetails")
            .and_then(|details| details.get("text"))
            .and_then(Value::as_str)
            .unwrap_or("Uncaught exception")
            .to_string();
        let timestamp = params
            .get("timestamp")
            .and_then(Value::as_f64)
            .unwrap_or_default() as i64;

        self.stores.events.register_event(
            "log.entryAdded",
            json!({
                "type": "javascript",
                "level": "error",
                "text": text,
                "timestamp": timestamp,
                "source": {},
            }),
            None,
        );
    }

    /// Target teardown: cancel pollers and sweep per-session state.
    pub fn detach(&self) {
        self.pollers.cancel_all();
        let session_id = self.cdp_session_id().to_string();
        for realm in self.stores.realms.remove_by_session(&session_id) {
            self.emit_realm_destroyed(&realm.id);
        }
        self.stores.network.clear_session(&session_id);
        self.stores.preload.forget_session(&session_id);
    }
}

/// Registry of attached targets, keyed by CDP session id
pub struct TargetRegistry {
    transport: Arc<dyn CdpTransport>,
    stores: SharedStores,
    targets: RwLock<HashMap<String, Arc<CdpTarget>>>,
}

impl std::fmt::Debug for TargetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetRegistry").finish()
    }
}

impl TargetRegistry {
    pub fn new(transport: Arc<dyn CdpTransport>, stores: SharedStores) -> Arc<Self> {
        Arc::new(Self {
            transport,
            stores,
            targets: RwLock::new(HashMap::new()),
        })
    }

    pub fn targets(&self) -> Vec<Arc<CdpTarget>> {
        self.targets
            .read()
            .expect("target registry poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn get_by_session(&self, session_id: &str) -> Option<Arc<CdpTarget>> {
        self.targets
            .read()
            .expect("target registry poisoned")
            .get(session_id)
            .cloned()
    }

    /// The target driving a browsing context.
    pub fn target_for_context(&self, context_id: &str) -> Result<Arc<CdpTarget>> {
        let context = self
            .stores
            .contexts
            .get(context_id)
            .ok_or_else(|| Error::no_such_frame(context_id))?;
        self.get_by_session(&context.cdp_session_id)
            .ok_or_else(|| Error::no_such_frame(context_id))
    }

    /// Begin auto-attaching: listen for attach/detach on the browser
    /// connection, then ask it to attach everything that exists.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let registry = Arc::clone(self);
        let mut events = self.transport.wildcard_listener();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event.method.as_str() {
                    "Target.attachedToTarget" => {
                        if let Ok(params) =
                            serde_json::from_value::<AttachedToTargetParams>(event.params)
                        {
                            let registry = Arc::clone(&registry);
                            tokio::spawn(async move {
                                registry.on_attached(params).await;
                            });
                        }
                    }
                    "Target.detachedFromTarget" => {
                        if let Ok(params) =
                            serde_json::from_value::<DetachedFromTargetParams>(event.params)
                        {
                            registry.on_detached(&params.session_id);
                        }
                    }
                    _ => {}
                }
            }
        });

        let browser = CdpSession::browser(self.transport.clone());
        browser
            .send_command(
                "Target.setAutoAttach",
                json!({
                    "autoAttach": true,
                    "waitForDebuggerOnStart": true,
                    "flatten": true,
                }),
            )
            .await?;
        Ok(())
    }

    async fn on_attached(self: &Arc<Self>, params: AttachedToTargetParams) {
        let info = &params.target_info;
        let eligible = matches!(
            info.target_type.as_str(),
            "page" | "iframe" | "worker" | "dedicated_worker" | "shared_worker" | "service_worker"
        );
        if !eligible {
            return;
        }

        info!(target = %info.target_id, kind = %info.target_type, "Target attached");

        let parent_context = if matches!(info.target_type.as_str(), "page" | "iframe") {
            // Lazily created browsing context; iframes hang off their opener
            // once frameAttached wires the parent link.
            let parent = info.opener_id.clone();
            self.stores.contexts.add(
                &info.target_id,
                parent.as_deref(),
                &info.url,
                &params.session_id,
            );
            let top_level = self.stores.contexts.find_top_level_context_id(&info.target_id);
            self.stores.events.register_event(
                "browsingContext.contextCreated",
                json!({
                    "context": info.target_id,
                    "parent": parent,
                    "url": info.url,
                    "children": [],
                }),
                Some(&info.target_id),
            );
            top_level
        } else {
            None
        };

        let session = CdpSession::for_target(self.transport.clone(), params.session_id.clone());
        match CdpTarget::create(
            &info.target_id,
            &info.target_type,
            parent_context.as_deref(),
            session,
            self.stores.clone(),
        )
        .await
        {
            Ok(target) => {
                self.targets
                    .write()
                    .expect("target registry poisoned")
                    .insert(params.session_id.clone(), target);
            }
            Err(e) => warn!(target = %info.target_id, error = %e, "Target init failed"),
        }
    }

    fn on_detached(&self, session_id: &str) {
        let target = self
            .targets
            .write()
            .expect("target registry poisoned")
            .remove(session_id);

        if let Some(target) = target {
            info!(target = %target.target_id(), "Target detached");
            target.detach();
        }

        // Destruction cascades to child contexts; their sessions detach on
        // their own.
        for context in self.stores.contexts.by_session(session_id) {
            for removed in self.stores.contexts.remove(&context.id) {
                self.stores.events.register_event(
                    "browsingContext.contextDestroyed",
                    json!({
                        "context": removed,
                        "url": context.url,
                        "children": [],
                    }),
                    None,
                );
            }
        }
    }

}

impl CdpTarget {
    fn on_lifecycle_event(&self, params: LifecycleEventParams) {
        let (method, state) = match params.name.as_str() {
            "DOMContentLoaded" => (
                "browsingContext.domContentLoaded",
                LifecycleState::DomContentLoaded,
            ),
            "load" => ("browsingContext.load", LifecycleState::Loaded),
            _ => return,
        };
        self.stores.contexts.set_lifecycle(&params.frame_id, state);
        let url = self
            .stores
            .contexts
            .get(&params.frame_id)
            .map(|ctx| ctx.url)
            .unwrap_or_default();
        self.stores.events.register_event(
            method,
            json!({
                "context": params.frame_id,
                "navigation": params.loader_id,
                "timestamp": chrono::Utc::now().timestamp_millis(),
                "url": url,
            }),
            Some(&params.frame_id),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::mock::MockCdpTransport;
    use crate::events::queue::{EventQueue, EventSink};
    use crate::events::OutgoingMessage;
    use tokio::sync::mpsc;

    fn stores() -> (SharedStores, mpsc::UnboundedReceiver<OutgoingMessage>) {
        let contexts = Arc::new(BrowsingContextStore::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let sink: EventSink = Arc::new(move |message| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(message);
            })
        });
        let queue = Arc::new(EventQueue::new(sink));
        let events = Arc::new(EventManager::new(contexts.clone(), queue));
        (
            SharedStores {
                contexts,
                realms: Arc::new(RealmStore::new()),
                preload: Arc::new(PreloadScriptStore::new()),
                network: Arc::new(NetworkStorage::new()),
                events,
            },
            rx,
        )
    }

    #[tokio::test]
    async fn init_sequence_runs_in_order() {
        let (stores, _rx) = stores();
        let mock = Arc::new(MockCdpTransport::new());
        let session = CdpSession::for_target(mock.clone(), "S1");

        let target = CdpTarget::create("T1", "page", None, session, stores)
            .await
            .unwrap();
        target.wait_unblocked().await;

        let methods = mock.sent_methods();
        let expected = [
            "Runtime.enable",
            "Page.enable",
            "Page.setLifecycleEventsEnabled",
            "Target.setAutoAttach",
            "Runtime.runIfWaitingForDebugger",
        ];
        let positions: Vec<usize> = expected
            .iter()
            .map(|method| {
                methods
                    .iter()
                    .position(|m| m == method)
                    .unwrap_or_else(|| panic!("{} not sent", method))
            })
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        // Nobody subscribed to network: the Network domain stays off.
        assert!(!methods.contains(&"Network.enable".to_string()));
    }

    #[tokio::test]
    async fn network_domain_enabled_when_subscribed() {
        let (stores, _rx) = stores();
        stores
            .events
            .subscribe(&["network".to_string()], &[], None)
            .unwrap();
        let mock = Arc::new(MockCdpTransport::new());
        let session = CdpSession::for_target(mock.clone(), "S1");

        let target = CdpTarget::create("T1", "page", None, session, stores)
            .await
            .unwrap();
        target.wait_unblocked().await;

        let methods = mock.sent_methods();
        assert_eq!(methods.first().map(String::as_str), Some("Network.enable"));
    }

    #[tokio::test]
    async fn close_error_during_init_is_swallowed() {
        let (stores, _rx) = stores();
        let mock = Arc::new(MockCdpTransport::new());
        mock.respond_with(
            "Page.enable",
            Err(Error::cdp(-32001, "Session with given id not found")),
        );
        let session = CdpSession::for_target(mock.clone(), "S1");

        let target = CdpTarget::create("T1", "page", None, session, stores).await;
        assert!(target.is_ok());
        target.unwrap().wait_unblocked().await;
    }

    #[tokio::test]
    async fn non_close_error_during_init_propagates() {
        let (stores, _rx) = stores();
        let mock = Arc::new(MockCdpTransport::new());
        mock.respond_with("Page.enable", Err(Error::cdp(-32000, "Internal error")));
        let session = CdpSession::for_target(mock.clone(), "S1");

        let result = CdpTarget::create("T1", "page", None, session, stores).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn preload_scripts_install_with_sandbox() {
        let (stores, _rx) = stores();
        stores.preload.add(
            "() => {}",
            Some("quiet".to_string()),
            None,
            vec![],
        );
        let mock = Arc::new(MockCdpTransport::new());
        mock.respond_with(
            "Page.addScriptToEvaluateOnNewDocument",
            Ok(json!({"identifier": "cdp-script-1"})),
        );
        let session = CdpSession::for_target(mock.clone(), "S1");

        CdpTarget::create("T1", "page", None, session, stores.clone())
            .await
            .unwrap();

        let sent = mock.sent();
        let install = sent
            .iter()
            .find(|c| c.method == "Page.addScriptToEvaluateOnNewDocument")
            .unwrap();
        assert_eq!(install.params["worldName"], "quiet");
        assert_eq!(install.params["runImmediately"], true);

        let scripts = stores.preload.scripts_for_target(None);
        assert_eq!(
            scripts[0].cdp_ids,
            vec![("S1".to_string(), "cdp-script-1".to_string())]
        );
    }

    #[tokio::test]
    async fn realm_lifecycle_follows_execution_contexts() {
        let (stores, mut rx) = stores();
        stores.contexts.add("T1", None, "https://a.test/", "S1");
        stores
            .events
            .subscribe(&["script".to_string()], &[], None)
            .unwrap();

        let mock = Arc::new(MockCdpTransport::new());
        let session = CdpSession::for_target(mock.clone(), "S1");
        let target = CdpTarget::create("T1", "page", None, session, stores.clone())
            .await
            .unwrap();
        target.wait_unblocked().await;

        mock.emit(
            "Runtime.executionContextCreated",
            json!({
                "context": {
                    "id": 3,
                    "origin": "https://a.test",
                    "name": "",
                    "auxData": {"frameId": "T1", "isDefault": true}
                }
            }),
            Some("S1"),
        );

        let created = rx.recv().await.unwrap();
        assert_eq!(created.payload["method"], "script.realmCreated");
        let realm_id = created.payload["params"]["realm"].as_str().unwrap().to_string();
        assert!(stores.realms.get(&realm_id).is_some());

        mock.emit(
            "Runtime.executionContextDestroyed",
            json!({"executionContextId": 3}),
            Some("S1"),
        );
        let destroyed = rx.recv().await.unwrap();
        assert_eq!(destroyed.payload["method"], "script.realmDestroyed");
        assert_eq!(destroyed.payload["params"]["realm"], realm_id.as_str());
        assert!(stores.realms.get(&realm_id).is_none());
    }

    #[tokio::test]
    async fn cdp_mirror_reemits_raw_events() {
        let (stores, mut rx) = stores();
        stores
            .events
            .subscribe(&["cdp".to_string()], &[], Some("raw"))
            .unwrap();

        let mock = Arc::new(MockCdpTransport::new());
        let session = CdpSession::for_target(mock.clone(), "S1");
        let target = CdpTarget::create("T1", "page", None, session, stores)
            .await
            .unwrap();
        target.wait_unblocked().await;

        mock.emit("Animation.animationCreated", json!({"id": "a"}), Some("S1"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.payload["method"], "cdp.Animation.animationCreated");
        assert_eq!(event.payload["params"]["event"], "Animation.animationCreated");
        assert_eq!(event.payload["params"]["session"], "S1");
        assert_eq!(event.channel.as_deref(), Some("raw"));
    }
}
