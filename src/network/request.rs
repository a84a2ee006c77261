//! Network request state machine
//!
//! Assembles BiDi network events from CDP event streams that arrive in
//! undefined relative order: `Network.requestWillBeSent` (+ExtraInfo),
//! `Network.responseReceived` (+ExtraInfo), `Network.loadingFailed`,
//! `Network.requestServedFromCache`, `Fetch.requestPaused` and
//! `Fetch.authRequired`. After every input the request re-evaluates its
//! gating predicates and emits whatever became ready, in protocol order,
//! each event at most once (`authRequired` excepted).

use super::headers::{
    bidi_headers_from_map, cdp_header_entries, header_size, merge_cookies, BidiHeader, BytesValue,
    CookieHeader,
};
use super::storage::{InterceptPhase, NetworkStorage};
use crate::cdp::types::{
    FetchAuthRequiredParams, FetchRequestPausedParams, HeaderEntry, LoadingFailedParams,
    RequestWillBeSentExtraInfoParams, RequestWillBeSentParams, ResponseData,
    ResponseReceivedExtraInfoParams, ResponseReceivedParams,
};
use crate::cdp::CdpSession;
use crate::events::EventManager;
use crate::{Error, Result};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Overrides accepted by `network.continueRequest`
#[derive(Debug, Clone, Default)]
pub struct ContinueRequestOverrides {
    pub url: Option<String>,
    pub method: Option<String>,
    pub headers: Option<Vec<BidiHeader>>,
    pub cookies: Option<Vec<CookieHeader>>,
    pub body: Option<BytesValue>,
}

/// Overrides accepted by `network.continueResponse`
#[derive(Debug, Clone, Default)]
pub struct ContinueResponseOverrides {
    pub status_code: Option<i64>,
    pub reason_phrase: Option<String>,
    pub headers: Option<Vec<BidiHeader>>,
    pub cookies: Option<Vec<CookieHeader>>,
    pub credentials: Option<AuthCredentials>,
}

/// Overrides accepted by `network.provideResponse`
#[derive(Debug, Clone, Default)]
pub struct ProvideResponseOverrides {
    pub status_code: Option<i64>,
    pub reason_phrase: Option<String>,
    pub headers: Option<Vec<BidiHeader>>,
    pub cookies: Option<Vec<CookieHeader>>,
    pub body: Option<BytesValue>,
}

/// Basic auth credentials
#[derive(Debug, Clone)]
pub struct AuthCredentials {
    pub username: String,
    pub password: String,
}

/// `network.continueWithAuth` actions
#[derive(Debug, Clone)]
pub enum AuthAction {
    Default,
    Cancel,
    ProvideCredentials(AuthCredentials),
}

impl AuthAction {
    fn to_cdp(&self) -> Value {
        match self {
            AuthAction::Default => json!({"response": "Default"}),
            AuthAction::Cancel => json!({"response": "CancelAuth"}),
            AuthAction::ProvideCredentials(credentials) => json!({
                "response": "ProvideCredentials",
                "username": credentials.username,
                "password": credentials.password,
            }),
        }
    }
}

/// Overrides applied by the client, kept for later event payloads
#[derive(Debug, Clone, Default)]
struct AppliedOverrides {
    url: Option<String>,
    method: Option<String>,
    headers: Option<Vec<HeaderEntry>>,
    body_size: Option<usize>,
}

#[derive(Debug, Default)]
struct Emitted {
    before_request_sent: bool,
    response_started: bool,
    response_completed: bool,
    fetch_error: bool,
}

#[derive(Debug, Default)]
struct RequestState {
    request_info: Option<RequestWillBeSentParams>,
    request_extra_info: Option<RequestWillBeSentExtraInfoParams>,
    request_paused: Option<FetchRequestPausedParams>,
    auth: Option<FetchAuthRequiredParams>,
    response_info: Option<ResponseData>,
    response_extra_info: Option<ResponseReceivedExtraInfoParams>,
    response_paused: Option<FetchRequestPausedParams>,
    response_has_extra_info: bool,
    fetch_id: Option<String>,
    intercept_phase: Option<InterceptPhase>,
    served_from_cache: bool,
    /// Set on redirect flush and on loading failure; forces emission gates
    flushed: bool,
    failed_error_text: Option<String>,
    overrides: AppliedOverrides,
    emitted: Emitted,
}

/// One network request, identified by its CDP request id
pub struct NetworkRequest {
    request_id: String,
    redirect_count: u64,
    session: CdpSession,
    cdp_session_id: String,
    storage: Arc<NetworkStorage>,
    event_manager: Arc<EventManager>,
    state: Mutex<RequestState>,
    /// Bumped on every successful emission; `wait_next_phase` observes it
    phase_tx: watch::Sender<u64>,
}

impl std::fmt::Debug for NetworkRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkRequest")
            .field("request_id", &self.request_id)
            .field("redirect_count", &self.redirect_count)
            .finish()
    }
}

impl NetworkRequest {
    pub fn new(
        request_id: &str,
        redirect_count: u64,
        session: CdpSession,
        storage: Arc<NetworkStorage>,
        event_manager: Arc<EventManager>,
    ) -> Arc<Self> {
        let cdp_session_id = session.session_id().unwrap_or_default().to_string();
        let (phase_tx, _) = watch::channel(0);
        Arc::new(Self {
            request_id: request_id.to_string(),
            redirect_count,
            session,
            cdp_session_id,
            storage,
            event_manager,
            state: Mutex::new(RequestState::default()),
            phase_tx,
        })
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn redirect_count(&self) -> u64 {
        self.redirect_count
    }

    pub fn cdp_session_id(&self) -> &str {
        &self.cdp_session_id
    }

    /// Resolves on the next phase transition, then re-arms.
    pub async fn wait_next_phase(&self) {
        let mut rx = self.phase_tx.subscribe();
        let _ = rx.changed().await;
    }

    pub fn intercept_phase(&self) -> Option<InterceptPhase> {
        self.state.lock().expect("request state poisoned").intercept_phase
    }

    /// The request URL, once any input carried it.
    pub fn url(&self) -> Option<String> {
        let state = self.state.lock().expect("request state poisoned");
        Self::url_of(&state)
    }

    // -- CDP inputs ---------------------------------------------------------

    pub fn on_request_will_be_sent(&self, params: RequestWillBeSentParams) {
        {
            let mut state = self.state.lock().expect("request state poisoned");
            if state.request_info.is_none() {
                state.request_info = Some(params);
            }
        }
        self.evaluate();
    }

    pub fn on_request_will_be_sent_extra_info(&self, params: RequestWillBeSentExtraInfoParams) {
        {
            let mut state = self.state.lock().expect("request state poisoned");
            state.request_extra_info = Some(params);
        }
        self.evaluate();
    }

    pub fn on_response_received(&self, params: ResponseReceivedParams) {
        {
            let mut state = self.state.lock().expect("request state poisoned");
            state.response_has_extra_info = params.has_extra_info;
            state.response_info = Some(params.response);
        }
        self.evaluate();
    }

    pub fn on_response_received_extra_info(&self, params: ResponseReceivedExtraInfoParams) {
        {
            let mut state = self.state.lock().expect("request state poisoned");
            // A 30x extra-info whose location equals the request URL belongs
            // to the redirect, not to this request.
            let is_redirect_leftover = params
                .status_code
                .is_some_and(|status| (300..400).contains(&status))
                && state.request_info.as_ref().is_some_and(|info| {
                    params
                        .headers
                        .iter()
                        .find(|(name, _)| name.eq_ignore_ascii_case("location"))
                        .map(|(_, value)| value.as_str())
                        == Some(info.request.url.as_str())
                });
            if is_redirect_leftover {
                debug!(request = %self.request_id, "Discarding redirect extra-info");
            } else {
                state.response_extra_info = Some(params);
            }
        }
        self.evaluate();
    }

    pub fn on_served_from_cache(&self) {
        {
            let mut state = self.state.lock().expect("request state poisoned");
            state.served_from_cache = true;
        }
        self.evaluate();
    }

    pub fn on_loading_failed(&self, params: LoadingFailedParams) {
        {
            let mut state = self.state.lock().expect("request state poisoned");
            state.flushed = true;
            state.failed_error_text = Some(params.error_text);
        }
        self.evaluate();
    }

    /// `Fetch.requestPaused`, either phase.
    pub fn on_request_paused(&self, params: FetchRequestPausedParams) {
        let auto_continue = {
            let mut state = self.state.lock().expect("request state poisoned");
            state.fetch_id = Some(params.request_id.clone());

            let url = params.request.url.clone();
            if params.is_response_phase() {
                let intercepts =
                    self.storage
                        .intercepts_for_phase(&url, InterceptPhase::ResponseStarted);
                state.response_paused = Some(params);
                if intercepts.is_empty() {
                    Some(InterceptPhase::ResponseStarted)
                } else {
                    state.intercept_phase = Some(InterceptPhase::ResponseStarted);
                    None
                }
            } else {
                let intercepts =
                    self.storage
                        .intercepts_for_phase(&url, InterceptPhase::BeforeRequestSent);
                state.request_paused = Some(params);
                if intercepts.is_empty() {
                    Some(InterceptPhase::BeforeRequestSent)
                } else {
                    state.intercept_phase = Some(InterceptPhase::BeforeRequestSent);
                    None
                }
            }
        };

        // Fetch pauses every matching request; pauses with no interested
        // intercept are resumed immediately.
        if let Some(phase) = auto_continue {
            self.spawn_auto_continue(phase);
        }

        self.evaluate();
    }

    pub fn on_auth_required(&self, params: FetchAuthRequiredParams) {
        let blocked = {
            let mut state = self.state.lock().expect("request state poisoned");
            state.fetch_id = Some(params.request_id.clone());
            let intercepts = self
                .storage
                .intercepts_for_phase(&params.request.url, InterceptPhase::AuthRequired);
            state.auth = Some(params);
            if intercepts.is_empty() {
                false
            } else {
                state.intercept_phase = Some(InterceptPhase::AuthRequired);
                true
            }
        };

        if blocked {
            // authRequired may repeat across retries.
            self.emit_auth_required();
        } else {
            self.spawn_auto_continue(InterceptPhase::AuthRequired);
        }
    }

    /// Redirect: record the 30x as this request's response and flush the
    /// remaining events; the manager then replaces this instance.
    pub fn flush_for_redirect(&self, redirect_response: ResponseData) {
        {
            let mut state = self.state.lock().expect("request state poisoned");
            state.response_has_extra_info = false;
            state.response_info = Some(redirect_response);
            state.flushed = true;
        }
        self.evaluate();
    }

    fn spawn_auto_continue(&self, phase: InterceptPhase) {
        let session = self.session.clone();
        let fetch_id = {
            let state = self.state.lock().expect("request state poisoned");
            state.fetch_id.clone()
        };
        let Some(fetch_id) = fetch_id else { return };
        let request_id = self.request_id.clone();
        tokio::spawn(async move {
            let (method, params) = match phase {
                InterceptPhase::BeforeRequestSent => {
                    ("Fetch.continueRequest", json!({"requestId": fetch_id}))
                }
                InterceptPhase::ResponseStarted => {
                    ("Fetch.continueResponse", json!({"requestId": fetch_id}))
                }
                InterceptPhase::AuthRequired => (
                    "Fetch.continueWithAuth",
                    json!({
                        "requestId": fetch_id,
                        "authChallengeResponse": {"response": "Default"},
                    }),
                ),
            };
            if let Err(e) = session.send_command(method, params).await {
                if !e.is_close_error() {
                    warn!(request = %request_id, error = %e, "Auto-continue failed");
                }
            }
        });
    }

    // -- gating predicates --------------------------------------------------

    fn url_of(state: &RequestState) -> Option<String> {
        state
            .request_info
            .as_ref()
            .map(|info| info.request.url.clone())
            .or_else(|| {
                state
                    .request_paused
                    .as_ref()
                    .map(|paused| paused.request.url.clone())
            })
    }

    fn is_data_url(state: &RequestState) -> bool {
        Self::url_of(state).is_some_and(|url| url.starts_with("data:"))
    }

    fn is_favicon(state: &RequestState) -> bool {
        Self::url_of(state).is_some_and(|url| url.ends_with("/favicon.ico"))
    }

    fn request_interception_expected(&self, state: &RequestState) -> bool {
        if Self::is_data_url(state) || state.served_from_cache {
            return false;
        }
        match Self::url_of(state) {
            Some(url) => !self
                .storage
                .intercepts_for_phase(&url, InterceptPhase::BeforeRequestSent)
                .is_empty(),
            None => false,
        }
    }

    fn response_interception_expected(&self, state: &RequestState) -> bool {
        if Self::is_data_url(state) || state.served_from_cache {
            return false;
        }
        match Self::url_of(state) {
            Some(url) => !self
                .storage
                .intercepts_for_phase(&url, InterceptPhase::ResponseStarted)
                .is_empty(),
            None => false,
        }
    }

    fn request_extra_info_completed(state: &RequestState) -> bool {
        state.flushed
            || Self::is_data_url(state)
            || state.request_extra_info.is_some()
            || state.served_from_cache
            || (state.response_info.is_some() && !state.response_has_extra_info)
    }

    fn request_interception_completed(&self, state: &RequestState) -> bool {
        !self.request_interception_expected(state) || state.request_paused.is_some()
    }

    fn response_extra_info_completed(state: &RequestState) -> bool {
        state.flushed
            || !state.response_has_extra_info
            || state.response_extra_info.is_some()
            || Self::is_data_url(state)
            || state.served_from_cache
    }

    fn response_interception_completed(&self, state: &RequestState) -> bool {
        if state.flushed || !self.response_interception_expected(state) {
            return true;
        }
        state.response_paused.is_some()
            && state.intercept_phase != Some(InterceptPhase::ResponseStarted)
    }

    // -- emission -----------------------------------------------------------

    /// Re-evaluate after any input and emit whatever became ready, strictly
    /// in protocol order.
    fn evaluate(&self) {
        let mut ready: Vec<(&'static str, Option<Value>)> = Vec::new();
        let mut completed = false;

        {
            let mut state = self.state.lock().expect("request state poisoned");
            let suppressed = Self::is_favicon(&state);

            // beforeRequestSent
            if !state.emitted.before_request_sent && state.request_info.is_some() {
                let gate = if state.flushed {
                    true
                } else if self.request_interception_expected(&state) {
                    self.request_interception_completed(&state)
                } else {
                    Self::request_extra_info_completed(&state)
                };
                if gate {
                    state.emitted.before_request_sent = true;
                    let payload =
                        (!suppressed).then(|| self.before_request_sent_payload(&state));
                    ready.push(("network.beforeRequestSent", payload));
                }
            }

            // responseStarted
            if state.emitted.before_request_sent
                && !state.emitted.response_started
                && (state.response_info.is_some()
                    || (self.response_interception_expected(&state)
                        && state.response_paused.is_some()))
            {
                state.emitted.response_started = true;
                let payload = (!suppressed).then(|| self.response_started_payload(&state));
                ready.push(("network.responseStarted", payload));
            }

            // responseCompleted
            if state.emitted.response_started
                && !state.emitted.response_completed
                && state.response_info.is_some()
                && Self::response_extra_info_completed(&state)
                && self.response_interception_completed(&state)
            {
                state.emitted.response_completed = true;
                let payload = (!suppressed).then(|| self.response_completed_payload(&state));
                ready.push(("network.responseCompleted", payload));
                completed = true;
            }

            // fetchError (loading failed)
            if state.failed_error_text.is_some()
                && !state.emitted.fetch_error
                && !state.emitted.response_completed
                && state.emitted.before_request_sent
            {
                state.emitted.fetch_error = true;
                let payload = (!suppressed).then(|| self.fetch_error_payload(&state));
                ready.push(("network.fetchError", payload));
                completed = true;
            }
        }

        let context = self.context_id();
        for (method, payload) in ready {
            if let Some(params) = payload {
                self.event_manager
                    .register_event(method, params, context.as_deref());
            }
            self.phase_tx.send_modify(|n| *n += 1);
        }

        if completed {
            self.storage.remove_request(&self.request_id);
        }
    }

    fn emit_auth_required(&self) {
        let payload = {
            let state = self.state.lock().expect("request state poisoned");
            if Self::is_favicon(&state) {
                None
            } else {
                Some(self.auth_required_payload(&state))
            }
        };
        if let Some(params) = payload {
            self.event_manager.register_event(
                "network.authRequired",
                params,
                self.context_id().as_deref(),
            );
        }
        self.phase_tx.send_modify(|n| *n += 1);
    }

    fn context_id(&self) -> Option<String> {
        let state = self.state.lock().expect("request state poisoned");
        state
            .request_info
            .as_ref()
            .and_then(|info| info.frame_id.clone())
            .or_else(|| {
                state
                    .request_paused
                    .as_ref()
                    .and_then(|paused| paused.frame_id.clone())
            })
    }

    // -- payload builders (called with the state lock held) -----------------

    fn base_payload(&self, state: &RequestState, phase: Option<InterceptPhase>) -> Value {
        let (url, method, headers) = match (&state.request_info, &state.request_paused) {
            (Some(info), _) => (
                info.request.url.clone(),
                info.request.method.clone(),
                info.request.headers.clone(),
            ),
            (None, Some(paused)) => (
                paused.request.url.clone(),
                paused.request.method.clone(),
                paused.request.headers.clone(),
            ),
            (None, None) => (String::new(), String::new(), Default::default()),
        };

        let url = state.overrides.url.clone().unwrap_or(url);
        let method = state.overrides.method.clone().unwrap_or(method);
        let header_entries = match &state.overrides.headers {
            Some(overridden) => overridden.clone(),
            None => cdp_header_entries(&headers),
        };
        let body_size = state.overrides.body_size.unwrap_or_else(|| {
            state
                .request_info
                .as_ref()
                .and_then(|info| info.request.post_data.as_ref())
                .map(|data| data.len())
                .unwrap_or(0)
        });

        let timestamp = state
            .request_info
            .as_ref()
            .filter(|info| info.wall_time > 0.0)
            .map(|info| (info.wall_time * 1000.0) as i64)
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

        let blocked_intercepts: Vec<String> = match phase {
            Some(phase) if state.intercept_phase == Some(phase) => {
                self.storage.intercepts_for_phase(&url, phase)
            }
            _ => Vec::new(),
        };

        let mut base = json!({
            "context": state.request_info.as_ref().and_then(|i| i.frame_id.clone())
                .or_else(|| state.request_paused.as_ref().and_then(|p| p.frame_id.clone())),
            "navigation": Value::Null,
            "redirectCount": self.redirect_count,
            "request": {
                "request": self.request_id,
                "url": url,
                "method": method,
                "headers": header_entries.iter().map(|h| json!({
                    "name": h.name,
                    "value": {"type": "string", "value": h.value},
                })).collect::<Vec<_>>(),
                "cookies": [],
                "headersSize": header_size(&header_entries),
                "bodySize": body_size,
                "timings": {
                    "timeOrigin": 0, "requestTime": 0, "redirectStart": 0,
                    "redirectEnd": 0, "fetchStart": 0, "dnsStart": 0, "dnsEnd": 0,
                    "connectStart": 0, "connectEnd": 0, "tlsStart": 0,
                    "requestStart": 0, "responseStart": 0, "responseEnd": 0,
                },
            },
            "timestamp": timestamp,
            "isBlocked": !blocked_intercepts.is_empty(),
        });
        if !blocked_intercepts.is_empty() {
            base["intercepts"] = json!(blocked_intercepts);
        }
        base
    }

    fn response_payload(&self, state: &RequestState) -> Value {
        if let Some(info) = &state.response_info {
            let headers = cdp_header_entries(&info.headers);
            return json!({
                "url": info.url,
                "protocol": info.protocol.clone().unwrap_or_default(),
                "status": info.status,
                "statusText": info.status_text,
                "fromCache": state.served_from_cache
                    || info.from_disk_cache.unwrap_or(false),
                "headers": bidi_headers_from_map(&info.headers),
                "mimeType": info.mime_type,
                "bytesReceived": info.encoded_data_length.unwrap_or(0.0) as i64,
                "headersSize": header_size(&headers),
                "bodySize": 0,
                "content": {"size": 0},
            });
        }

        if let Some(paused) = &state.response_paused {
            let headers = paused.response_headers.clone().unwrap_or_default();
            return json!({
                "url": paused.request.url,
                "protocol": "",
                "status": paused.response_status_code.unwrap_or(0),
                "statusText": paused.response_status_text.clone().unwrap_or_default(),
                "fromCache": false,
                "headers": headers.iter().map(|h| json!({
                    "name": h.name,
                    "value": {"type": "string", "value": h.value},
                })).collect::<Vec<_>>(),
                "mimeType": "",
                "bytesReceived": 0,
                "headersSize": header_size(&headers),
                "bodySize": 0,
                "content": {"size": 0},
            });
        }

        Value::Null
    }

    fn before_request_sent_payload(&self, state: &RequestState) -> Value {
        let mut payload = self.base_payload(state, Some(InterceptPhase::BeforeRequestSent));
        payload["initiator"] = json!({
            "type": state
                .request_info
                .as_ref()
                .and_then(|info| info.initiator.as_ref())
                .and_then(|initiator| initiator.get("type"))
                .and_then(Value::as_str)
                .unwrap_or("other"),
        });
        payload
    }

    fn response_started_payload(&self, state: &RequestState) -> Value {
        let mut payload = self.base_payload(state, Some(InterceptPhase::ResponseStarted));
        payload["response"] = self.response_payload(state);
        payload
    }

    fn response_completed_payload(&self, state: &RequestState) -> Value {
        let mut payload = self.base_payload(state, None);
        payload["response"] = self.response_payload(state);
        payload
    }

    fn fetch_error_payload(&self, state: &RequestState) -> Value {
        let mut payload = self.base_payload(state, None);
        payload["errorText"] = json!(state.failed_error_text.clone().unwrap_or_default());
        payload
    }

    fn auth_required_payload(&self, state: &RequestState) -> Value {
        let mut payload = self.base_payload(state, Some(InterceptPhase::AuthRequired));
        payload["response"] = self.response_payload(state);
        payload
    }

    // -- interception API ---------------------------------------------------

    fn require_fetch_id(&self) -> Result<String> {
        let state = self.state.lock().expect("request state poisoned");
        state
            .fetch_id
            .clone()
            .ok_or_else(|| Error::unknown("Network Interception not set-up"))
    }

    /// `network.continueRequest`
    pub async fn continue_request(&self, overrides: ContinueRequestOverrides) -> Result<()> {
        let fetch_id = self.require_fetch_id()?;

        let merged_headers = {
            let state = self.state.lock().expect("request state poisoned");
            let base = state
                .request_paused
                .as_ref()
                .map(|paused| cdp_header_entries(&paused.request.headers))
                .unwrap_or_default();
            let overridden: Option<Vec<HeaderEntry>> = overrides
                .headers
                .as_ref()
                .map(|headers| headers.iter().map(BidiHeader::to_cdp).collect());
            merge_cookies(&base, overridden.as_deref(), overrides.cookies.as_deref())
        };

        let mut params = json!({"requestId": fetch_id});
        if let Some(url) = &overrides.url {
            params["url"] = json!(url);
        }
        if let Some(method) = &overrides.method {
            params["method"] = json!(method);
        }
        if let Some(headers) = &merged_headers {
            params["headers"] = json!(headers);
        }
        let body_size = match &overrides.body {
            Some(body) => {
                params["postData"] = json!(body.encode_for_cdp());
                Some(body.size()?)
            }
            None => None,
        };

        self.session.send_command("Fetch.continueRequest", params).await?;

        {
            let mut state = self.state.lock().expect("request state poisoned");
            state.intercept_phase = None;
            state.overrides = AppliedOverrides {
                url: overrides.url,
                method: overrides.method,
                headers: merged_headers,
                body_size,
            };
        }
        self.evaluate();
        Ok(())
    }

    /// `network.continueResponse`
    pub async fn continue_response(&self, overrides: ContinueResponseOverrides) -> Result<()> {
        let fetch_id = self.require_fetch_id()?;
        let phase = self.intercept_phase();

        match phase {
            Some(InterceptPhase::AuthRequired) => {
                let action = match &overrides.credentials {
                    Some(credentials) => {
                        AuthAction::ProvideCredentials(credentials.clone())
                    }
                    None => AuthAction::Default,
                };
                self.session
                    .send_command(
                        "Fetch.continueWithAuth",
                        json!({
                            "requestId": fetch_id,
                            "authChallengeResponse": action.to_cdp(),
                        }),
                    )
                    .await?;
            }
            Some(InterceptPhase::ResponseStarted) => {
                let mut params = json!({"requestId": fetch_id});
                if let Some(status) = overrides.status_code {
                    params["responseCode"] = json!(status);
                }
                if let Some(phrase) = &overrides.reason_phrase {
                    params["responsePhrase"] = json!(phrase);
                }
                let overridden: Option<Vec<HeaderEntry>> = overrides
                    .headers
                    .as_ref()
                    .map(|headers| headers.iter().map(BidiHeader::to_cdp).collect());
                if let Some(headers) =
                    merge_cookies(&[], overridden.as_deref(), overrides.cookies.as_deref())
                {
                    params["responseHeaders"] = json!(headers);
                }
                self.session
                    .send_command("Fetch.continueResponse", params)
                    .await?;
            }
            _ => {
                return Err(Error::unknown("Request is not blocked at a response phase"));
            }
        }

        {
            let mut state = self.state.lock().expect("request state poisoned");
            state.intercept_phase = None;
        }
        // Clearing the phase may complete the response gate.
        self.evaluate();
        Ok(())
    }

    /// `network.continueWithAuth`
    pub async fn continue_with_auth(&self, action: AuthAction) -> Result<()> {
        let fetch_id = self.require_fetch_id()?;
        self.session
            .send_command(
                "Fetch.continueWithAuth",
                json!({
                    "requestId": fetch_id,
                    "authChallengeResponse": action.to_cdp(),
                }),
            )
            .await?;
        {
            let mut state = self.state.lock().expect("request state poisoned");
            state.intercept_phase = None;
        }
        self.evaluate();
        Ok(())
    }

    /// `network.provideResponse`
    pub async fn provide_response(&self, overrides: ProvideResponseOverrides) -> Result<()> {
        let fetch_id = self.require_fetch_id()?;

        // In the auth phase a provided response means "use the browser's
        // credential flow".
        if self.intercept_phase() == Some(InterceptPhase::AuthRequired) {
            self.session
                .send_command(
                    "Fetch.continueWithAuth",
                    json!({
                        "requestId": fetch_id,
                        "authChallengeResponse": {"response": "ProvideCredentials"},
                    }),
                )
                .await?;
            {
                let mut state = self.state.lock().expect("request state poisoned");
                state.intercept_phase = None;
            }
            self.evaluate();
            return Ok(());
        }

        // Nothing overridden: the paused request continues untouched.
        if overrides.body.is_none() && overrides.headers.is_none() {
            return self
                .continue_request(ContinueRequestOverrides::default())
                .await;
        }

        let status = overrides.status_code.unwrap_or_else(|| {
            let state = self.state.lock().expect("request state poisoned");
            state
                .response_paused
                .as_ref()
                .and_then(|paused| paused.response_status_code)
                .unwrap_or(200)
        });

        let mut params = json!({
            "requestId": fetch_id,
            "responseCode": status,
        });
        if let Some(phrase) = &overrides.reason_phrase {
            params["responsePhrase"] = json!(phrase);
        }
        let overridden: Option<Vec<HeaderEntry>> = overrides
            .headers
            .as_ref()
            .map(|headers| headers.iter().map(BidiHeader::to_cdp).collect());
        if let Some(headers) =
            merge_cookies(&[], overridden.as_deref(), overrides.cookies.as_deref())
        {
            params["responseHeaders"] = json!(headers);
        }
        if let Some(body) = &overrides.body {
            params["body"] = json!(body.encode_for_cdp());
        }

        self.session.send_command("Fetch.fulfillRequest", params).await?;

        {
            let mut state = self.state.lock().expect("request state poisoned");
            state.intercept_phase = None;
        }
        // Fulfilling counts as completing the response phase.
        self.evaluate();
        Ok(())
    }

    /// `network.failRequest`
    pub async fn fail_request(&self, error_reason: &str) -> Result<()> {
        let fetch_id = self.require_fetch_id()?;
        self.session
            .send_command(
                "Fetch.failRequest",
                json!({"requestId": fetch_id, "errorReason": error_reason}),
            )
            .await?;
        {
            let mut state = self.state.lock().expect("request state poisoned");
            state.intercept_phase = None;
        }
        self.evaluate();
        Ok(())
    }
}
