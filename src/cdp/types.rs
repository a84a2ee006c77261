//! CDP (Chrome DevTools Protocol) type definitions
//!
//! Wire-level JSON-RPC frames plus the typed payloads of the `Target.*`,
//! `Runtime.*`, `Page.*`, `Network.*` and `Fetch.*` events the translator
//! consumes. Unknown events stay untyped and flow through the `cdp.<method>`
//! wildcard verbatim.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// CDP JSON-RPC request
#[derive(Debug, Clone, Serialize)]
pub struct CdpRequest {
    /// Request ID
    pub id: u64,
    /// Method name (e.g., "Page.navigate")
    pub method: String,
    /// Method parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Session ID for flat-mode multiplexing
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// CDP JSON-RPC notification (event)
#[derive(Debug, Clone, Deserialize)]
pub struct CdpNotification {
    /// Event method (e.g., "Network.requestWillBeSent")
    pub method: String,
    /// Event parameters
    #[serde(default)]
    pub params: Value,
    /// Session ID for flat-mode multiplexing
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
}

/// CDP JSON-RPC response
#[derive(Debug, Clone, Deserialize)]
pub struct CdpRpcResponse {
    /// Response ID (matches request ID)
    pub id: u64,
    /// Response result
    #[serde(default)]
    pub result: Value,
    /// Error if any
    #[serde(default)]
    pub error: Option<CdpErrorDetail>,
    /// Session the response belongs to
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
}

/// CDP error detail
#[derive(Debug, Clone, Deserialize)]
pub struct CdpErrorDetail {
    /// Error code
    pub code: i64,
    /// Error message
    pub message: String,
    /// Additional error data
    #[serde(default)]
    pub data: Option<Value>,
}

/// A CDP event as delivered to listeners
#[derive(Debug, Clone)]
pub struct CdpEvent {
    /// Event method
    pub method: String,
    /// Event parameters
    pub params: Value,
    /// Session the event arrived on (None for browser-level events)
    pub session_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Target domain
// ---------------------------------------------------------------------------

/// `Target.TargetInfo`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    pub target_id: String,
    #[serde(rename = "type")]
    pub target_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub attached: bool,
    #[serde(default)]
    pub opener_id: Option<String>,
    #[serde(default)]
    pub browser_context_id: Option<String>,
}

/// `Target.attachedToTarget` params
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedToTargetParams {
    pub session_id: String,
    pub target_info: TargetInfo,
    #[serde(default)]
    pub waiting_for_debugger: bool,
}

/// `Target.detachedFromTarget` params
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetachedFromTargetParams {
    pub session_id: String,
    #[serde(default)]
    pub target_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Runtime domain
// ---------------------------------------------------------------------------

/// `Runtime.ExecutionContextDescription`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContextDescription {
    pub id: i64,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub aux_data: Option<Value>,
}

/// `Runtime.executionContextCreated` params
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContextCreatedParams {
    pub context: ExecutionContextDescription,
}

/// `Runtime.executionContextDestroyed` params
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContextDestroyedParams {
    pub execution_context_id: i64,
}

/// `Runtime.consoleAPICalled` params (subset)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleApiCalledParams {
    #[serde(rename = "type")]
    pub call_type: String,
    #[serde(default)]
    pub args: Vec<Value>,
    pub execution_context_id: i64,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub stack_trace: Option<Value>,
}

// ---------------------------------------------------------------------------
// Page domain
// ---------------------------------------------------------------------------

/// `Page.lifecycleEvent` params
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEventParams {
    pub frame_id: String,
    pub loader_id: String,
    pub name: String,
    #[serde(default)]
    pub timestamp: f64,
}

/// `Page.frameNavigated` params (subset)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameNavigatedParams {
    pub frame: FrameInfo,
}

/// `Page.Frame` (subset)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameInfo {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub loader_id: String,
    #[serde(default)]
    pub url: String,
}

/// `Page.navigatedWithinDocument` params
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigatedWithinDocumentParams {
    pub frame_id: String,
    pub url: String,
}

// ---------------------------------------------------------------------------
// Network domain
// ---------------------------------------------------------------------------

/// `Network.Request`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestData {
    pub url: String,
    #[serde(default)]
    pub url_fragment: Option<String>,
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub post_data: Option<String>,
    #[serde(default)]
    pub has_post_data: Option<bool>,
}

/// `Network.Response` (subset)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseData {
    pub url: String,
    pub status: i64,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub from_disk_cache: Option<bool>,
    #[serde(default)]
    pub encoded_data_length: Option<f64>,
}

/// `Network.requestWillBeSent` params
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWillBeSentParams {
    pub request_id: String,
    #[serde(default)]
    pub loader_id: String,
    #[serde(rename = "documentURL", default)]
    pub document_url: String,
    pub request: RequestData,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub wall_time: f64,
    #[serde(default)]
    pub initiator: Option<Value>,
    #[serde(default)]
    pub redirect_response: Option<ResponseData>,
    #[serde(rename = "type", default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub frame_id: Option<String>,
}

/// `Network.requestWillBeSentExtraInfo` params (subset)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWillBeSentExtraInfoParams {
    pub request_id: String,
    #[serde(default)]
    pub associated_cookies: Vec<Value>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// `Network.responseReceived` params
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseReceivedParams {
    pub request_id: String,
    #[serde(default)]
    pub loader_id: String,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(rename = "type", default)]
    pub resource_type: Option<String>,
    pub response: ResponseData,
    #[serde(default)]
    pub has_extra_info: bool,
    #[serde(default)]
    pub frame_id: Option<String>,
}

/// `Network.responseReceivedExtraInfo` params (subset)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseReceivedExtraInfoParams {
    pub request_id: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub status_code: Option<i64>,
    #[serde(default)]
    pub cookie_partition_key: Option<Value>,
}

/// `Network.requestServedFromCache` params
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestServedFromCacheParams {
    pub request_id: String,
}

/// `Network.loadingFailed` params
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFailedParams {
    pub request_id: String,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub error_text: String,
    #[serde(default)]
    pub canceled: bool,
    #[serde(rename = "type", default)]
    pub resource_type: Option<String>,
}

// ---------------------------------------------------------------------------
// Fetch domain
// ---------------------------------------------------------------------------

/// `Fetch.HeaderEntry`
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct HeaderEntry {
    pub name: String,
    pub value: String,
}

/// `Fetch.requestPaused` params
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequestPausedParams {
    /// The fetch id ("interception id"), distinct from the network request id
    pub request_id: String,
    pub request: RequestData,
    #[serde(default)]
    pub frame_id: Option<String>,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub response_error_reason: Option<String>,
    #[serde(default)]
    pub response_status_code: Option<i64>,
    #[serde(default)]
    pub response_status_text: Option<String>,
    #[serde(default)]
    pub response_headers: Option<Vec<HeaderEntry>>,
    /// The `Network.requestWillBeSent` request id this pause belongs to
    #[serde(default)]
    pub network_id: Option<String>,
}

impl FetchRequestPausedParams {
    /// A pause carrying response fields is a response-phase pause.
    pub fn is_response_phase(&self) -> bool {
        self.response_status_code.is_some() || self.response_error_reason.is_some()
    }
}

/// `Fetch.AuthChallenge`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthChallenge {
    #[serde(default)]
    pub source: Option<String>,
    pub origin: String,
    pub scheme: String,
    #[serde(default)]
    pub realm: String,
}

/// `Fetch.authRequired` params
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchAuthRequiredParams {
    pub request_id: String,
    pub request: RequestData,
    #[serde(default)]
    pub frame_id: Option<String>,
    #[serde(default)]
    pub resource_type: Option<String>,
    pub auth_challenge: AuthChallenge,
}
