//! Network storage
//!
//! Registry of live requests, intercept definitions, and "pre-request"
//! pause records for `Fetch.requestPaused` events that outran their
//! `Network.requestWillBeSent`.

use super::request::NetworkRequest;
use crate::cdp::types::FetchRequestPausedParams;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Interception phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptPhase {
    BeforeRequestSent,
    ResponseStarted,
    AuthRequired,
}

impl InterceptPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterceptPhase::BeforeRequestSent => "beforeRequestSent",
            InterceptPhase::ResponseStarted => "responseStarted",
            InterceptPhase::AuthRequired => "authRequired",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "beforeRequestSent" => Ok(InterceptPhase::BeforeRequestSent),
            "responseStarted" => Ok(InterceptPhase::ResponseStarted),
            "authRequired" => Ok(InterceptPhase::AuthRequired),
            other => Err(Error::invalid_argument(format!(
                "Unknown intercept phase: {}",
                other
            ))),
        }
    }
}

/// A registered intercept rule
#[derive(Debug, Clone)]
pub struct Intercept {
    pub id: String,
    /// Empty = match every URL
    pub url_patterns: Vec<String>,
    pub phases: Vec<InterceptPhase>,
}

impl Intercept {
    fn matches_url(&self, url: &str) -> bool {
        if self.url_patterns.is_empty() {
            return true;
        }
        self.url_patterns.iter().any(|pattern| {
            match pattern.strip_suffix('*') {
                Some(prefix) => url.starts_with(prefix),
                None => pattern == url,
            }
        })
    }
}

/// Registry of live requests and intercepts
#[derive(Default)]
pub struct NetworkStorage {
    requests: RwLock<HashMap<String, Arc<NetworkRequest>>>,
    intercepts: RwLock<HashMap<String, Intercept>>,
    /// Fetch pauses seen before their request, keyed by CDP network id
    pre_request_pauses: RwLock<HashMap<String, FetchRequestPausedParams>>,
}

impl std::fmt::Debug for NetworkStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkStorage").finish()
    }
}

impl NetworkStorage {
    pub fn new() -> Self {
        Self::default()
    }

    // -- intercepts ---------------------------------------------------------

    /// Register an intercept. URL patterns are validated as absolute URLs
    /// (an optional trailing `*` is a prefix wildcard).
    pub fn add_intercept(
        &self,
        url_patterns: Vec<String>,
        phases: Vec<InterceptPhase>,
    ) -> Result<String> {
        if phases.is_empty() {
            return Err(Error::invalid_argument(
                "At least one phase must be specified.",
            ));
        }
        for pattern in &url_patterns {
            let base = pattern.strip_suffix('*').unwrap_or(pattern);
            if !base.contains("://") {
                return Err(Error::invalid_argument(format!(
                    "Invalid URL '{}': Failed to construct 'URL': Invalid URL",
                    pattern
                )));
            }
        }

        let intercept = Intercept {
            id: Uuid::new_v4().to_string(),
            url_patterns,
            phases,
        };
        let id = intercept.id.clone();
        self.intercepts
            .write()
            .expect("intercept store poisoned")
            .insert(id.clone(), intercept);
        Ok(id)
    }

    pub fn remove_intercept(&self, id: &str) -> Result<()> {
        self.intercepts
            .write()
            .expect("intercept store poisoned")
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| {
                Error::invalid_argument(format!("Intercept '{}' does not exist.", id))
            })
    }

    /// Ids of intercepts matching `url` at `phase`.
    pub fn intercepts_for_phase(&self, url: &str, phase: InterceptPhase) -> Vec<String> {
        let mut ids: Vec<String> = self
            .intercepts
            .read()
            .expect("intercept store poisoned")
            .values()
            .filter(|intercept| intercept.phases.contains(&phase) && intercept.matches_url(url))
            .map(|intercept| intercept.id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn has_intercepts(&self) -> bool {
        !self
            .intercepts
            .read()
            .expect("intercept store poisoned")
            .is_empty()
    }

    /// Whether auth-phase interception is active anywhere; gates the
    /// `handleAuthRequests` flag of `Fetch.enable`.
    pub fn has_auth_intercepts(&self) -> bool {
        self.intercepts
            .read()
            .expect("intercept store poisoned")
            .values()
            .any(|intercept| intercept.phases.contains(&InterceptPhase::AuthRequired))
    }

    // -- requests -----------------------------------------------------------

    pub fn insert_request(&self, request: Arc<NetworkRequest>) {
        self.requests
            .write()
            .expect("request store poisoned")
            .insert(request.request_id().to_string(), request);
    }

    pub fn get_request(&self, request_id: &str) -> Option<Arc<NetworkRequest>> {
        self.requests
            .read()
            .expect("request store poisoned")
            .get(request_id)
            .cloned()
    }

    pub fn remove_request(&self, request_id: &str) -> Option<Arc<NetworkRequest>> {
        self.requests
            .write()
            .expect("request store poisoned")
            .remove(request_id)
    }

    /// Live requests on one CDP session.
    pub fn requests_for_session(&self, cdp_session_id: &str) -> Vec<Arc<NetworkRequest>> {
        self.requests
            .read()
            .expect("request store poisoned")
            .values()
            .filter(|request| request.cdp_session_id() == cdp_session_id)
            .cloned()
            .collect()
    }

    /// Drop every request on a detached session.
    pub fn clear_session(&self, cdp_session_id: &str) {
        self.requests
            .write()
            .expect("request store poisoned")
            .retain(|_, request| request.cdp_session_id() != cdp_session_id);
        self.pre_request_pauses
            .write()
            .expect("pause store poisoned")
            .clear();
    }

    // -- pre-request pause records -----------------------------------------

    pub fn record_pre_request_pause(&self, network_id: &str, params: FetchRequestPausedParams) {
        self.pre_request_pauses
            .write()
            .expect("pause store poisoned")
            .insert(network_id.to_string(), params);
    }

    pub fn take_pre_request_pause(&self, network_id: &str) -> Option<FetchRequestPausedParams> {
        self.pre_request_pauses
            .write()
            .expect("pause store poisoned")
            .remove(network_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intercepts_require_a_phase() {
        let storage = NetworkStorage::new();
        let err = storage.add_intercept(vec![], vec![]).unwrap_err();
        assert_eq!(err.bidi_code(), "invalid argument");
    }

    #[test]
    fn intercept_patterns_are_validated() {
        let storage = NetworkStorage::new();
        let err = storage
            .add_intercept(
                vec!["foo".to_string()],
                vec![InterceptPhase::BeforeRequestSent],
            )
            .unwrap_err();
        assert_eq!(err.bidi_code(), "invalid argument");
    }

    #[test]
    fn phase_and_url_matching() {
        let storage = NetworkStorage::new();
        let id = storage
            .add_intercept(
                vec!["https://www.example.com/*".to_string()],
                vec![InterceptPhase::BeforeRequestSent],
            )
            .unwrap();

        assert_eq!(
            storage.intercepts_for_phase(
                "https://www.example.com/page",
                InterceptPhase::BeforeRequestSent
            ),
            vec![id.clone()]
        );
        assert!(storage
            .intercepts_for_phase("https://other.test/", InterceptPhase::BeforeRequestSent)
            .is_empty());
        assert!(storage
            .intercepts_for_phase(
                "https://www.example.com/page",
                InterceptPhase::ResponseStarted
            )
            .is_empty());
    }

    #[test]
    fn exact_pattern_requires_exact_url() {
        let storage = NetworkStorage::new();
        storage
            .add_intercept(
                vec!["https://a.test/page".to_string()],
                vec![InterceptPhase::ResponseStarted],
            )
            .unwrap();
        assert_eq!(
            storage
                .intercepts_for_phase("https://a.test/page", InterceptPhase::ResponseStarted)
                .len(),
            1
        );
        assert!(storage
            .intercepts_for_phase("https://a.test/page2", InterceptPhase::ResponseStarted)
            .is_empty());
    }

    #[test]
    fn remove_unknown_intercept_fails() {
        let storage = NetworkStorage::new();
        assert!(storage.remove_intercept("nope").is_err());
    }

    #[test]
    fn auth_intercept_detection() {
        let storage = NetworkStorage::new();
        assert!(!storage.has_auth_intercepts());
        storage
            .add_intercept(vec![], vec![InterceptPhase::AuthRequired])
            .unwrap();
        assert!(storage.has_auth_intercepts());
    }

    #[test]
    fn pre_request_pause_round_trip() {
        let storage = NetworkStorage::new();
        let params: FetchRequestPausedParams = serde_json::from_value(serde_json::json!({
            "requestId": "fetch-1",
            "request": {"url": "http://a.test/", "method": "GET"},
            "networkId": "req-1"
        }))
        .unwrap();

        storage.record_pre_request_pause("req-1", params);
        assert!(storage.take_pre_request_pause("req-1").is_some());
        assert!(storage.take_pre_request_pause("req-1").is_none());
    }
}
