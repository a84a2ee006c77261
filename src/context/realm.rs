//! Realm store
//!
//! JavaScript execution contexts across every attached target: main-window
//! realms, user sandboxes, and the worker variants. Keyed by a fresh UUID
//! with secondary lookups by `(cdp session, execution context id)` and by
//! browsing context.

use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// Realm variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealmType {
    Window,
    DedicatedWorker,
    SharedWorker,
    ServiceWorker,
}

impl RealmType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RealmType::Window => "window",
            RealmType::DedicatedWorker => "dedicated-worker",
            RealmType::SharedWorker => "shared-worker",
            RealmType::ServiceWorker => "service-worker",
        }
    }
}

/// One JavaScript realm
#[derive(Debug, Clone)]
pub struct Realm {
    pub id: String,
    pub realm_type: RealmType,
    pub cdp_session_id: String,
    pub execution_context_id: i64,
    pub origin: String,
    /// World name for user sandboxes; None for the main world
    pub sandbox: Option<String>,
    /// Owning context for window realms; derived owners for workers
    pub associated_contexts: Vec<String>,
}

impl Realm {
    /// The BiDi RealmInfo payload.
    pub fn to_json(&self) -> serde_json::Value {
        let mut info = serde_json::json!({
            "realm": self.id,
            "origin": self.origin,
            "type": self.realm_type.as_str(),
        });
        if self.realm_type == RealmType::Window {
            if let Some(context) = self.associated_contexts.first() {
                info["context"] = serde_json::json!(context);
            }
            if let Some(sandbox) = &self.sandbox {
                info["sandbox"] = serde_json::json!(sandbox);
            }
        }
        info
    }
}

/// Search attributes for `find_realm`; unset fields match anything
#[derive(Debug, Clone, Default)]
pub struct RealmFilter {
    pub realm_id: Option<String>,
    pub cdp_session_id: Option<String>,
    pub execution_context_id: Option<i64>,
    pub browsing_context_id: Option<String>,
    pub realm_type: Option<RealmType>,
    pub sandbox: Option<Option<String>>,
    pub origin: Option<String>,
}

impl RealmFilter {
    fn matches(&self, realm: &Realm) -> bool {
        if let Some(id) = &self.realm_id {
            if *id != realm.id {
                return false;
            }
        }
        if let Some(session) = &self.cdp_session_id {
            if *session != realm.cdp_session_id {
                return false;
            }
        }
        if let Some(ecid) = self.execution_context_id {
            if ecid != realm.execution_context_id {
                return false;
            }
        }
        if let Some(context) = &self.browsing_context_id {
            if !realm.associated_contexts.contains(context) {
                return false;
            }
        }
        if let Some(realm_type) = self.realm_type {
            if realm_type != realm.realm_type {
                return false;
            }
        }
        if let Some(sandbox) = &self.sandbox {
            if *sandbox != realm.sandbox {
                return false;
            }
        }
        if let Some(origin) = &self.origin {
            if *origin != realm.origin {
                return false;
            }
        }
        true
    }
}

/// Registry of live realms
#[derive(Debug, Default)]
pub struct RealmStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    by_id: HashMap<String, Realm>,
    /// (cdp session, execution context id) -> realm id
    by_execution_context: HashMap<(String, i64), String>,
}

impl RealmStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a realm. A `(session, execution context)` pair maps to at
    /// most one realm; re-registration returns the existing one.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &self,
        realm_type: RealmType,
        cdp_session_id: &str,
        execution_context_id: i64,
        origin: &str,
        sandbox: Option<String>,
        associated_contexts: Vec<String>,
    ) -> Realm {
        let mut inner = self.inner.write().expect("realm store poisoned");

        let key = (cdp_session_id.to_string(), execution_context_id);
        if let Some(existing_id) = inner.by_execution_context.get(&key) {
            if let Some(existing) = inner.by_id.get(existing_id) {
                return existing.clone();
            }
        }

        let realm = Realm {
            id: Uuid::new_v4().to_string(),
            realm_type,
            cdp_session_id: cdp_session_id.to_string(),
            execution_context_id,
            origin: origin.to_string(),
            sandbox,
            associated_contexts,
        };
        inner.by_execution_context.insert(key, realm.id.clone());
        inner.by_id.insert(realm.id.clone(), realm.clone());
        realm
    }

    pub fn get(&self, realm_id: &str) -> Option<Realm> {
        self.inner
            .read()
            .expect("realm store poisoned")
            .by_id
            .get(realm_id)
            .cloned()
    }

    /// First realm matching the filter.
    pub fn find_realm(&self, filter: &RealmFilter) -> Option<Realm> {
        self.find_realms(filter).into_iter().next()
    }

    /// All realms matching the filter.
    pub fn find_realms(&self, filter: &RealmFilter) -> Vec<Realm> {
        let inner = self.inner.read().expect("realm store poisoned");
        let mut realms: Vec<Realm> = inner
            .by_id
            .values()
            .filter(|realm| filter.matches(realm))
            .cloned()
            .collect();
        realms.sort_by(|a, b| a.execution_context_id.cmp(&b.execution_context_id));
        realms
    }

    /// Remove the realm for a destroyed execution context.
    pub fn remove_by_execution_context(
        &self,
        cdp_session_id: &str,
        execution_context_id: i64,
    ) -> Option<Realm> {
        let mut inner = self.inner.write().expect("realm store poisoned");
        let key = (cdp_session_id.to_string(), execution_context_id);
        let realm_id = inner.by_execution_context.remove(&key)?;
        inner.by_id.remove(&realm_id)
    }

    /// Remove every realm on a detached session.
    pub fn remove_by_session(&self, cdp_session_id: &str) -> Vec<Realm> {
        let mut inner = self.inner.write().expect("realm store poisoned");
        let ids: Vec<String> = inner
            .by_id
            .values()
            .filter(|realm| realm.cdp_session_id == cdp_session_id)
            .map(|realm| realm.id.clone())
            .collect();

        let mut removed = Vec::new();
        for id in ids {
            if let Some(realm) = inner.by_id.remove(&id) {
                inner
                    .by_execution_context
                    .remove(&(realm.cdp_session_id.clone(), realm.execution_context_id));
                removed.push(realm);
            }
        }
        removed
    }
}
