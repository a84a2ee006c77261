//! Browsing context store
//!
//! The frame tree. Contexts are keyed by id with parent ids as lookups, so
//! the parent/child cycle with CDP targets never turns into owning pointers.
//! Mutators are idempotent: CDP events may interleave with command handling
//! and re-deliver attach/detach notifications.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// Document load progress of a context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Init,
    DomContentLoaded,
    Loaded,
}

/// One browsing context (frame)
#[derive(Debug, Clone)]
pub struct BrowsingContext {
    pub id: String,
    /// None iff this is a top-level traversable
    pub parent: Option<String>,
    pub url: String,
    pub children: HashSet<String>,
    pub lifecycle: LifecycleState,
    /// The CDP session driving this context's target
    pub cdp_session_id: String,
    /// Loader id of the current document (shared-id document component)
    pub loader_id: Option<String>,
}

/// Registry of all known browsing contexts
#[derive(Debug, Default)]
pub struct BrowsingContextStore {
    inner: RwLock<HashMap<String, BrowsingContext>>,
}

impl BrowsingContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a context. Re-inserting an existing id refreshes its session
    /// and parent link but keeps accumulated children.
    pub fn add(&self, id: &str, parent: Option<&str>, url: &str, cdp_session_id: &str) {
        let mut map = self.inner.write().expect("context store poisoned");

        let children = map
            .get(id)
            .map(|existing| existing.children.clone())
            .unwrap_or_default();

        map.insert(
            id.to_string(),
            BrowsingContext {
                id: id.to_string(),
                parent: parent.map(str::to_string),
                url: url.to_string(),
                children,
                lifecycle: LifecycleState::Init,
                cdp_session_id: cdp_session_id.to_string(),
                loader_id: None,
            },
        );

        if let Some(parent_id) = parent {
            if let Some(parent_ctx) = map.get_mut(parent_id) {
                parent_ctx.children.insert(id.to_string());
            }
        }
    }

    /// Remove a context and its descendants. Returns every removed id,
    /// parents before children.
    pub fn remove(&self, id: &str) -> Vec<String> {
        let mut map = self.inner.write().expect("context store poisoned");

        let mut removed = Vec::new();
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            if let Some(ctx) = map.remove(&current) {
                stack.extend(ctx.children.iter().cloned());
                removed.push(current);
            }
        }

        if let Some(first) = removed.first() {
            for ctx in map.values_mut() {
                ctx.children.remove(first);
            }
        }

        removed
    }

    pub fn get(&self, id: &str) -> Option<BrowsingContext> {
        self.inner
            .read()
            .expect("context store poisoned")
            .get(id)
            .cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner
            .read()
            .expect("context store poisoned")
            .contains_key(id)
    }

    pub fn set_url(&self, id: &str, url: &str) {
        let mut map = self.inner.write().expect("context store poisoned");
        if let Some(ctx) = map.get_mut(id) {
            ctx.url = url.to_string();
        }
    }

    pub fn set_lifecycle(&self, id: &str, state: LifecycleState) {
        let mut map = self.inner.write().expect("context store poisoned");
        if let Some(ctx) = map.get_mut(id) {
            ctx.lifecycle = state;
        }
    }

    pub fn set_loader(&self, id: &str, loader_id: &str) {
        let mut map = self.inner.write().expect("context store poisoned");
        if let Some(ctx) = map.get_mut(id) {
            ctx.loader_id = Some(loader_id.to_string());
        }
    }

    /// Walk parent links to the top-level ancestor. Total for known ids,
    /// idempotent for top-level ids.
    pub fn find_top_level_context_id(&self, id: &str) -> Option<String> {
        let map = self.inner.read().expect("context store poisoned");
        let mut current = map.get(id)?;
        while let Some(parent_id) = &current.parent {
            match map.get(parent_id) {
                Some(parent) => current = parent,
                // Dangling parent link: the ancestor detached first.
                None => break,
            }
        }
        Some(current.id.clone())
    }

    /// Ids of all top-level contexts.
    pub fn top_level_ids(&self) -> Vec<String> {
        let map = self.inner.read().expect("context store poisoned");
        let mut ids: Vec<String> = map
            .values()
            .filter(|ctx| ctx.parent.is_none())
            .map(|ctx| ctx.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// All contexts owned by one CDP session.
    pub fn by_session(&self, cdp_session_id: &str) -> Vec<BrowsingContext> {
        self.inner
            .read()
            .expect("context store poisoned")
            .values()
            .filter(|ctx| ctx.cdp_session_id == cdp_session_id)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_tree() -> BrowsingContextStore {
        let store = BrowsingContextStore::new();
        store.add("top", None, "https://a.test/", "S1");
        store.add("child", Some("top"), "https://a.test/frame", "S2");
        store.add("grandchild", Some("child"), "https://a.test/inner", "S3");
        store
    }

    #[test]
    fn top_level_resolution_is_total_and_idempotent() {
        let store = store_with_tree();
        assert_eq!(store.find_top_level_context_id("grandchild").as_deref(), Some("top"));
        assert_eq!(store.find_top_level_context_id("child").as_deref(), Some("top"));
        assert_eq!(store.find_top_level_context_id("top").as_deref(), Some("top"));
        assert_eq!(store.find_top_level_context_id("missing"), None);
    }

    #[test]
    fn parent_iff_not_top_level() {
        let store = store_with_tree();
        assert!(store.get("top").unwrap().parent.is_none());
        assert!(store.get("child").unwrap().parent.is_some());
        assert_eq!(store.top_level_ids(), vec!["top"]);
    }

    #[test]
    fn remove_cascades_to_descendants() {
        let store = store_with_tree();
        let removed = store.remove("child");
        assert_eq!(removed.len(), 2);
        assert!(!store.contains("child"));
        assert!(!store.contains("grandchild"));
        assert!(store.contains("top"));
        assert!(store.get("top").unwrap().children.is_empty());
    }

    #[test]
    fn reinsert_keeps_children() {
        let store = store_with_tree();
        store.add("child", Some("top"), "https://a.test/frame2", "S2");
        assert!(store.get("child").unwrap().children.contains("grandchild"));
        assert_eq!(store.get("child").unwrap().url, "https://a.test/frame2");
    }
}
