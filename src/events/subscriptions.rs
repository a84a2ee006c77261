//! Subscription manager
//!
//! Maps (event name, top-level context, channel) to subscribers. Module
//! names unroll to their atomic events at the boundary; context ids resolve
//! to their top-level ancestors. Unsubscription is attribute-based: it
//! matches existing subscriptions by attributes and splits partially-matched
//! ones into per-event remainders, committing atomically or not at all.

use crate::context::BrowsingContextStore;
use crate::events::names;
use crate::{Error, Result};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// One subscription record
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: String,
    /// Empty set = global (matches every context)
    pub top_level_contexts: HashSet<String>,
    /// Never empty; atomic event names plus possibly the open-ended `cdp`
    pub event_names: HashSet<String>,
    pub channel: Option<String>,
}

impl Subscription {
    fn matches_context(&self, top_level_context: Option<&str>) -> bool {
        if self.top_level_contexts.is_empty() {
            return true;
        }
        match top_level_context {
            Some(id) => self.top_level_contexts.contains(id),
            // Context-less events are only seen by global subscriptions.
            None => false,
        }
    }

    /// Whether this subscription covers `name` (an atomic event or module).
    fn matches_event(&self, name: &str) -> bool {
        if self.event_names.contains(name) {
            return true;
        }
        if let Some(module) = names::module_of(name) {
            if self.event_names.contains(module) {
                return true;
            }
        }
        // A module query also matches subscriptions to any of its events.
        if names::is_module(name) {
            return self
                .event_names
                .iter()
                .any(|event| names::module_of(event) == Some(name));
        }
        false
    }
}

/// Registry of active subscriptions
pub struct SubscriptionManager {
    contexts: Arc<BrowsingContextStore>,
    subscriptions: Vec<Subscription>,
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

impl SubscriptionManager {
    pub fn new(contexts: Arc<BrowsingContextStore>) -> Self {
        Self {
            contexts,
            subscriptions: Vec::new(),
        }
    }

    /// Resolve requested context ids to unique top-level ancestors.
    fn resolve_top_levels(&self, context_ids: &[String]) -> Result<HashSet<String>> {
        let mut top_levels = HashSet::new();
        for id in context_ids {
            let top = self
                .contexts
                .find_top_level_context_id(id)
                .ok_or_else(|| Error::no_such_frame(id.clone()))?;
            top_levels.insert(top);
        }
        Ok(top_levels)
    }

    /// Create one subscription covering the unrolled events and resolved
    /// top-level contexts. Returns its id.
    pub fn subscribe(
        &mut self,
        event_names: &[String],
        context_ids: &[String],
        channel: Option<&str>,
    ) -> Result<String> {
        if event_names.is_empty() {
            return Err(Error::invalid_argument("At least one event must be specified."));
        }
        let events = names::unroll_all(event_names)?;
        let top_levels = self.resolve_top_levels(context_ids)?;

        let subscription = Subscription {
            id: Uuid::new_v4().to_string(),
            top_level_contexts: top_levels,
            event_names: events.into_iter().collect(),
            channel: channel.map(str::to_string),
        };
        let id = subscription.id.clone();
        self.subscriptions.push(subscription);
        Ok(id)
    }

    /// Attribute-based unsubscribe.
    ///
    /// Builds the unrolled event set and resolved top-level set, walks the
    /// existing subscriptions, and rewrites the matched ones. Fails with
    /// `invalid argument` - leaving the store untouched - when any requested
    /// event or context matched nothing.
    pub fn unsubscribe(
        &mut self,
        event_names: &[String],
        context_ids: &[String],
        channel: Option<&str>,
    ) -> Result<()> {
        if event_names.is_empty() {
            return Err(Error::invalid_argument("At least one event must be specified."));
        }
        let events: HashSet<String> = names::unroll_all(event_names)?.into_iter().collect();
        let top_levels = self.resolve_top_levels(context_ids)?;
        let global = top_levels.is_empty();

        let mut matched_events: HashSet<&String> = HashSet::new();
        let mut matched_contexts: HashSet<&String> = HashSet::new();
        let mut rewritten: Vec<Subscription> = Vec::new();

        for sub in &self.subscriptions {
            if sub.channel.as_deref() != channel {
                rewritten.push(sub.clone());
                continue;
            }

            if global {
                // Global unsubscribe touches global subscriptions only.
                if !sub.top_level_contexts.is_empty() {
                    rewritten.push(sub.clone());
                    continue;
                }
                let intersection: HashSet<&String> =
                    sub.event_names.intersection(&events).collect();
                if intersection.is_empty() {
                    rewritten.push(sub.clone());
                    continue;
                }
                for event in &intersection {
                    matched_events.insert(events.get(event.as_str()).expect("intersected"));
                }
                let remainder: HashSet<String> =
                    sub.event_names.difference(&events).cloned().collect();
                if !remainder.is_empty() {
                    rewritten.push(Subscription {
                        id: sub.id.clone(),
                        top_level_contexts: HashSet::new(),
                        event_names: remainder,
                        channel: sub.channel.clone(),
                    });
                }
            } else {
                let event_overlap: HashSet<&String> =
                    sub.event_names.intersection(&events).collect();
                let context_overlap: HashSet<&String> = sub
                    .top_level_contexts
                    .intersection(&top_levels)
                    .collect();
                if event_overlap.is_empty() || context_overlap.is_empty() {
                    rewritten.push(sub.clone());
                    continue;
                }
                for event in &event_overlap {
                    matched_events.insert(events.get(event.as_str()).expect("intersected"));
                }
                for context in &context_overlap {
                    matched_contexts.insert(top_levels.get(context.as_str()).expect("intersected"));
                }

                // Split into per-event remainders.
                for event in &sub.event_names {
                    let remaining_contexts: HashSet<String> = if events.contains(event) {
                        sub.top_level_contexts
                            .difference(&top_levels)
                            .cloned()
                            .collect()
                    } else {
                        sub.top_level_contexts.clone()
                    };
                    if remaining_contexts.is_empty() {
                        continue;
                    }
                    rewritten.push(Subscription {
                        id: Uuid::new_v4().to_string(),
                        top_level_contexts: remaining_contexts,
                        event_names: HashSet::from([event.clone()]),
                        channel: sub.channel.clone(),
                    });
                }
            }
        }

        if matched_events.len() != events.len() {
            return Err(Error::invalid_argument(
                "Cannot unsubscribe from an event that was not subscribed to",
            ));
        }
        if !global && matched_contexts.len() != top_levels.len() {
            return Err(Error::invalid_argument(
                "Cannot unsubscribe from a context that has no subscription",
            ));
        }

        self.subscriptions = rewritten;
        Ok(())
    }

    /// Unique channels subscribed to `name` for an event associated with
    /// `top_level_context` (None for context-less events).
    pub fn channels_subscribed_to_event(
        &self,
        name: &str,
        top_level_context: Option<&str>,
    ) -> Vec<Option<String>> {
        let mut channels = Vec::new();
        for sub in &self.subscriptions {
            if !sub.matches_context(top_level_context) || !sub.matches_event(name) {
                continue;
            }
            if !channels.contains(&sub.channel) {
                channels.push(sub.channel.clone());
            }
        }
        channels
    }

    /// Whether anything is subscribed to `name` for the given context.
    pub fn is_subscribed_to(&self, name: &str, top_level_context: Option<&str>) -> bool {
        self.subscriptions
            .iter()
            .any(|sub| sub.matches_context(top_level_context) && sub.matches_event(name))
    }

    /// Whether any subscription, in any scope or channel, covers the module.
    pub fn is_module_subscribed_anywhere(&self, module: &str) -> bool {
        self.subscriptions.iter().any(|sub| sub.matches_event(module))
    }

    /// Drop every subscription on one channel (connection teardown).
    pub fn remove_channel(&mut self, channel: Option<&str>) {
        self.subscriptions
            .retain(|sub| sub.channel.as_deref() != channel);
    }
}
