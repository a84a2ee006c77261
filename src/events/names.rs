//! BiDi event names
//!
//! The event-name set is computed statically: each module maps to its atomic
//! events, and module subscriptions "unroll" to that set. The `cdp` module is
//! open-ended (`cdp.<Domain.method>` mirrors the raw CDP stream) so it never
//! unrolls.

use crate::{Error, Result};
use phf::phf_map;

/// Atomic events per module
static EVENTS_BY_MODULE: phf::Map<&'static str, &'static [&'static str]> = phf_map! {
    "browsingContext" => &[
        "browsingContext.contextCreated",
        "browsingContext.contextDestroyed",
        "browsingContext.navigationStarted",
        "browsingContext.fragmentNavigated",
        "browsingContext.domContentLoaded",
        "browsingContext.load",
    ],
    "network" => &[
        "network.beforeRequestSent",
        "network.responseStarted",
        "network.responseCompleted",
        "network.fetchError",
        "network.authRequired",
    ],
    "script" => &[
        "script.message",
        "script.realmCreated",
        "script.realmDestroyed",
    ],
    "log" => &[
        "log.entryAdded",
    ],
};

/// The open-ended raw-CDP mirror module
pub const CDP_MODULE: &str = "cdp";

/// The network module name (gates CDP Network/Fetch domain enabling)
pub const NETWORK_MODULE: &str = "network";

/// Whether `name` is a module name.
pub fn is_module(name: &str) -> bool {
    name == CDP_MODULE || EVENTS_BY_MODULE.contains_key(name)
}

/// The module an event name belongs to (`network.beforeRequestSent` →
/// `network`, `cdp.Network.requestWillBeSent` → `cdp`).
pub fn module_of(event_name: &str) -> Option<&str> {
    let module = event_name.split('.').next()?;
    if is_module(module) {
        Some(module)
    } else {
        None
    }
}

/// Whether `name` is a known atomic event.
pub fn is_event(name: &str) -> bool {
    match module_of(name) {
        Some(CDP_MODULE) => name.len() > CDP_MODULE.len() + 1,
        Some(module) => EVENTS_BY_MODULE
            .get(module)
            .is_some_and(|events| events.contains(&name)),
        None => false,
    }
}

/// Expand a module or event name into atomic event names.
///
/// Module names unroll to every event of the module; atomic names map to
/// themselves. The `cdp` module stays as-is (its event set is unbounded).
/// Unknown names are an `invalid argument`.
pub fn unroll(name: &str) -> Result<Vec<String>> {
    if name == CDP_MODULE {
        return Ok(vec![CDP_MODULE.to_string()]);
    }
    if let Some(events) = EVENTS_BY_MODULE.get(name) {
        return Ok(events.iter().map(|e| e.to_string()).collect());
    }
    if is_event(name) {
        return Ok(vec![name.to_string()]);
    }
    Err(Error::invalid_argument(format!(
        "Unknown event or module name: {}",
        name
    )))
}

/// Expand a list of names, deduplicating while preserving first-seen order.
pub fn unroll_all(names: &[String]) -> Result<Vec<String>> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for name in names {
        for event in unroll(name)? {
            if seen.insert(event.clone()) {
                out.push(event);
            }
        }
    }
    Ok(out)
}
