//! Preload script store
//!
//! One BiDi preload script maps to many CDP script ids, one per target it
//! was installed into. The store owns the scripts; targets only hold the
//! BiDi ids, so removal can sweep every CDP registration.

use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// A channel argument declared by a preload script
#[derive(Debug, Clone)]
pub struct ChannelProperties {
    /// Client-chosen channel label carried on emitted `script.message` events
    pub channel: String,
}

/// One preload script
#[derive(Debug, Clone)]
pub struct PreloadScript {
    pub id: String,
    pub function_declaration: String,
    /// Sandbox (world) name; None = main world
    pub sandbox: Option<String>,
    /// Top-level context scope; None = every target
    pub contexts: Option<Vec<String>>,
    pub channels: Vec<ChannelProperties>,
    /// (cdp session id, cdp script id) per target installation
    pub cdp_ids: Vec<(String, String)>,
}

impl PreloadScript {
    /// Registry key for one channel of this script, stable across realms.
    pub fn channel_key(&self, channel: &ChannelProperties) -> String {
        format!("{}:{}", self.id, channel.channel)
    }

    /// The source installed via `Page.addScriptToEvaluateOnNewDocument`:
    /// the user function invoked with one sendMessage callback per declared
    /// channel, each backed by a `{getMessage, sendMessage}` queue parked in
    /// a window-scoped registry for the host-side poll loop.
    pub fn wrapped_source(&self) -> String {
        if self.channels.is_empty() {
            return format!("({})();", self.function_declaration);
        }

        let args: Vec<String> = self
            .channels
            .iter()
            .map(|channel| {
                format!("__bidiChannel({})", serde_json::json!(self.channel_key(channel)))
            })
            .collect();

        format!(
            r#"(() => {{
  window.__bidiChannels = window.__bidiChannels || {{}};
  const __bidiChannel = (key) => {{
    const pending = [];
    const waiting = [];
    const queue = {{
      sendMessage(message) {{
        if (waiting.length) {{ waiting.shift()(message); }} else {{ pending.push(message); }}
      }},
      getMessage() {{
        return pending.length
          ? Promise.resolve(pending.shift())
          : new Promise((resolve) => {{ waiting.push(resolve); }});
      }},
    }};
    window.__bidiChannels[key] = queue;
    return queue.sendMessage.bind(queue);
  }};
  ({})({});
}})();"#,
            self.function_declaration,
            args.join(", ")
        )
    }

    /// Whether this script applies to a target whose top-level context is
    /// `context` (None while the target has no parent context yet).
    pub fn applies_to(&self, context: Option<&str>) -> bool {
        match (&self.contexts, context) {
            (None, _) => true,
            (Some(scope), Some(id)) => scope.iter().any(|c| c == id),
            (Some(_), None) => false,
        }
    }
}

/// Registry of preload scripts
#[derive(Debug, Default)]
pub struct PreloadScriptStore {
    inner: RwLock<HashMap<String, PreloadScript>>,
}

impl PreloadScriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a script. Returns its BiDi id.
    pub fn add(
        &self,
        function_declaration: &str,
        sandbox: Option<String>,
        contexts: Option<Vec<String>>,
        channels: Vec<ChannelProperties>,
    ) -> PreloadScript {
        let script = PreloadScript {
            id: Uuid::new_v4().to_string(),
            function_declaration: function_declaration.to_string(),
            sandbox,
            contexts,
            channels,
            cdp_ids: Vec::new(),
        };
        self.inner
            .write()
            .expect("preload store poisoned")
            .insert(script.id.clone(), script.clone());
        script
    }

    pub fn get(&self, id: &str) -> Option<PreloadScript> {
        self.inner
            .read()
            .expect("preload store poisoned")
            .get(id)
            .cloned()
    }

    /// Remove a script, returning it with the CDP ids to sweep.
    pub fn remove(&self, id: &str) -> Result<PreloadScript> {
        self.inner
            .write()
            .expect("preload store poisoned")
            .remove(id)
            .ok_or_else(|| Error::no_such_script(id))
    }

    /// Scripts that apply to a new target scoped to `context`.
    pub fn scripts_for_target(&self, context: Option<&str>) -> Vec<PreloadScript> {
        self.inner
            .read()
            .expect("preload store poisoned")
            .values()
            .filter(|script| script.applies_to(context))
            .cloned()
            .collect()
    }

    /// Record the CDP id a target handed back for one installation.
    pub fn record_cdp_id(&self, bidi_id: &str, cdp_session_id: &str, cdp_script_id: &str) {
        let mut map = self.inner.write().expect("preload store poisoned");
        if let Some(script) = map.get_mut(bidi_id) {
            script
                .cdp_ids
                .push((cdp_session_id.to_string(), cdp_script_id.to_string()));
        }
    }

    /// Forget installations on a detached session.
    pub fn forget_session(&self, cdp_session_id: &str) {
        let mut map = self.inner.write().expect("preload store poisoned");
        for script in map.values_mut() {
            script.cdp_ids.retain(|(session, _)| session != cdp_session_id);
        }
    }
}
