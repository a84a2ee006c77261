//! session.* commands: capability negotiation and subscriptions

use super::CommandContext;
use crate::{Error, Result};
use serde::Deserialize;
use serde_json::{json, Map, Value};

/// Normalized `unhandledPromptBehavior` forms
const PROMPT_BEHAVIORS: &[(&str, &str)] = &[
    ("accept", "accept"),
    ("accept and notify", "accept"),
    ("dismiss", "dismiss"),
    ("dismiss and notify", "dismiss"),
    ("ignore", "ignore"),
];

/// Merge W3C `firstMatch` × `alwaysMatch` capability candidates and pick the
/// one to run with: the first whose `browserName` is `chrome`, else the
/// first candidate.
pub fn merge_capabilities(capabilities: &Value) -> Result<Value> {
    let always = capabilities
        .get("alwaysMatch")
        .cloned()
        .unwrap_or_else(|| json!({}));
    let always = always
        .as_object()
        .ok_or_else(|| Error::SessionNotCreated("alwaysMatch must be an object".to_string()))?
        .clone();

    let first_match: Vec<Value> = match capabilities.get("firstMatch") {
        Some(Value::Array(list)) if !list.is_empty() => list.clone(),
        Some(Value::Array(_)) | None => vec![json!({})],
        Some(_) => {
            return Err(Error::SessionNotCreated(
                "firstMatch must be an array".to_string(),
            ))
        }
    };

    let mut candidates = Vec::new();
    for first in &first_match {
        let first = first.as_object().ok_or_else(|| {
            Error::SessionNotCreated("firstMatch entries must be objects".to_string())
        })?;

        let mut merged: Map<String, Value> = always.clone();
        for (key, value) in first {
            if merged.contains_key(key) {
                return Err(Error::SessionNotCreated(format!(
                    "Conflicting capability '{}' in alwaysMatch and firstMatch",
                    key
                )));
            }
            merged.insert(key.clone(), value.clone());
        }
        candidates.push(merged);
    }

    let chosen = candidates
        .iter()
        .find(|candidate| {
            candidate
                .get("browserName")
                .and_then(Value::as_str)
                .is_some_and(|name| name == "chrome")
        })
        .or_else(|| candidates.first())
        .cloned()
        .unwrap_or_default();

    let mut result = Value::Object(chosen);
    if let Some(behavior) = result.get("unhandledPromptBehavior").cloned() {
        result["unhandledPromptBehavior"] = normalize_prompt_behavior(&behavior)?;
    }
    Ok(result)
}

/// Normalize the prompt behavior capability into `{default: ...}` form.
fn normalize_prompt_behavior(value: &Value) -> Result<Value> {
    let resolve = |name: &str| -> Result<&'static str> {
        PROMPT_BEHAVIORS
            .iter()
            .find(|(from, _)| *from == name)
            .map(|(_, to)| *to)
            .ok_or_else(|| {
                Error::invalid_argument(format!("Unknown unhandledPromptBehavior: {}", name))
            })
    };

    match value {
        Value::String(name) => Ok(json!({"default": resolve(name)?})),
        Value::Object(map) => {
            let default = map
                .get("default")
                .and_then(Value::as_str)
                .unwrap_or("ignore");
            Ok(json!({"default": resolve(default)?}))
        }
        _ => Err(Error::invalid_argument(
            "unhandledPromptBehavior must be a string or object",
        )),
    }
}

#[derive(Debug, Deserialize)]
struct SubscriptionParams {
    events: Vec<String>,
    #[serde(default)]
    contexts: Option<Vec<String>>,
}

/// Dispatch one `session.*` command (post-association).
pub async fn process(
    ctx: &CommandContext,
    method: &str,
    params: Value,
    channel: Option<&str>,
) -> Result<Value> {
    match method {
        "session.subscribe" => {
            let params: SubscriptionParams = serde_json::from_value(params)
                .map_err(|e| Error::invalid_argument(e.to_string()))?;
            let contexts = params.contexts.unwrap_or_default();
            ctx.stores
                .events
                .subscribe(&params.events, &contexts, channel)?;
            Ok(json!({}))
        }
        "session.unsubscribe" => {
            let params: SubscriptionParams = serde_json::from_value(params)
                .map_err(|e| Error::invalid_argument(e.to_string()))?;
            let contexts = params.contexts.unwrap_or_default();
            ctx.stores
                .events
                .unsubscribe(&params.events, &contexts, channel)?;
            Ok(json!({}))
        }
        other => Err(Error::UnknownCommand(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_prefers_chrome_candidate() {
        let capabilities = json!({
            "firstMatch": [
                {"browserName": "firefox"},
                {"browserName": "chrome", "acceptInsecureCerts": true},
            ]
        });
        let merged = merge_capabilities(&capabilities).unwrap();
        assert_eq!(merged["browserName"], "chrome");
        assert_eq!(merged["acceptInsecureCerts"], true);
    }

    #[test]
    fn merge_falls_back_to_first_candidate() {
        let capabilities = json!({
            "firstMatch": [{"browserName": "firefox"}, {"browserName": "safari"}]
        });
        let merged = merge_capabilities(&capabilities).unwrap();
        assert_eq!(merged["browserName"], "firefox");
    }

    #[test]
    fn conflicting_keys_are_rejected() {
        let capabilities = json!({
            "alwaysMatch": {"browserName": "chrome"},
            "firstMatch": [{"browserName": "chrome"}]
        });
        let err = merge_capabilities(&capabilities).unwrap_err();
        assert_eq!(err.bidi_code(), "session not created");
    }

    #[test]
    fn always_match_flows_into_every_candidate() {
        let capabilities = json!({
            "alwaysMatch": {"acceptInsecureCerts": true},
            "firstMatch": [{"browserName": "chrome"}]
        });
        let merged = merge_capabilities(&capabilities).unwrap();
        assert_eq!(merged["acceptInsecureCerts"], true);
    }

    #[test]
    fn prompt_behavior_normalizes_to_default_form() {
        let merged = merge_capabilities(&json!({
            "alwaysMatch": {"unhandledPromptBehavior": "dismiss and notify"}
        }))
        .unwrap();
        assert_eq!(merged["unhandledPromptBehavior"], json!({"default": "dismiss"}));

        let merged = merge_capabilities(&json!({
            "alwaysMatch": {"unhandledPromptBehavior": {"default": "accept"}}
        }))
        .unwrap();
        assert_eq!(merged["unhandledPromptBehavior"], json!({"default": "accept"}));
    }

    #[test]
    fn unknown_prompt_behavior_is_invalid() {
        let err = merge_capabilities(&json!({
            "alwaysMatch": {"unhandledPromptBehavior": "explode"}
        }))
        .unwrap_err();
        assert_eq!(err.bidi_code(), "invalid argument");
    }

    #[test]
    fn empty_capabilities_merge_to_empty() {
        let merged = merge_capabilities(&json!({})).unwrap();
        assert_eq!(merged, json!({}));
    }
}
