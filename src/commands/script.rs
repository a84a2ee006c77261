//! script.* commands: preload scripts, evaluation, realms

use super::CommandContext;
use crate::cdp::CdpSession;
use crate::context::{Realm, RealmFilter, RealmType};
use crate::script::{get_shared_id, parse_shared_id, ChannelProperties};
use crate::{Error, Result};
use serde::Deserialize;
use serde_json::{json, Map, Value};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddPreloadScriptParams {
    function_declaration: String,
    #[serde(default)]
    arguments: Option<Vec<Value>>,
    #[serde(default)]
    sandbox: Option<String>,
    #[serde(default)]
    contexts: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RemovePreloadScriptParams {
    script: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScriptTarget {
    Realm { realm: String },
    Context {
        context: String,
        #[serde(default)]
        sandbox: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateParams {
    expression: String,
    target: ScriptTarget,
    #[serde(default)]
    await_promise: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallFunctionParams {
    function_declaration: String,
    target: ScriptTarget,
    #[serde(default)]
    await_promise: bool,
    #[serde(default)]
    this: Option<Value>,
    #[serde(default)]
    arguments: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct DisownParams {
    handles: Vec<String>,
    target: ScriptTarget,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetRealmsParams {
    #[serde(default)]
    context: Option<String>,
    #[serde(rename = "type", default)]
    realm_type: Option<String>,
}

/// Dispatch one `script.*` command.
pub async fn process(ctx: &CommandContext, method: &str, params: Value) -> Result<Value> {
    match method {
        "script.addPreloadScript" => add_preload_script(ctx, parse(params)?).await,
        "script.removePreloadScript" => remove_preload_script(ctx, parse(params)?).await,
        "script.evaluate" => evaluate(ctx, parse(params)?).await,
        "script.callFunction" => call_function(ctx, parse(params)?).await,
        "script.disown" => disown(ctx, parse(params)?).await,
        "script.getRealms" => get_realms(ctx, parse(params)?),
        other => Err(Error::UnknownCommand(other.to_string())),
    }
}

fn parse<T: serde::de::DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| Error::invalid_argument(e.to_string()))
}

// -- preload scripts ---------------------------------------------------------

fn channels_from_arguments(arguments: &Option<Vec<Value>>) -> Vec<ChannelProperties> {
    arguments
        .iter()
        .flatten()
        .filter(|arg| arg.get("type").and_then(Value::as_str) == Some("channel"))
        .filter_map(|arg| {
            arg.get("value")
                .and_then(|value| value.get("channel"))
                .and_then(Value::as_str)
                .map(|channel| ChannelProperties {
                    channel: channel.to_string(),
                })
        })
        .collect()
}

async fn add_preload_script(ctx: &CommandContext, params: AddPreloadScriptParams) -> Result<Value> {
    if let Some(contexts) = &params.contexts {
        if contexts.is_empty() {
            return Err(Error::invalid_argument(
                "contexts must not be empty when provided",
            ));
        }
        for context_id in contexts {
            let context = ctx
                .stores
                .contexts
                .get(context_id)
                .ok_or_else(|| Error::no_such_frame(context_id.clone()))?;
            if context.parent.is_some() {
                return Err(Error::invalid_argument(format!(
                    "Context '{}' is not a top-level browsing context",
                    context_id
                )));
            }
        }
    }

    let channels = channels_from_arguments(&params.arguments);
    let script = ctx.stores.preload.add(
        &params.function_declaration,
        params.sandbox.clone(),
        params.contexts.clone(),
        channels,
    );

    // Install on every live target the scope covers.
    for target in ctx.registry.targets() {
        let scope = ctx
            .stores
            .contexts
            .find_top_level_context_id(target.target_id());
        if !script.applies_to(scope.as_deref()) {
            continue;
        }
        target.wait_unblocked().await;

        let mut install = json!({
            "source": script.wrapped_source(),
            "runImmediately": true,
        });
        if let Some(sandbox) = &script.sandbox {
            install["worldName"] = json!(sandbox);
        }
        match target
            .session()
            .send_command("Page.addScriptToEvaluateOnNewDocument", install)
            .await
        {
            Ok(result) => {
                if let Some(cdp_id) = result.get("identifier").and_then(Value::as_str) {
                    ctx.stores
                        .preload
                        .record_cdp_id(&script.id, target.cdp_session_id(), cdp_id);
                }
            }
            Err(e) if e.is_close_error() => {}
            Err(e) => return Err(e),
        }
    }

    Ok(json!({"script": script.id}))
}

async fn remove_preload_script(
    ctx: &CommandContext,
    params: RemovePreloadScriptParams,
) -> Result<Value> {
    let script = ctx.stores.preload.remove(&params.script)?;

    // Reverse sweep: every CDP registration recorded under the BiDi id.
    for (session_id, cdp_id) in &script.cdp_ids {
        let Some(target) = ctx.registry.get_by_session(session_id) else {
            continue;
        };
        match target
            .session()
            .send_command(
                "Page.removeScriptToEvaluateOnNewDocument",
                json!({"identifier": cdp_id}),
            )
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_close_error() => {}
            Err(e) => return Err(e),
        }
    }

    Ok(json!({}))
}

// -- realm resolution --------------------------------------------------------

struct ResolvedRealm {
    realm: Realm,
    session: CdpSession,
}

async fn resolve_realm(ctx: &CommandContext, target: &ScriptTarget) -> Result<ResolvedRealm> {
    match target {
        ScriptTarget::Realm { realm } => {
            let realm = ctx
                .stores
                .realms
                .get(realm)
                .ok_or_else(|| Error::invalid_argument(format!("No realm '{}'", realm)))?;
            let target = ctx
                .registry
                .get_by_session(&realm.cdp_session_id)
                .ok_or_else(|| Error::invalid_argument("Realm's target is gone"))?;
            Ok(ResolvedRealm {
                session: target.session().clone(),
                realm,
            })
        }
        ScriptTarget::Context { context, sandbox } => {
            let target_handle = ctx.registry.target_for_context(context)?;
            target_handle.wait_unblocked().await;

            let filter = RealmFilter {
                browsing_context_id: Some(context.clone()),
                realm_type: Some(RealmType::Window),
                sandbox: Some(sandbox.clone()),
                ..Default::default()
            };
            if let Some(realm) = ctx.stores.realms.find_realm(&filter) {
                return Ok(ResolvedRealm {
                    session: target_handle.session().clone(),
                    realm,
                });
            }

            // Sandboxes are created on demand.
            if let Some(world_name) = sandbox {
                let result = target_handle
                    .session()
                    .send_command(
                        "Page.createIsolatedWorld",
                        json!({
                            "frameId": context,
                            "worldName": world_name,
                            "grantUniveralAccess": true,
                        }),
                    )
                    .await?;
                let execution_context_id = result
                    .get("executionContextId")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| Error::unknown("createIsolatedWorld returned no context"))?;
                let realm = ctx.stores.realms.add(
                    RealmType::Window,
                    target_handle.cdp_session_id(),
                    execution_context_id,
                    "",
                    Some(world_name.clone()),
                    vec![context.clone()],
                );
                return Ok(ResolvedRealm {
                    session: target_handle.session().clone(),
                    realm,
                });
            }

            Err(Error::unknown(format!(
                "No realm found for context '{}'",
                context
            )))
        }
    }
}

// -- value conversion --------------------------------------------------------

/// Convert one BiDi LocalValue into a CDP CallArgument.
async fn local_value_to_call_argument(
    ctx: &CommandContext,
    resolved: &ResolvedRealm,
    value: &Value,
) -> Result<Value> {
    if let Some(shared_id) = value.get("sharedId").and_then(Value::as_str) {
        return shared_id_to_object(ctx, resolved, shared_id).await;
    }
    if let Some(handle) = value.get("handle").and_then(Value::as_str) {
        return Ok(json!({"objectId": handle}));
    }

    match value.get("type").and_then(Value::as_str) {
        Some("undefined") | None => Ok(json!({})),
        Some("null") => Ok(json!({"value": Value::Null})),
        Some("string") | Some("boolean") => Ok(json!({"value": value.get("value")})),
        Some("number") => match value.get("value") {
            Some(Value::String(special)) => Ok(json!({"unserializableValue": special})),
            other => Ok(json!({"value": other})),
        },
        Some("bigint") => {
            let digits = value
                .get("value")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Ok(json!({"unserializableValue": format!("{}n", digits)}))
        }
        Some("channel") => {
            // Channel arguments are only meaningful in preload scripts.
            Ok(json!({}))
        }
        Some(other) => Err(Error::invalid_argument(format!(
            "Unsupported argument type: {}",
            other
        ))),
    }
}

async fn shared_id_to_object(
    ctx: &CommandContext,
    resolved: &ResolvedRealm,
    shared_id: &str,
) -> Result<Value> {
    let parsed = parse_shared_id(shared_id).ok_or_else(|| {
        Error::no_such_node(format!("SharedId '{}' was not found.", shared_id))
    })?;

    // A shared id is only valid within the document that minted it.
    if let Some(context_id) = resolved.realm.associated_contexts.first() {
        if let Some(context) = ctx.stores.contexts.get(context_id) {
            if let Some(loader) = &context.loader_id {
                if *loader != parsed.document_id {
                    return Err(Error::no_such_node(format!(
                        "SharedId '{}' belongs to a different document.",
                        shared_id
                    )));
                }
            }
        }
    }

    let result = resolved
        .session
        .send_command(
            "DOM.resolveNode",
            json!({
                "backendNodeId": parsed.backend_node_id,
                "executionContextId": resolved.realm.execution_context_id,
            }),
        )
        .await
        .map_err(|_| Error::no_such_node(format!("SharedId '{}' was not found.", shared_id)))?;

    result
        .get("object")
        .and_then(|object| object.get("objectId"))
        .and_then(Value::as_str)
        .map(|object_id| json!({"objectId": object_id}))
        .ok_or_else(|| Error::no_such_node(format!("SharedId '{}' was not found.", shared_id)))
}

/// Map a CDP deep-serialized value to a BiDi RemoteValue, attaching shared
/// ids to nodes.
fn deep_to_bidi(ctx: &CommandContext, resolved: &ResolvedRealm, deep: &Value) -> Value {
    let Some(map) = deep.as_object() else {
        return deep.clone();
    };
    let mut out: Map<String, Value> = map.clone();

    match map.get("type").and_then(Value::as_str) {
        Some("node") => {
            let backend_node_id = map
                .get("value")
                .and_then(|value| value.get("backendNodeId"))
                .and_then(Value::as_i64);
            if let (Some(backend), Some(context_id)) =
                (backend_node_id, resolved.realm.associated_contexts.first())
            {
                if let Some(context) = ctx.stores.contexts.get(context_id) {
                    let document = context.loader_id.clone().unwrap_or_default();
                    out.insert(
                        "sharedId".to_string(),
                        json!(get_shared_id(
                            context_id,
                            &document,
                            backend,
                            ctx.config.shared_id_with_frame,
                        )),
                    );
                }
            }
            if let Some(Value::Object(inner)) = out.get_mut("value") {
                inner.remove("backendNodeId");
            }
        }
        Some("array") | Some("set") | Some("htmlcollection") | Some("nodelist") => {
            if let Some(Value::Array(items)) = map.get("value") {
                let mapped: Vec<Value> = items
                    .iter()
                    .map(|item| deep_to_bidi(ctx, resolved, item))
                    .collect();
                out.insert("value".to_string(), json!(mapped));
            }
        }
        Some("object") | Some("map") => {
            if let Some(Value::Array(entries)) = map.get("value") {
                let mapped: Vec<Value> = entries
                    .iter()
                    .map(|entry| match entry.as_array() {
                        Some(pair) if pair.len() == 2 => json!([
                            deep_to_bidi(ctx, resolved, &pair[0]),
                            deep_to_bidi(ctx, resolved, &pair[1]),
                        ]),
                        _ => entry.clone(),
                    })
                    .collect();
                out.insert("value".to_string(), json!(mapped));
            }
        }
        _ => {}
    }

    Value::Object(out)
}

fn evaluation_result(
    ctx: &CommandContext,
    resolved: &ResolvedRealm,
    cdp_result: Value,
) -> Value {
    if let Some(exception) = cdp_result.get("exceptionDetails") {
        let text = exception
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or("Evaluation failed");
        return json!({
            "type": "exception",
            "exceptionDetails": {
                "text": text,
                "lineNumber": exception.get("lineNumber").cloned().unwrap_or(json!(0)),
                "columnNumber": exception.get("columnNumber").cloned().unwrap_or(json!(0)),
                "exception": exception
                    .get("exception")
                    .and_then(|e| e.get("deepSerializedValue"))
                    .map(|deep| deep_to_bidi(ctx, resolved, deep))
                    .unwrap_or(Value::Null),
                "stackTrace": {"callFrames": []},
            },
            "realm": resolved.realm.id,
        });
    }

    let value = cdp_result
        .get("result")
        .and_then(|result| result.get("deepSerializedValue"))
        .map(|deep| deep_to_bidi(ctx, resolved, deep))
        .unwrap_or(json!({"type": "undefined"}));

    json!({
        "type": "success",
        "result": value,
        "realm": resolved.realm.id,
    })
}

// -- evaluate / callFunction -------------------------------------------------

async fn evaluate(ctx: &CommandContext, params: EvaluateParams) -> Result<Value> {
    let resolved = resolve_realm(ctx, &params.target).await?;

    let result = resolved
        .session
        .send_command(
            "Runtime.evaluate",
            json!({
                "expression": params.expression,
                "contextId": resolved.realm.execution_context_id,
                "awaitPromise": params.await_promise,
                "serializationOptions": {"serialization": "deep"},
            }),
        )
        .await?;

    Ok(evaluation_result(ctx, &resolved, result))
}

async fn call_function(ctx: &CommandContext, params: CallFunctionParams) -> Result<Value> {
    let resolved = resolve_realm(ctx, &params.target).await?;

    let mut arguments = Vec::new();
    if let Some(this) = &params.this {
        // `this` rides along as the first call argument of the wrapper.
        arguments.push(local_value_to_call_argument(ctx, &resolved, this).await?);
    } else {
        arguments.push(json!({}));
    }
    for argument in params.arguments.iter().flatten() {
        arguments.push(local_value_to_call_argument(ctx, &resolved, argument).await?);
    }

    // The wrapper applies the user function to the supplied `this`.
    let declaration = format!(
        "function(__this, ...__args) {{ return ({}).apply(__this, __args); }}",
        params.function_declaration
    );

    let result = resolved
        .session
        .send_command(
            "Runtime.callFunctionOn",
            json!({
                "functionDeclaration": declaration,
                "arguments": arguments,
                "executionContextId": resolved.realm.execution_context_id,
                "awaitPromise": params.await_promise,
                "serializationOptions": {"serialization": "deep"},
            }),
        )
        .await?;

    Ok(evaluation_result(ctx, &resolved, result))
}

async fn disown(ctx: &CommandContext, params: DisownParams) -> Result<Value> {
    let resolved = resolve_realm(ctx, &params.target).await?;
    for handle in &params.handles {
        let _ = resolved
            .session
            .send_command("Runtime.releaseObject", json!({"objectId": handle}))
            .await;
    }
    Ok(json!({}))
}

fn get_realms(ctx: &CommandContext, params: GetRealmsParams) -> Result<Value> {
    let filter = RealmFilter {
        browsing_context_id: params.context.clone(),
        realm_type: match params.realm_type.as_deref() {
            Some("window") => Some(RealmType::Window),
            Some("dedicated-worker") => Some(RealmType::DedicatedWorker),
            Some("shared-worker") => Some(RealmType::SharedWorker),
            Some("service-worker") => Some(RealmType::ServiceWorker),
            Some(other) => {
                return Err(Error::invalid_argument(format!(
                    "Unknown realm type: {}",
                    other
                )))
            }
            None => None,
        },
        ..Default::default()
    };
    let realms: Vec<Value> = ctx
        .stores
        .realms
        .find_realms(&filter)
        .iter()
        .map(Realm::to_json)
        .collect();
    Ok(json!({"realms": realms}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::transport_factory;
    use crate::cdp::mock::MockCdpTransport;
    use crate::config::Config;
    use crate::context::{BrowsingContextStore, RealmStore};
    use crate::events::queue::{EventQueue, EventSink};
    use crate::events::EventManager;
    use crate::network::NetworkStorage;
    use crate::script::PreloadScriptStore;
    use crate::target::{SharedStores, TargetRegistry};
    use std::sync::Arc;

    async fn context_with_mock() -> (CommandContext, Arc<MockCdpTransport>) {
        let contexts = Arc::new(BrowsingContextStore::new());
        let sink: EventSink = Arc::new(|_| Box::pin(async {}));
        let queue = Arc::new(EventQueue::new(sink));
        let events = Arc::new(EventManager::new(contexts.clone(), queue));
        let stores = SharedStores {
            contexts,
            realms: Arc::new(RealmStore::new()),
            preload: Arc::new(PreloadScriptStore::new()),
            network: Arc::new(NetworkStorage::new()),
            events,
        };
        let mock = Arc::new(MockCdpTransport::new());
        let transport: Arc<dyn crate::cdp::CdpTransport> = mock.clone();
        let browser = (transport_factory(transport.clone()))().await.unwrap();
        let registry = TargetRegistry::new(transport, stores.clone());
        (
            CommandContext {
                config: Config::default(),
                stores,
                registry,
                browser,
            },
            mock,
        )
    }

    #[tokio::test]
    async fn add_preload_script_rejects_empty_context_list() {
        let (ctx, _mock) = context_with_mock().await;
        let err = process(
            &ctx,
            "script.addPreloadScript",
            json!({"functionDeclaration": "() => {}", "contexts": []}),
        )
        .await
        .unwrap_err();
        assert_eq!(err.bidi_code(), "invalid argument");
    }

    #[tokio::test]
    async fn add_preload_script_rejects_child_contexts() {
        let (ctx, _mock) = context_with_mock().await;
        ctx.stores.contexts.add("top", None, "https://a.test/", "S1");
        ctx.stores
            .contexts
            .add("child", Some("top"), "https://a.test/f", "S1");

        let err = process(
            &ctx,
            "script.addPreloadScript",
            json!({"functionDeclaration": "() => {}", "contexts": ["child"]}),
        )
        .await
        .unwrap_err();
        assert_eq!(err.bidi_code(), "invalid argument");

        let err = process(
            &ctx,
            "script.addPreloadScript",
            json!({"functionDeclaration": "() => {}", "contexts": ["missing"]}),
        )
        .await
        .unwrap_err();
        assert_eq!(err.bidi_code(), "no such frame");
    }

    #[tokio::test]
    async fn add_then_remove_preload_script() {
        let (ctx, _mock) = context_with_mock().await;
        let result = process(
            &ctx,
            "script.addPreloadScript",
            json!({"functionDeclaration": "() => {}"}),
        )
        .await
        .unwrap();
        let id = result["script"].as_str().unwrap().to_string();

        process(&ctx, "script.removePreloadScript", json!({"script": id.clone()}))
            .await
            .unwrap();
        let err = process(&ctx, "script.removePreloadScript", json!({"script": id}))
            .await
            .unwrap_err();
        assert_eq!(err.bidi_code(), "no such script");
    }

    #[tokio::test]
    async fn get_realms_filters_by_context_and_type() {
        let (ctx, _mock) = context_with_mock().await;
        ctx.stores.realms.add(
            RealmType::Window,
            "S1",
            1,
            "https://a.test",
            None,
            vec!["ctx1".to_string()],
        );
        ctx.stores
            .realms
            .add(RealmType::DedicatedWorker, "S1", 2, "https://a.test", None, vec![]);

        let all = process(&ctx, "script.getRealms", json!({})).await.unwrap();
        assert_eq!(all["realms"].as_array().unwrap().len(), 2);

        let windows = process(&ctx, "script.getRealms", json!({"type": "window"}))
            .await
            .unwrap();
        assert_eq!(windows["realms"].as_array().unwrap().len(), 1);
        assert_eq!(windows["realms"][0]["context"], "ctx1");
    }

    #[tokio::test]
    async fn malformed_shared_id_is_no_such_node() {
        let (ctx, _mock) = context_with_mock().await;
        let resolved = ResolvedRealm {
            realm: ctx.stores.realms.add(
                RealmType::Window,
                "S1",
                1,
                "https://a.test",
                None,
                vec![],
            ),
            session: CdpSession::for_target(
                Arc::new(MockCdpTransport::new()) as Arc<dyn crate::cdp::CdpTransport>,
                "S1",
            ),
        };
        let err = shared_id_to_object(&ctx, &resolved, "garbage").await.unwrap_err();
        assert_eq!(err.bidi_code(), "no such node");
        assert!(err.bidi_message().contains("was not found"));
    }

    #[tokio::test]
    async fn stale_document_shared_id_is_no_such_node() {
        let (ctx, mock) = context_with_mock().await;
        ctx.stores.contexts.add("ctx1", None, "https://a.test/", "S1");
        ctx.stores.contexts.set_loader("ctx1", "LOADER-NEW");

        let resolved = ResolvedRealm {
            realm: ctx.stores.realms.add(
                RealmType::Window,
                "S1",
                1,
                "https://a.test",
                None,
                vec!["ctx1".to_string()],
            ),
            session: CdpSession::for_target(
                mock as Arc<dyn crate::cdp::CdpTransport>,
                "S1",
            ),
        };

        let stale = get_shared_id("ctx1", "LOADER-OLD", 7, true);
        let err = shared_id_to_object(&ctx, &resolved, &stale).await.unwrap_err();
        assert_eq!(err.bidi_code(), "no such node");
        assert!(err.bidi_message().contains("different document"));
    }

    #[tokio::test]
    async fn node_results_get_shared_ids() {
        let (ctx, _mock) = context_with_mock().await;
        ctx.stores.contexts.add("ctx1", None, "https://a.test/", "S1");
        ctx.stores.contexts.set_loader("ctx1", "DOC");

        let resolved = ResolvedRealm {
            realm: ctx.stores.realms.add(
                RealmType::Window,
                "S1",
                1,
                "https://a.test",
                None,
                vec!["ctx1".to_string()],
            ),
            session: CdpSession::for_target(
                Arc::new(MockCdpTransport::new()) as Arc<dyn crate::cdp::CdpTransport>,
                "S1",
            ),
        };

        let deep = json!({
            "type": "node",
            "value": {"nodeType": 1, "backendNodeId": 42}
        });
        let bidi = deep_to_bidi(&ctx, &resolved, &deep);
        assert_eq!(bidi["sharedId"], "DOC_element_42");
        assert!(bidi["value"].get("backendNodeId").is_none());
    }
}
