//! browsingContext.* commands

use super::CommandContext;
use crate::cdp::CdpSession;
use crate::{Error, Result};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetTreeParams {
    #[serde(default)]
    max_depth: Option<u64>,
    #[serde(default)]
    root: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateParams {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    reference_context: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NavigateParams {
    context: String,
    url: String,
    #[serde(default)]
    wait: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReloadParams {
    context: String,
    #[serde(default)]
    ignore_cache: Option<bool>,
    #[serde(default)]
    wait: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContextParams {
    context: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetViewportParams {
    context: String,
    #[serde(default)]
    viewport: Option<Viewport>,
    #[serde(default)]
    device_pixel_ratio: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Viewport {
    width: u64,
    height: u64,
}

/// Dispatch one `browsingContext.*` command.
pub async fn process(ctx: &CommandContext, method: &str, params: Value) -> Result<Value> {
    match method {
        "browsingContext.getTree" => get_tree(ctx, parse(params)?),
        "browsingContext.create" => create(ctx, parse(params)?).await,
        "browsingContext.navigate" => navigate(ctx, parse(params)?).await,
        "browsingContext.reload" => reload(ctx, parse(params)?).await,
        "browsingContext.close" => close(ctx, parse(params)?).await,
        "browsingContext.activate" => activate(ctx, parse(params)?).await,
        "browsingContext.setViewport" => set_viewport(ctx, parse(params)?).await,
        "browsingContext.captureScreenshot" => capture_screenshot(ctx, parse(params)?).await,
        other => Err(Error::UnknownCommand(other.to_string())),
    }
}

fn parse<T: serde::de::DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| Error::invalid_argument(e.to_string()))
}

fn browser_session(ctx: &CommandContext) -> CdpSession {
    CdpSession::browser(ctx.browser.transport())
}

/// Require a known, top-level context.
fn require_top_level(ctx: &CommandContext, context_id: &str) -> Result<()> {
    let context = ctx
        .stores
        .contexts
        .get(context_id)
        .ok_or_else(|| Error::no_such_frame(context_id))?;
    if context.parent.is_some() {
        return Err(Error::invalid_argument(format!(
            "Context '{}' is not a top-level browsing context",
            context_id
        )));
    }
    Ok(())
}

fn tree_node(ctx: &CommandContext, context_id: &str, depth: Option<u64>) -> Option<Value> {
    let context = ctx.stores.contexts.get(context_id)?;
    let children: Vec<Value> = match depth {
        Some(0) => Vec::new(),
        _ => {
            let next = depth.map(|d| d - 1);
            let mut ids: Vec<String> = context.children.iter().cloned().collect();
            ids.sort();
            ids.iter()
                .filter_map(|child| tree_node(ctx, child, next))
                .collect()
        }
    };
    let mut node = json!({
        "context": context.id,
        "url": context.url,
        "children": children,
    });
    if let Some(parent) = &context.parent {
        node["parent"] = json!(parent);
    }
    Some(node)
}

fn get_tree(ctx: &CommandContext, params: GetTreeParams) -> Result<Value> {
    let roots: Vec<String> = match &params.root {
        Some(root) => {
            if !ctx.stores.contexts.contains(root) {
                return Err(Error::no_such_frame(root.clone()));
            }
            vec![root.clone()]
        }
        None => ctx.stores.contexts.top_level_ids(),
    };
    let contexts: Vec<Value> = roots
        .iter()
        .filter_map(|root| tree_node(ctx, root, params.max_depth))
        .collect();
    Ok(json!({"contexts": contexts}))
}

async fn create(ctx: &CommandContext, params: CreateParams) -> Result<Value> {
    if params.kind != "tab" && params.kind != "window" {
        return Err(Error::invalid_argument(format!(
            "Unknown context type: {}",
            params.kind
        )));
    }
    if let Some(reference) = &params.reference_context {
        require_top_level(ctx, reference)?;
    }

    let result = browser_session(ctx)
        .send_command(
            "Target.createTarget",
            json!({
                "url": "about:blank",
                "newWindow": params.kind == "window",
            }),
        )
        .await?;

    let target_id = result
        .get("targetId")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::unknown("Target.createTarget returned no targetId"))?
        .to_string();

    // Attachment is event-driven; wait for the target to land in the tree.
    if let Some(target) = wait_for_target(ctx, &target_id).await {
        target.wait_unblocked().await;
    }

    Ok(json!({"context": target_id}))
}

async fn wait_for_target(
    ctx: &CommandContext,
    target_id: &str,
) -> Option<std::sync::Arc<crate::target::CdpTarget>> {
    for _ in 0..100 {
        if let Ok(target) = ctx.registry.target_for_context(target_id) {
            return Some(target);
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    None
}

async fn navigate(ctx: &CommandContext, params: NavigateParams) -> Result<Value> {
    let target = ctx.registry.target_for_context(&params.context)?;
    target.wait_unblocked().await;

    let result = target
        .session()
        .send_command(
            "Page.navigate",
            json!({"url": params.url, "frameId": params.context}),
        )
        .await?;

    if let Some(error_text) = result.get("errorText").and_then(Value::as_str) {
        return Err(Error::unknown(error_text.to_string()));
    }
    let _ = params.wait;

    ctx.stores.contexts.set_url(&params.context, &params.url);
    Ok(json!({
        "navigation": result.get("loaderId").cloned().unwrap_or(Value::Null),
        "url": params.url,
    }))
}

async fn reload(ctx: &CommandContext, params: ReloadParams) -> Result<Value> {
    let target = ctx.registry.target_for_context(&params.context)?;
    target.wait_unblocked().await;
    let _ = params.wait;

    target
        .session()
        .send_command(
            "Page.reload",
            json!({"ignoreCache": params.ignore_cache.unwrap_or(false)}),
        )
        .await?;
    Ok(json!({}))
}

async fn close(ctx: &CommandContext, params: ContextParams) -> Result<Value> {
    require_top_level(ctx, &params.context)?;
    browser_session(ctx)
        .send_command("Target.closeTarget", json!({"targetId": params.context}))
        .await?;
    Ok(json!({}))
}

async fn activate(ctx: &CommandContext, params: ContextParams) -> Result<Value> {
    require_top_level(ctx, &params.context)?;
    browser_session(ctx)
        .send_command("Target.activateTarget", json!({"targetId": params.context}))
        .await?;
    Ok(json!({}))
}

async fn set_viewport(ctx: &CommandContext, params: SetViewportParams) -> Result<Value> {
    require_top_level(ctx, &params.context)?;
    let target = ctx.registry.target_for_context(&params.context)?;
    target.wait_unblocked().await;

    match (&params.viewport, params.device_pixel_ratio) {
        (None, None) => {
            target
                .session()
                .send_command("Emulation.clearDeviceMetricsOverride", json!({}))
                .await?;
        }
        (viewport, ratio) => {
            let (width, height) = viewport
                .as_ref()
                .map(|v| (v.width, v.height))
                .unwrap_or((0, 0));
            target
                .session()
                .send_command(
                    "Emulation.setDeviceMetricsOverride",
                    json!({
                        "width": width,
                        "height": height,
                        "deviceScaleFactor": ratio.unwrap_or(0.0),
                        "mobile": false,
                    }),
                )
                .await?;
        }
    }
    Ok(json!({}))
}

async fn capture_screenshot(ctx: &CommandContext, params: ContextParams) -> Result<Value> {
    let target = ctx.registry.target_for_context(&params.context)?;
    target.wait_unblocked().await;

    let result = target
        .session()
        .send_command("Page.captureScreenshot", json!({"format": "png"}))
        .await
        .map_err(|e| Error::UnableToCaptureScreen(e.to_string()))?;

    let data = result
        .get("data")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::UnableToCaptureScreen("empty screenshot".to_string()))?;
    Ok(json!({"data": data}))
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
    async fn get_tree_reflects_the_store() {
        let (ctx, _mock) = context_with_mock().await;
        ctx.stores.contexts.add("top", None, "https://a.test/", "S1");
        ctx.stores
            .contexts
            .add("child", Some("top"), "https://a.test/f", "S1");

        let result = process(&ctx, "browsingContext.getTree", json!({})).await.unwrap();
        let contexts = result["contexts"].as_array().unwrap();
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0]["context"], "top");
        assert_eq!(contexts[0]["children"][0]["context"], "child");
        assert_eq!(contexts[0]["children"][0]["parent"], "top");
    }

    #[tokio::test]
    async fn get_tree_with_unknown_root_fails() {
        let (ctx, _mock) = context_with_mock().await;
        let err = process(&ctx, "browsingContext.getTree", json!({"root": "nope"}))
            .await
            .unwrap_err();
        assert_eq!(err.bidi_code(), "no such frame");
    }

    #[tokio::test]
    async fn close_requires_top_level() {
        let (ctx, _mock) = context_with_mock().await;
        ctx.stores.contexts.add("top", None, "https://a.test/", "S1");
        ctx.stores
            .contexts
            .add("child", Some("top"), "https://a.test/f", "S1");

        let err = process(&ctx, "browsingContext.close", json!({"context": "child"}))
            .await
            .unwrap_err();
        assert_eq!(err.bidi_code(), "invalid argument");

        process(&ctx, "browsingContext.close", json!({"context": "top"}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn screenshot_maps_failures() {
        let (ctx, mock) = context_with_mock().await;
        ctx.stores.contexts.add("top", None, "https://a.test/", "S1");
        // No target registered for S1: resolution fails as no such frame.
        let err = process(
            &ctx,
            "browsingContext.captureScreenshot",
            json!({"context": "top"}),
        )
        .await
        .unwrap_err();
        assert_eq!(err.bidi_code(), "no such frame");
        let _ = mock;
    }
}
