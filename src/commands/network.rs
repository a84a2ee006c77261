//! network.* commands: intercept registration and blocked-request actions

use super::CommandContext;
use crate::network::request::NetworkRequest;
use crate::network::{
    AuthAction, AuthCredentials, BidiHeader, BytesValue, ContinueRequestOverrides,
    ContinueResponseOverrides, CookieHeader, InterceptPhase, ProvideResponseOverrides,
};
use crate::{Error, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddInterceptParams {
    phases: Vec<String>,
    #[serde(default)]
    url_patterns: Option<Vec<UrlPattern>>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum UrlPattern {
    String {
        pattern: String,
    },
    Pattern {
        #[serde(default)]
        protocol: Option<String>,
        #[serde(default)]
        hostname: Option<String>,
        #[serde(default)]
        port: Option<String>,
        #[serde(default)]
        path: Option<String>,
    },
}

impl UrlPattern {
    fn to_pattern_string(&self) -> Result<String> {
        match self {
            UrlPattern::String { pattern } => Ok(pattern.clone()),
            UrlPattern::Pattern {
                protocol,
                hostname,
                port,
                path,
            } => {
                let (Some(protocol), Some(hostname)) = (protocol, hostname) else {
                    return Err(Error::invalid_argument(
                        "TypeError: Failed to construct 'URL': Invalid URL",
                    ));
                };
                let mut pattern = format!("{}://{}", protocol, hostname);
                if let Some(port) = port {
                    pattern.push(':');
                    pattern.push_str(port);
                }
                pattern.push_str(path.as_deref().unwrap_or("/*"));
                Ok(pattern)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RemoveInterceptParams {
    intercept: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestActionParams {
    request: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    headers: Option<Vec<BidiHeader>>,
    #[serde(default)]
    cookies: Option<Vec<CookieHeader>>,
    #[serde(default)]
    body: Option<BytesValue>,
    #[serde(default)]
    status_code: Option<i64>,
    #[serde(default)]
    reason_phrase: Option<String>,
    #[serde(default)]
    credentials: Option<CredentialsParam>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    error_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CredentialsParam {
    username: String,
    password: String,
}

impl From<CredentialsParam> for AuthCredentials {
    fn from(value: CredentialsParam) -> Self {
        AuthCredentials {
            username: value.username,
            password: value.password,
        }
    }
}

/// Dispatch one `network.*` command.
pub async fn process(ctx: &CommandContext, method: &str, params: Value) -> Result<Value> {
    match method {
        "network.addIntercept" => add_intercept(ctx, parse(params)?).await,
        "network.removeIntercept" => remove_intercept(ctx, parse(params)?).await,
        "network.continueRequest" => {
            let params: RequestActionParams = parse(params)?;
            let request = find_request(ctx, &params.request)?;
            request
                .continue_request(ContinueRequestOverrides {
                    url: params.url,
                    method: params.method,
                    headers: params.headers,
                    cookies: params.cookies,
                    body: params.body,
                })
                .await?;
            Ok(json!({}))
        }
        "network.continueResponse" => {
            let params: RequestActionParams = parse(params)?;
            let request = find_request(ctx, &params.request)?;
            request
                .continue_response(ContinueResponseOverrides {
                    status_code: params.status_code,
                    reason_phrase: params.reason_phrase,
                    headers: params.headers,
                    cookies: params.cookies,
                    credentials: params.credentials.map(AuthCredentials::from),
                })
                .await?;
            Ok(json!({}))
        }
        "network.continueWithAuth" => {
            let params: RequestActionParams = parse(params)?;
            let request = find_request(ctx, &params.request)?;
            let action = match params.action.as_deref() {
                Some("default") => AuthAction::Default,
                Some("cancel") => AuthAction::Cancel,
                Some("provideCredentials") => {
                    let credentials = params.credentials.clone().ok_or_else(|| {
                        Error::invalid_argument("provideCredentials requires credentials")
                    })?;
                    AuthAction::ProvideCredentials(credentials.into())
                }
                other => {
                    return Err(Error::invalid_argument(format!(
                        "Unknown auth action: {:?}",
                        other
                    )))
                }
            };
            request.continue_with_auth(action).await?;
            Ok(json!({}))
        }
        "network.failRequest" => {
            let params: RequestActionParams = parse(params)?;
            let request = find_request(ctx, &params.request)?;
            request
                .fail_request(params.error_reason.as_deref().unwrap_or("Failed"))
                .await?;
            Ok(json!({}))
        }
        "network.provideResponse" => {
            let params: RequestActionParams = parse(params)?;
            let request = find_request(ctx, &params.request)?;
            request
                .provide_response(ProvideResponseOverrides {
                    status_code: params.status_code,
                    reason_phrase: params.reason_phrase,
                    headers: params.headers,
                    cookies: params.cookies,
                    body: params.body,
                })
                .await?;
            Ok(json!({}))
        }
        other => Err(Error::UnknownCommand(other.to_string())),
    }
}

fn parse<T: serde::de::DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| Error::invalid_argument(e.to_string()))
}

fn find_request(ctx: &CommandContext, request_id: &str) -> Result<Arc<NetworkRequest>> {
    ctx.stores
        .network
        .get_request(request_id)
        .ok_or_else(|| {
            Error::invalid_argument(format!("No request found for id '{}'", request_id))
        })
}

async fn add_intercept(ctx: &CommandContext, params: AddInterceptParams) -> Result<Value> {
    if params.phases.is_empty() {
        return Err(Error::invalid_argument(
            "At least one phase must be specified.",
        ));
    }
    let phases: Vec<InterceptPhase> = params
        .phases
        .iter()
        .map(|phase| InterceptPhase::parse(phase))
        .collect::<Result<_>>()?;
    let patterns: Vec<String> = params
        .url_patterns
        .iter()
        .flatten()
        .map(UrlPattern::to_pattern_string)
        .collect::<Result<_>>()?;

    let intercept = ctx.stores.network.add_intercept(patterns, phases)?;

    // Every live target starts pausing matching requests.
    for target in ctx.registry.targets() {
        target.wait_unblocked().await;
        if let Err(e) = target.ensure_fetch_enabled().await {
            if !e.is_close_error() {
                return Err(e);
            }
        }
    }

    Ok(json!({"intercept": intercept}))
}

async fn remove_intercept(ctx: &CommandContext, params: RemoveInterceptParams) -> Result<Value> {
    ctx.stores.network.remove_intercept(&params.intercept)?;

    if !ctx.stores.network.has_intercepts() {
        for target in ctx.registry.targets() {
            if let Some(manager) = target.network_manager() {
                if let Err(e) = manager.disable_fetch().await {
                    debug!(error = %e, "Fetch.disable failed during intercept removal");
                }
            }
        }
    }

    Ok(json!({}))
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
    async fn add_intercept_requires_phases() {
        let (ctx, _mock) = context_with_mock().await;
        let err = process(&ctx, "network.addIntercept", json!({"phases": []}))
            .await
            .unwrap_err();
        assert_eq!(err.bidi_code(), "invalid argument");
        assert_eq!(err.bidi_message(), "At least one phase must be specified.");
    }

    #[tokio::test]
    async fn add_intercept_returns_id() {
        let (ctx, _mock) = context_with_mock().await;
        let result = process(
            &ctx,
            "network.addIntercept",
            json!({
                "phases": ["beforeRequestSent"],
                "urlPatterns": [{"type": "string", "pattern": "https://www.example.com/*"}],
            }),
        )
        .await
        .unwrap();
        assert!(result["intercept"].is_string());
    }

    #[tokio::test]
    async fn add_intercept_pattern_type_builds_url() {
        let (ctx, _mock) = context_with_mock().await;
        let result = process(
            &ctx,
            "network.addIntercept",
            json!({
                "phases": ["beforeRequestSent"],
                "urlPatterns": [{
                    "type": "pattern",
                    "protocol": "https",
                    "hostname": "www.example.com",
                    "path": "/*",
                }],
            }),
        )
        .await
        .unwrap();
        assert!(result["intercept"].is_string());
        assert_eq!(
            ctx.stores
                .network
                .intercepts_for_phase("https://www.example.com/x", InterceptPhase::BeforeRequestSent)
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn add_intercept_rejects_underspecified_pattern() {
        let (ctx, _mock) = context_with_mock().await;
        let err = process(
            &ctx,
            "network.addIntercept",
            json!({
                "phases": ["beforeRequestSent"],
                "urlPatterns": [{"type": "pattern", "hostname": "foo"}],
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.bidi_code(), "invalid argument");
    }

    #[tokio::test]
    async fn remove_intercept_round_trip() {
        let (ctx, _mock) = context_with_mock().await;
        let result = process(
            &ctx,
            "network.addIntercept",
            json!({"phases": ["authRequired"]}),
        )
        .await
        .unwrap();
        let id = result["intercept"].as_str().unwrap().to_string();

        process(&ctx, "network.removeIntercept", json!({"intercept": id.clone()}))
            .await
            .unwrap();
        let err = process(&ctx, "network.removeIntercept", json!({"intercept": id}))
            .await
            .unwrap_err();
        assert_eq!(err.bidi_code(), "invalid argument");
    }

    #[tokio::test]
    async fn actions_on_unknown_request_fail() {
        let (ctx, _mock) = context_with_mock().await;
        let err = process(
            &ctx,
            "network.continueRequest",
            json!({"request": "nope"}),
        )
        .await
        .unwrap_err();
        assert_eq!(err.bidi_code(), "invalid argument");
    }
}
