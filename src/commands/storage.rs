//! storage.* commands: cookies through CDP `Storage.*`

use super::CommandContext;
use crate::cdp::CdpSession;
use crate::{Error, Result};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetCookiesParams {
    #[serde(default)]
    filter: Option<CookieFilter>,
    #[serde(default)]
    partition: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CookieFilter {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    domain: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetCookieParams {
    cookie: CookieParam,
    #[serde(default)]
    partition: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CookieParam {
    name: String,
    value: Value,
    domain: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    http_only: Option<bool>,
    #[serde(default)]
    secure: Option<bool>,
    #[serde(default)]
    same_site: Option<String>,
    #[serde(default)]
    expiry: Option<i64>,
}

/// Dispatch one `storage.*` command.
pub async fn process(ctx: &CommandContext, method: &str, params: Value) -> Result<Value> {
    match method {
        "storage.getCookies" => get_cookies(ctx, parse(params)?).await,
        "storage.setCookie" => set_cookie(ctx, parse(params)?).await,
        other => Err(Error::UnknownCommand(other.to_string())),
    }
}

fn parse<T: serde::de::DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| Error::invalid_argument(e.to_string()))
}

fn browser_session(ctx: &CommandContext) -> CdpSession {
    CdpSession::browser(ctx.browser.transport())
}

/// Resolve the partition's `sourceOrigin`; required for every storage
/// operation.
fn resolve_source_origin(ctx: &CommandContext, partition: &Option<Value>) -> Result<String> {
    let Some(partition) = partition else {
        return Err(Error::UnderspecifiedStoragePartition(
            "sourceOrigin must be provided".to_string(),
        ));
    };

    if let Some(origin) = partition.get("sourceOrigin").and_then(Value::as_str) {
        return Ok(origin.to_string());
    }

    // A context partition resolves to the context's origin.
    if let Some(context_id) = partition.get("context").and_then(Value::as_str) {
        let context = ctx
            .stores
            .contexts
            .get(context_id)
            .ok_or_else(|| Error::no_such_frame(context_id))?;
        if let Some(origin) = origin_of(&context.url) {
            return Ok(origin);
        }
    }

    Err(Error::UnderspecifiedStoragePartition(
        "sourceOrigin must be provided".to_string(),
    ))
}

fn origin_of(url: &str) -> Option<String> {
    let (scheme, rest) = url.split_once("://")?;
    let host = rest.split(['/', '?', '#']).next()?;
    if host.is_empty() {
        return None;
    }
    Some(format!("{}://{}", scheme, host))
}

/// CDP sameSite → BiDi, defaulting unknown values to `lax`.
fn same_site_from_cdp(value: Option<&str>) -> &'static str {
    match value {
        Some("Strict") => "strict",
        Some("None") => "none",
        _ => "lax",
    }
}

/// BiDi sameSite → CDP, rejecting unknown values.
fn same_site_to_cdp(value: &str) -> Result<&'static str> {
    match value {
        "strict" => Ok("Strict"),
        "lax" => Ok("Lax"),
        "none" => Ok("None"),
        other => Err(Error::UnableToSetCookie(format!(
            "Unknown sameSite value: {}",
            other
        ))),
    }
}

fn cookie_to_bidi(cookie: &Value) -> Value {
    let value = cookie.get("value").and_then(Value::as_str).unwrap_or("");
    json!({
        "name": cookie.get("name").and_then(Value::as_str).unwrap_or(""),
        "value": {"type": "string", "value": value},
        "domain": cookie.get("domain").and_then(Value::as_str).unwrap_or(""),
        "path": cookie.get("path").and_then(Value::as_str).unwrap_or("/"),
        "size": value.len(),
        "httpOnly": cookie.get("httpOnly").and_then(Value::as_bool).unwrap_or(false),
        "secure": cookie.get("secure").and_then(Value::as_bool).unwrap_or(false),
        "sameSite": same_site_from_cdp(cookie.get("sameSite").and_then(Value::as_str)),
        "expiry": cookie.get("expires").and_then(Value::as_f64).map(|e| e as i64),
    })
}

async fn get_cookies(ctx: &CommandContext, params: GetCookiesParams) -> Result<Value> {
    let source_origin = resolve_source_origin(ctx, &params.partition)?;

    let result = browser_session(ctx)
        .send_command("Storage.getCookies", json!({}))
        .await?;
    let cookies = result
        .get("cookies")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let origin_host = source_origin
        .split_once("://")
        .map(|(_, host)| host.split(':').next().unwrap_or(host))
        .unwrap_or(&source_origin)
        .to_string();

    let matches: Vec<Value> = cookies
        .iter()
        .filter(|cookie| {
            let domain = cookie
                .get("domain")
                .and_then(Value::as_str)
                .unwrap_or("")
                .trim_start_matches('.');
            origin_host == domain || origin_host.ends_with(&format!(".{}", domain))
        })
        .filter(|cookie| {
            let Some(filter) = &params.filter else {
                return true;
            };
            if let Some(name) = &filter.name {
                if cookie.get("name").and_then(Value::as_str) != Some(name) {
                    return false;
                }
            }
            if let Some(domain) = &filter.domain {
                if cookie.get("domain").and_then(Value::as_str) != Some(domain) {
                    return false;
                }
            }
            true
        })
        .map(cookie_to_bidi)
        .collect();

    Ok(json!({
        "cookies": matches,
        "partitionKey": {"sourceOrigin": source_origin},
    }))
}

async fn set_cookie(ctx: &CommandContext, params: SetCookieParams) -> Result<Value> {
    let source_origin = resolve_source_origin(ctx, &params.partition)?;
    let cookie = &params.cookie;

    let value = match cookie.value.get("value").and_then(Value::as_str) {
        Some(value) => value.to_string(),
        None => {
            return Err(Error::invalid_argument(
                "Cookie value must be a string bytes value",
            ))
        }
    };

    let mut cdp_cookie = json!({
        "name": cookie.name,
        "value": value,
        "domain": cookie.domain,
        "path": cookie.path.clone().unwrap_or_else(|| "/".to_string()),
        "httpOnly": cookie.http_only.unwrap_or(false),
        "secure": cookie.secure.unwrap_or(false),
        "sourceOrigin": source_origin,
    });
    if let Some(same_site) = &cookie.same_site {
        cdp_cookie["sameSite"] = json!(same_site_to_cdp(same_site)?);
    }
    if let Some(expiry) = cookie.expiry {
        cdp_cookie["expires"] = json!(expiry);
    }

    browser_session(ctx)
        .send_command("Storage.setCookies", json!({"cookies": [cdp_cookie]}))
        .await
        .map_err(|e| Error::UnableToSetCookie(e.to_string()))?;

    Ok(json!({"partitionKey": {"sourceOrigin": source_origin}}))
}
