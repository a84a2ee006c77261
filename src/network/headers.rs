//! Header and body helpers
//!
//! BiDi header/body value conversions shared by the request state machine
//! and the interception API.

use crate::cdp::types::HeaderEntry;
use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

/// A BiDi bytes value: `{type: "string"|"base64", value}`
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BytesValue {
    String { value: String },
    Base64 { value: String },
}

impl BytesValue {
    /// Encode for a CDP command: CDP body fields are always base64.
    pub fn encode_for_cdp(&self) -> String {
        match self {
            BytesValue::String { value } => BASE64.encode(value.as_bytes()),
            BytesValue::Base64 { value } => value.clone(),
        }
    }

    /// Byte size: original string length, or decoded base64 length.
    pub fn size(&self) -> Result<usize> {
        match self {
            BytesValue::String { value } => Ok(value.len()),
            BytesValue::Base64 { value } => BASE64
                .decode(value.as_bytes())
                .map(|bytes| bytes.len())
                .map_err(|e| Error::invalid_argument(format!("Invalid base64 body: {}", e))),
        }
    }

    pub fn as_json(&self) -> Value {
        match self {
            BytesValue::String { value } => json!({"type": "string", "value": value}),
            BytesValue::Base64 { value } => json!({"type": "base64", "value": value}),
        }
    }
}

/// A BiDi header: name plus a bytes value
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct BidiHeader {
    pub name: String,
    pub value: BytesValue,
}

impl BidiHeader {
    pub fn to_cdp(&self) -> HeaderEntry {
        HeaderEntry {
            name: self.name.clone(),
            value: match &self.value {
                BytesValue::String { value } => value.clone(),
                BytesValue::Base64 { value } => value.clone(),
            },
        }
    }
}

/// BiDi cookie attributes used when synthesizing a `cookie` header
#[derive(Debug, Clone, Deserialize)]
pub struct CookieHeader {
    pub name: String,
    pub value: BytesValue,
}

/// Σ `"<name>: <value>\r\n"` in UTF-8 bytes.
pub fn header_size(headers: &[HeaderEntry]) -> usize {
    headers
        .iter()
        .map(|h| h.name.len() + 2 + h.value.len() + 2)
        .sum()
}

/// CDP header maps to the BiDi wire list.
pub fn bidi_headers_from_map(headers: &HashMap<String, String>) -> Vec<Value> {
    let mut entries: Vec<(&String, &String)> = headers.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
        .into_iter()
        .map(|(name, value)| {
            json!({
                "name": name,
                "value": {"type": "string", "value": value},
            })
        })
        .collect()
}

/// CDP header map to `Fetch.*` header entry list.
pub fn cdp_header_entries(headers: &HashMap<String, String>) -> Vec<HeaderEntry> {
    let mut entries: Vec<HeaderEntry> = headers
        .iter()
        .map(|(name, value)| HeaderEntry {
            name: name.clone(),
            value: value.clone(),
        })
        .collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries
}

/// Serialize cookies into one `cookie` header value.
pub fn cookie_header_value(cookies: &[CookieHeader]) -> String {
    cookies
        .iter()
        .map(|cookie| {
            let value = match &cookie.value {
                BytesValue::String { value } => value.clone(),
                BytesValue::Base64 { value } => value.clone(),
            };
            format!("{}={}", cookie.name, value)
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Merge override cookies into the header set handed to CDP.
///
/// With only cookies supplied the base headers are kept and their `cookie`
/// header (case-insensitive) replaced. With both supplied the override
/// headers win, any existing `cookie` entry is filtered out, and one
/// synthesized `cookie` header is appended.
pub fn merge_cookies(
    base_headers: &[HeaderEntry],
    header_overrides: Option<&[HeaderEntry]>,
    cookies: Option<&[CookieHeader]>,
) -> Option<Vec<HeaderEntry>> {
    match (header_overrides, cookies) {
        (None, None) => None,
        (Some(overrides), None) => Some(overrides.to_vec()),
        (None, Some(cookies)) => {
            let mut merged: Vec<HeaderEntry> = base_headers
                .iter()
                .filter(|h| !h.name.eq_ignore_ascii_case("cookie"))
                .cloned()
                .collect();
            merged.push(HeaderEntry {
                name: "cookie".to_string(),
                value: cookie_header_value(cookies),
            });
            Some(merged)
        }
        (Some(overrides), Some(cookies)) => {
            let mut merged: Vec<HeaderEntry> = overrides
                .iter()
                .filter(|h| !h.name.eq_ignore_ascii_case("cookie"))
                .cloned()
                .collect();
            merged.push(HeaderEntry {
                name: "cookie".to_string(),
                value: cookie_header_value(cookies),
            });
            Some(merged)
        }
    }
}
