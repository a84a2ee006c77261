//! browser.* commands

use super::CommandContext;
use crate::{Error, Result};
use serde_json::{json, Value};

/// Dispatch one `browser.*` command.
pub async fn process(ctx: &CommandContext, method: &str, _params: Value) -> Result<Value> {
    match method {
        "browser.close" => {
            ctx.browser.close().await?;
            Ok(json!({}))
        }
        other => Err(Error::UnknownCommand(other.to_string())),
    }
}
