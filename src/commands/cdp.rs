//! cdp.* commands: raw protocol passthrough

use super::CommandContext;
use crate::{Error, Result};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendCommandParams {
    method: String,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    session: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GetSessionParams {
    context: String,
}

/// Dispatch one `cdp.*` command.
pub async fn process(ctx: &CommandContext, method: &str, params: Value) -> Result<Value> {
    match method {
        "cdp.sendCommand" => {
            let params: SendCommandParams = serde_json::from_value(params)
                .map_err(|e| Error::invalid_argument(e.to_string()))?;
            let result = ctx
                .browser
                .transport()
                .send_command(
                    &params.method,
                    params.params.unwrap_or_else(|| json!({})),
                    params.session.as_deref(),
                )
                .await?;
            let mut response = json!({"result": result});
            if let Some(session) = params.session {
                response["session"] = json!(session);
            }
            Ok(response)
        }
        "cdp.getSession" => {
            let params: GetSessionParams = serde_json::from_value(params)
                .map_err(|e| Error::invalid_argument(e.to_string()))?;
            let context = ctx
                .stores
                .contexts
                .get(&params.context)
                .ok_or_else(|| Error::no_such_frame(params.context.clone()))?;
            Ok(json!({"session": context.cdp_session_id}))
        }
        other => Err(Error::UnknownCommand(other.to_string())),
    }
}
