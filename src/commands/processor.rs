//! Command processor
//!
//! Parses incoming JSON frames, validates and routes them to the domain
//! handlers, and shapes exactly one response per command. Error responses
//! recover the command id from the raw JSON whenever possible.

use super::{browser, browsing_context, cdp, network, script, session, storage, CommandContext};
use crate::browser::BrowserFactory;
use crate::config::Config;
use crate::events::OutgoingMessage;
use crate::target::{SharedStores, TargetRegistry};
use crate::{Error, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct RawCommand {
    id: i64,
    method: String,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    channel: Option<String>,
}

#[derive(Default)]
struct SessionState {
    session_id: Option<String>,
    context: Option<CommandContext>,
}

/// Per-connection command processor
pub struct CommandProcessor {
    config: Config,
    factory: BrowserFactory,
    stores: SharedStores,
    state: Mutex<SessionState>,
}

impl std::fmt::Debug for CommandProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandProcessor").finish()
    }
}

impl CommandProcessor {
    pub fn new(config: Config, factory: BrowserFactory, stores: SharedStores) -> Self {
        Self {
            config,
            factory,
            stores,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Bind this connection to a session id and launch its browser instance.
    pub async fn associate_session(&self, session_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.session_id.is_some() {
            return Err(Error::SessionNotCreated(
                "Session already exists on this connection".to_string(),
            ));
        }

        let browser = (self.factory)().await?;
        let registry = TargetRegistry::new(browser.transport(), self.stores.clone());
        registry.start().await?;

        info!(session = session_id, "Session established");
        state.session_id = Some(session_id.to_string());
        state.context = Some(CommandContext {
            config: self.config.clone(),
            stores: self.stores.clone(),
            registry,
            browser,
        });
        Ok(())
    }

    pub async fn session_id(&self) -> Option<String> {
        self.state.lock().await.session_id.clone()
    }

    /// Tear down the connection's resources.
    pub async fn teardown(&self) {
        let context = {
            let mut state = self.state.lock().await;
            state.session_id = None;
            state.context.take()
        };
        if let Some(context) = context {
            if let Err(e) = context.browser.close().await {
                debug!(error = %e, "Browser close during teardown failed");
            }
        }
    }

    /// Process one text frame and produce exactly one response message.
    pub async fn process_raw(&self, raw: &str) -> OutgoingMessage {
        let command: RawCommand = match serde_json::from_str(raw) {
            Ok(command) => command,
            Err(e) => {
                return Self::error_response(
                    Self::recover_id(raw),
                    Self::recover_channel(raw),
                    &Error::invalid_argument(format!("Cannot parse command: {}", e)),
                );
            }
        };

        debug!(id = command.id, method = %command.method, "Processing command");
        let result = self
            .dispatch(&command.method, command.params, command.channel.as_deref())
            .await;

        match result {
            Ok(value) => OutgoingMessage {
                payload: json!({
                    "id": command.id,
                    "type": "success",
                    "result": value,
                }),
                channel: command.channel,
                context: None,
            },
            Err(e) => Self::error_response(Some(command.id), command.channel, &e),
        }
    }

    /// The response for a non-text frame.
    pub fn invalid_frame_response(&self) -> OutgoingMessage {
        Self::error_response(
            None,
            None,
            &Error::invalid_argument("Binary frames are not supported"),
        )
    }

    fn recover_id(raw: &str) -> Option<i64> {
        serde_json::from_str::<Value>(raw)
            .ok()
            .and_then(|value| value.get("id").and_then(Value::as_i64))
    }

    fn recover_channel(raw: &str) -> Option<String> {
        serde_json::from_str::<Value>(raw)
            .ok()
            .and_then(|value| {
                value
                    .get("channel")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
    }

    fn error_response(id: Option<i64>, channel: Option<String>, error: &Error) -> OutgoingMessage {
        let mut payload = json!({
            "type": "error",
            "error": error.bidi_code(),
            "message": error.bidi_message(),
        });
        if let Some(id) = id {
            payload["id"] = json!(id);
        }
        OutgoingMessage {
            payload,
            channel,
            context: None,
        }
    }

    async fn dispatch(
        &self,
        method: &str,
        params: Value,
        channel: Option<&str>,
    ) -> Result<Value> {
        match method {
            "session.new" => return self.session_new(params).await,
            "session.status" => {
                let associated = self.state.lock().await.session_id.is_some();
                return Ok(json!({
                    "ready": !associated,
                    "message": if associated {
                        "already connected"
                    } else {
                        "ready for new sessions"
                    },
                }));
            }
            _ => {}
        }

        let context = {
            let state = self.state.lock().await;
            state.context.clone()
        };
        let Some(ctx) = context else {
            return Err(Error::InvalidSessionId(
                "No session associated with this connection".to_string(),
            ));
        };

        match method.split('.').next() {
            Some("session") => session::process(&ctx, method, params, channel).await,
            Some("browser") => browser::process(&ctx, method, params).await,
            Some("browsingContext") => browsing_context::process(&ctx, method, params).await,
            Some("script") => script::process(&ctx, method, params).await,
            Some("network") => network::process(&ctx, method, params).await,
            Some("storage") => storage::process(&ctx, method, params).await,
            Some("cdp") => cdp::process(&ctx, method, params).await,
            _ => Err(Error::UnknownCommand(method.to_string())),
        }
    }

    async fn session_new(&self, params: Value) -> Result<Value> {
        {
            let state = self.state.lock().await;
            if state.session_id.is_some() {
                return Err(Error::SessionNotCreated(
                    "Session already exists on this connection".to_string(),
                ));
            }
        }

        let capabilities = params.get("capabilities").cloned().unwrap_or(json!({}));
        let merged = session::merge_capabilities(&capabilities)?;

        let session_id = Uuid::new_v4().to_string();
        self.associate_session(&session_id).await?;

        Ok(json!({
            "sessionId": session_id,
            "capabilities": merged,
        }))
    }
}
