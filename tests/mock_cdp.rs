//! Mock CDP WebSocket backend
//!
//! A stand-in browser for integration tests: answers the command subset the
//! translator uses and plays the auto-attach handshake, announcing one page
//! target when asked to auto-attach at the browser level.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};

pub const PAGE_TARGET_ID: &str = "PAGE-TARGET-1";
pub const PAGE_SESSION_ID: &str = "PAGE-SESSION-1";

/// Mock CDP server
pub struct MockCdpServer {
    addr: String,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl MockCdpServer {
    /// Start a new mock CDP server on an ephemeral port.
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let ws_addr = format!("ws://{}", addr);

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _peer)) => {
                                tokio::spawn(Self::handle_connection(stream));
                            }
                            Err(_) => break,
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Ok(Self {
            addr: ws_addr,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// The WebSocket endpoint URL.
    pub fn ws_endpoint(&self) -> &str {
        &self.addr
    }

    async fn handle_connection(stream: TcpStream) {
        let Ok(ws_stream) = accept_async(stream).await else {
            return;
        };
        let (mut sink, mut source) = ws_stream.split();

        while let Some(result) = source.next().await {
            let Ok(Message::Text(text)) = result else {
                match result {
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => continue,
                }
            };
            let Ok(request) = serde_json::from_str::<Value>(&text) else {
                continue;
            };

            for frame in Self::frames_for(&request) {
                if sink.send(Message::Text(frame.to_string())).await.is_err() {
                    return;
                }
            }
        }
    }

    /// Response (and any event frames) for one request.
    fn frames_for(request: &Value) -> Vec<Value> {
        let id = request.get("id").and_then(Value::as_i64).unwrap_or(0);
        let method = request.get("method").and_then(Value::as_str).unwrap_or("");
        let session_id = request.get("sessionId").and_then(Value::as_str);

        let response = |result: Value| {
            let mut frame = json!({"id": id, "result": result});
            if let Some(session) = session_id {
                frame["sessionId"] = json!(session);
            }
            frame
        };

        match method {
            // Browser-level auto-attach announces the single page target.
            "Target.setAutoAttach" if session_id.is_none() => vec![
                response(json!({})),
                json!({
                    "method": "Target.attachedToTarget",
                    "params": {
                        "sessionId": PAGE_SESSION_ID,
                        "targetInfo": {
                            "targetId": PAGE_TARGET_ID,
                            "type": "page",
                            "title": "",
                            "url": "about:blank",
                            "attached": true,
                        },
                        "waitingForDebugger": true,
                    }
                }),
            ],
            "Page.navigate" => vec![response(json!({
                "frameId": PAGE_TARGET_ID,
                "loaderId": "LOADER-1",
            }))],
            "Page.captureScreenshot" => vec![response(json!({
                "data": "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNk+M9QDwADhgGAWjR9awAAAABJRU5ErkJggg==",
            }))],
            "Page.addScriptToEvaluateOnNewDocument" => {
                vec![response(json!({"identifier": "MOCK-SCRIPT-1"}))]
            }
            "Runtime.evaluate" => vec![response(json!({
                "result": {
                    "type": "string",
                    "deepSerializedValue": {"type": "string", "value": "mock result"},
                }
            }))],
            "Storage.getCookies" => vec![response(json!({"cookies": []}))],
            "Browser.getVersion" => vec![response(json!({
                "protocolVersion": "1.3",
                "product": "Chrome/mock",
                "userAgent": "Mozilla/5.0 (Mock)",
                "jsVersion": "12.0",
            }))],
            "Browser.close" => vec![response(json!({}))],
            // Everything else (domain enables and the like) succeeds empty.
            _ => vec![response(json!({}))],
        }
    }
}

impl Drop for MockCdpServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[tokio::test]
async fn mock_cdp_startup() {
    let server = MockCdpServer::start().await.unwrap();
    assert!(server.ws_endpoint().starts_with("ws://127.0.0.1:"));
}
