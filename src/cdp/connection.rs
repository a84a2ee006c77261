//! CDP WebSocket connection
//!
//! One WebSocket to the browser, multiplexing every attached target through
//! flat-mode session ids. Commands are correlated to responses through an
//! atomic id counter and a pending map; events fan out to wildcard listeners
//! and to per-session listeners.

use super::traits::CdpTransport;
use super::types::{CdpEvent, CdpNotification, CdpRequest, CdpRpcResponse};
use crate::{Error, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Pending command response slot
struct PendingCommand {
    sender: oneshot::Sender<Result<serde_json::Value>>,
    /// Command method (for logging)
    method: String,
}

/// Event listener registry
#[derive(Default)]
struct Listeners {
    /// Receive every event regardless of session
    wildcard: Vec<mpsc::UnboundedSender<CdpEvent>>,
    /// Receive only events for one session (key None = browser-level)
    by_session: HashMap<Option<String>, Vec<mpsc::UnboundedSender<CdpEvent>>>,
}

/// CDP WebSocket connection
pub struct CdpConnection {
    /// Outbound frames serialized through the writer task
    writer_tx: mpsc::UnboundedSender<Message>,
    /// Next command ID
    next_id: AtomicU64,
    /// Pending commands (ID -> response sender)
    pending: Arc<Mutex<HashMap<u64, PendingCommand>>>,
    /// Event listeners
    listeners: Arc<Mutex<Listeners>>,
    /// Is connection active
    is_active: Arc<AtomicBool>,
}

impl std::fmt::Debug for CdpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdpConnection")
            .field("active", &self.is_active())
            .finish()
    }
}

impl CdpConnection {
    /// Connect to a browser CDP WebSocket endpoint.
    pub async fn connect(url: &str) -> Result<Arc<Self>> {
        info!("Connecting to CDP endpoint {}", url);

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::websocket(format!("Failed to connect: {}", e)))?;

        let (mut ws_sink, mut ws_source) = ws_stream.split();
        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Message>();

        let connection = Arc::new(Self {
            writer_tx,
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            listeners: Arc::new(Mutex::new(Listeners::default())),
            is_active: Arc::new(AtomicBool::new(true)),
        });

        // Writer task: the single place outbound frames touch the socket.
        let writer_active = Arc::clone(&connection.is_active);
        tokio::spawn(async move {
            while let Some(message) = writer_rx.recv().await {
                if let Err(e) = ws_sink.send(message).await {
                    error!("CDP write failed: {}", e);
                    break;
                }
            }
            writer_active.store(false, Ordering::SeqCst);
        });

        // Reader task: dispatch responses and events until the socket closes.
        let pending = Arc::clone(&connection.pending);
        let listeners = Arc::clone(&connection.listeners);
        let is_active = Arc::clone(&connection.is_active);
        let writer = connection.writer_tx.clone();
        tokio::spawn(async move {
            while let Some(result) = ws_source.next().await {
                match result {
                    Ok(Message::Text(text)) => {
                        Self::handle_frame(&text, &pending, &listeners);
                    }
                    Ok(Message::Ping(data)) => {
                        let _ = writer.send(Message::Pong(data));
                    }
                    Ok(Message::Close(_)) => {
                        info!("CDP socket sent close frame");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("CDP socket error: {}", e);
                        break;
                    }
                }
            }

            is_active.store(false, Ordering::SeqCst);

            // Every in-flight command resolves with a close-error.
            let drained: Vec<PendingCommand> = {
                let mut map = pending.lock().expect("pending lock poisoned");
                map.drain().map(|(_, cmd)| cmd).collect()
            };
            for cmd in drained {
                debug!("Resolving {} with close-error after disconnect", cmd.method);
                let _ = cmd
                    .sender
                    .send(Err(Error::CdpClosed("connection closed".to_string())));
            }
            listeners.lock().expect("listener lock poisoned").wildcard.clear();
        });

        Ok(connection)
    }

    fn handle_frame(
        text: &str,
        pending: &Arc<Mutex<HashMap<u64, PendingCommand>>>,
        listeners: &Arc<Mutex<Listeners>>,
    ) {
        if let Ok(response) = serde_json::from_str::<CdpRpcResponse>(text) {
            let slot = {
                let mut map = pending.lock().expect("pending lock poisoned");
                map.remove(&response.id)
            };
            match slot {
                Some(cmd) => {
                    debug!(id = response.id, method = %cmd.method, "CDP response");
                    let outcome = match response.error {
                        Some(err) => Err(Error::cdp(err.code, err.message)),
                        None => Ok(response.result),
                    };
                    let _ = cmd.sender.send(outcome);
                }
                None => warn!("Response for unknown command ID {}", response.id),
            }
            return;
        }

        if let Ok(notification) = serde_json::from_str::<CdpNotification>(text) {
            let event = CdpEvent {
                method: notification.method,
                params: notification.params,
                session_id: notification.session_id,
            };
            Self::dispatch_event(event, listeners);
            return;
        }

        warn!("Unknown CDP frame: {}", text);
    }

    fn dispatch_event(event: CdpEvent, listeners: &Arc<Mutex<Listeners>>) {
        let mut guard = listeners.lock().expect("listener lock poisoned");
        guard.wildcard.retain(|tx| tx.send(event.clone()).is_ok());
        if let Some(list) = guard.by_session.get_mut(&event.session_id) {
            list.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}

#[async_trait]
impl CdpTransport for CdpConnection {
    /// Send a CDP command on an optional session and await its result.
    async fn send_command(
        &self,
        method: &str,
        params: serde_json::Value,
        session_id: Option<&str>,
    ) -> Result<serde_json::Value> {
        if !self.is_active.load(Ordering::SeqCst) {
            return Err(Error::CdpClosed("connection is not active".to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = CdpRequest {
            id,
            method: method.to_string(),
            params: if params.is_null() { None } else { Some(params) },
            session_id: session_id.map(str::to_string),
        };
        let json = serde_json::to_string(&request)?;

        debug!(id, method, session = ?session_id, "Sending CDP command");

        let (sender, receiver) = oneshot::channel();
        {
            let mut pending = self.pending.lock().expect("pending lock poisoned");
            pending.insert(
                id,
                PendingCommand {
                    sender,
                    method: method.to_string(),
                },
            );
        }

        if self.writer_tx.send(Message::Text(json)).is_err() {
            let mut pending = self.pending.lock().expect("pending lock poisoned");
            pending.remove(&id);
            return Err(Error::CdpClosed("connection closed".to_string()));
        }

        match receiver.await {
            Ok(result) => result,
            Err(_) => Err(Error::CdpClosed("connection closed".to_string())),
        }
    }

    /// Subscribe to every event on the connection.
    fn wildcard_listener(&self) -> mpsc::UnboundedReceiver<CdpEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners
            .lock()
            .expect("listener lock poisoned")
            .wildcard
            .push(tx);
        rx
    }

    /// Subscribe to events arriving on one session (None = browser-level).
    fn session_listener(&self, session_id: Option<&str>) -> mpsc::UnboundedReceiver<CdpEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners
            .lock()
            .expect("listener lock poisoned")
            .by_session
            .entry(session_id.map(str::to_string))
            .or_default()
            .push(tx);
        rx
    }

    /// Close the connection.
    fn close(&self) {
        info!("Closing CDP connection");
        self.is_active.store(false, Ordering::SeqCst);
        let _ = self.writer_tx.send(Message::Close(None));
    }

    /// Check if connection is active
    fn is_active(&self) -> bool {
        self.is_active.load(Ordering::SeqCst)
    }
}
