//! HTTP + WebSocket front end
//!
//! `POST /session` mints a session id and advertises its WebSocket URL; a
//! WebSocket connect to `/session/<id>` establishes the session and launches
//! a fresh browser instance for that connection. Any other `/session...`
//! path answers `{"value": {}}`; everything else is a 404.

use crate::browser::BrowserFactory;
use crate::config::Config;
use crate::server::bidi::BidiServer;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

struct AppState {
    config: Config,
    factory: BrowserFactory,
    /// Session ids minted over HTTP and not yet bound to a socket
    pending_sessions: Mutex<HashSet<String>>,
    advertised_host: String,
}

/// Handle to a running front end
pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    join: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.join.await;
    }
}

/// Bind and serve. Returns once the listener is up.
pub async fn start(config: Config, factory: BrowserFactory) -> crate::Result<ServerHandle> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| crate::Error::configuration(format!("Bad listen address: {}", e)))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;

    let state = Arc::new(AppState {
        advertised_host: format!("{}", local_addr),
        config,
        factory,
        pending_sessions: Mutex::new(HashSet::new()),
    });

    let router = Router::new()
        .route("/session", post(create_session).get(ws_unassociated))
        .route("/session/:id", get(ws_session))
        .fallback(fallback)
        .with_state(state);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let graceful =
        axum::serve(listener, router.into_make_service()).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });

    info!("BiDi server listening on {}", local_addr);
    let join = tokio::spawn(async move {
        if let Err(e) = graceful.await {
            warn!(error = %e, "HTTP server error");
        }
    });

    Ok(ServerHandle {
        addr: local_addr,
        shutdown_tx,
        join,
    })
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    body: Option<Json<serde_json::Value>>,
) -> Json<serde_json::Value> {
    let _ = body;
    let session_id = Uuid::new_v4().to_string();
    state
        .pending_sessions
        .lock()
        .expect("session set poisoned")
        .insert(session_id.clone());

    let ws_url = format!("ws://{}/session/{}", state.advertised_host, session_id);
    info!(session = %session_id, "Session created over HTTP");

    Json(json!({
        "value": {
            "sessionId": session_id,
            "capabilities": {
                "webSocketUrl": ws_url,
            },
        }
    }))
}

/// Any other `/session...` path.
async fn fallback(uri: Uri) -> Response {
    if uri.path().starts_with("/session") {
        return Json(json!({"value": {}})).into_response();
    }
    StatusCode::NOT_FOUND.into_response()
}

async fn ws_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| async move {
        let known = state
            .pending_sessions
            .lock()
            .expect("session set poisoned")
            .remove(&session_id);
        let bound = known.then_some(session_id);
        run_connection(state, socket, bound).await;
    })
}

async fn ws_unassociated(
    State(state): State<Arc<AppState>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| run_connection(state, socket, None))
}

/// Drive one WebSocket connection through its BidiServer.
async fn run_connection(state: Arc<AppState>, socket: WebSocket, session_id: Option<String>) {
    let (server, mut outgoing_rx) = BidiServer::new(state.config.clone(), state.factory.clone());

    // A fresh browser instance per connection.
    if let Some(session_id) = &session_id {
        if let Err(e) = server.associate_session(session_id).await {
            warn!(error = %e, "Failed to establish session; closing socket");
            return;
        }
    }

    let (mut ws_sink, mut ws_source) = socket.split();

    // Writer: the queue's ordered output is the only producer of frames.
    let writer = tokio::spawn(async move {
        while let Some(frame) = outgoing_rx.recv().await {
            let text = frame.to_string();
            if ws_sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Reader: one command at a time preserves per-session processing order.
    while let Some(result) = ws_source.next().await {
        match result {
            Ok(Message::Text(text)) => server.handle_text(&text).await,
            Ok(Message::Binary(_)) => server.handle_non_text(),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "WebSocket read error");
                break;
            }
        }
    }

    // Connection gone: drop queued-but-unsent frames and the browser.
    writer.abort();
    server.close().await;
}
