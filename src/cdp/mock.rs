//! Mock CDP transport for testing
//!
//! Records every sent command, answers from scripted responses (empty object
//! by default), and lets tests push events into the listener plumbing exactly
//! as the real connection would.

use super::traits::CdpTransport;
use super::types::CdpEvent;
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// A command the mock has seen
#[derive(Debug, Clone)]
pub struct RecordedCommand {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

#[derive(Default)]
struct MockListeners {
    wildcard: Vec<mpsc::UnboundedSender<CdpEvent>>,
    by_session: HashMap<Option<String>, Vec<mpsc::UnboundedSender<CdpEvent>>>,
}

/// Mock CDP transport
#[derive(Default)]
pub struct MockCdpTransport {
    commands: Mutex<Vec<RecordedCommand>>,
    responses: Mutex<HashMap<String, Result<Value>>>,
    listeners: Mutex<MockListeners>,
    closed: AtomicBool,
}

impl std::fmt::Debug for MockCdpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockCdpTransport").finish()
    }
}

impl MockCdpTransport {
    /// Create a new mock transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the response for one method (latest scripting wins).
    pub fn respond_with(&self, method: &str, response: Result<Value>) {
        self.responses
            .lock()
            .expect("responses lock poisoned")
            .insert(method.to_string(), response);
    }

    /// Every command sent so far, in order.
    pub fn sent(&self) -> Vec<RecordedCommand> {
        self.commands.lock().expect("commands lock poisoned").clone()
    }

    /// The methods sent so far, in order.
    pub fn sent_methods(&self) -> Vec<String> {
        self.sent().into_iter().map(|c| c.method).collect()
    }

    /// Push an event into the listener plumbing.
    pub fn emit(&self, method: &str, params: Value, session_id: Option<&str>) {
        let event = CdpEvent {
            method: method.to_string(),
            params,
            session_id: session_id.map(str::to_string),
        };
        let mut guard = self.listeners.lock().expect("listeners lock poisoned");
        guard.wildcard.retain(|tx| tx.send(event.clone()).is_ok());
        if let Some(list) = guard.by_session.get_mut(&event.session_id) {
            list.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}

#[async_trait]
impl CdpTransport for MockCdpTransport {
    async fn send_command(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::CdpClosed("mock transport closed".to_string()));
        }

        self.commands
            .lock()
            .expect("commands lock poisoned")
            .push(RecordedCommand {
                method: method.to_string(),
                params,
                session_id: session_id.map(str::to_string),
            });

        let mut responses = self.responses.lock().expect("responses lock poisoned");
        match responses.remove(method) {
            Some(response) => response,
            None => Ok(json!({})),
        }
    }

    fn wildcard_listener(&self) -> mpsc::UnboundedReceiver<CdpEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners
            .lock()
            .expect("listeners lock poisoned")
            .wildcard
            .push(tx);
        rx
    }

    fn session_listener(&self, session_id: Option<&str>) -> mpsc::UnboundedReceiver<CdpEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners
            .lock()
            .expect("listeners lock poisoned")
            .by_session
            .entry(session_id.map(str::to_string))
            .or_default()
            .push(tx);
        rx
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_active(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::client::CdpSession;
    use std::sync::Arc;

    #[tokio::test]
    async fn records_commands_and_answers() {
        let mock = Arc::new(MockCdpTransport::new());
        mock.respond_with("Browser.getVersion", Ok(json!({"product": "Chrome/i"})));

        let session = CdpSession::browser(mock.clone());
        let version = session
            .send_command("Browser.getVersion", Value::Null)
            .await
            .unwrap();
        assert_eq!(version["product"], "Chrome/i");

        let other = session.send_command("Target.getTargets", Value::Null).await.unwrap();
        assert_eq!(other, json!({}));

        assert_eq!(mock.sent_methods(), vec!["Browser.getVersion", "Target.getTargets"]);
    }

    #[tokio::test]
    async fn emits_to_session_listeners() {
        let mock = Arc::new(MockCdpTransport::new());
        let session = CdpSession::for_target(mock.clone(), "S1");
        let mut events = session.events();

        mock.emit("Page.lifecycleEvent", json!({"name": "load"}), Some("S1"));
        mock.emit("Page.lifecycleEvent", json!({"name": "load"}), Some("S2"));

        let got = events.recv().await.unwrap();
        assert_eq!(got.session_id.as_deref(), Some("S1"));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_transport_fails_with_close_error() {
        let mock = Arc::new(MockCdpTransport::new());
        mock.close();
        let session = CdpSession::browser(mock);
        let err = session
            .send_command("Page.enable", Value::Null)
            .await
            .unwrap_err();
        assert!(err.is_close_error());
    }
}
