//! Per-session CDP client handles
//!
//! A `CdpSession` binds the shared transport to one flat-mode session id so
//! callers address a single target without threading the id everywhere. The
//! browser-level handle uses no session id.

use super::traits::CdpTransport;
use super::types::CdpEvent;
use crate::Result;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A command handle scoped to one CDP session
#[derive(Clone)]
pub struct CdpSession {
    transport: Arc<dyn CdpTransport>,
    session_id: Option<String>,
}

impl std::fmt::Debug for CdpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdpSession")
            .field("session_id", &self.session_id)
            .finish()
    }
}

impl CdpSession {
    /// A handle for the browser-level session (no session id).
    pub fn browser(transport: Arc<dyn CdpTransport>) -> Self {
        Self {
            transport,
            session_id: None,
        }
    }

    /// A handle bound to a target's session id.
    pub fn for_target(transport: Arc<dyn CdpTransport>, session_id: impl Into<String>) -> Self {
        Self {
            transport,
            session_id: Some(session_id.into()),
        }
    }

    /// The session id this handle addresses, if any.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Arc<dyn CdpTransport> {
        &self.transport
    }

    /// Send a command on this session.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        self.transport
            .send_command(method, params, self.session_id.as_deref())
            .await
    }

    /// Listen to every event arriving on this session.
    pub fn events(&self) -> mpsc::UnboundedReceiver<CdpEvent> {
        self.transport.session_listener(self.session_id.as_deref())
    }
}
