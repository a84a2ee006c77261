//! CDP transport trait
//!
//! The seam between everything above the wire and the socket itself. The
//! production implementation is `CdpConnection`; unit tests drive the full
//! pipeline through `MockCdpTransport`.

use super::types::CdpEvent;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

/// A connection capable of sending CDP commands and delivering CDP events
#[async_trait]
pub trait CdpTransport: Send + Sync + std::fmt::Debug {
    /// Send a CDP command on an optional session and await its result
    async fn send_command(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value>;

    /// Subscribe to every event on the connection
    fn wildcard_listener(&self) -> mpsc::UnboundedReceiver<CdpEvent>;

    /// Subscribe to events arriving on one session (None = browser-level)
    fn session_listener(&self, session_id: Option<&str>) -> mpsc::UnboundedReceiver<CdpEvent>;

    /// Close the connection
    fn close(&self);

    /// Check if connection is active
    fn is_active(&self) -> bool;
}
