//! Browser instance boundary
//!
//! Launching a browser process is a collaborator's job; this module only
//! knows how to reach a running browser's CDP endpoint, hand out the shared
//! transport, and tear the instance down. Each WebSocket connection gets a
//! fresh instance from a `BrowserFactory`.

use crate::cdp::{CdpConnection, CdpSession, CdpTransport};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// A running browser reachable over CDP
#[async_trait]
pub trait BrowserInstance: Send + Sync + std::fmt::Debug {
    /// The shared CDP transport for this instance
    fn transport(&self) -> Arc<dyn CdpTransport>;

    /// Close the browser and the connection
    async fn close(&self) -> Result<()>;
}

/// Creates one browser instance per client connection
pub type BrowserFactory =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Arc<dyn BrowserInstance>>> + Send + Sync>;

/// A browser reached through an existing CDP endpoint
#[derive(Debug)]
pub struct RemoteBrowser {
    transport: Arc<CdpConnection>,
}

impl RemoteBrowser {
    /// Connect to a browser's debugging endpoint (`ws://host:port` or
    /// `http://host:port`); the WebSocket URL is discovered via
    /// `/json/version`.
    pub async fn connect(endpoint: &str) -> Result<Arc<Self>> {
        let ws_url = if endpoint.contains("/devtools/") {
            endpoint.to_string()
        } else {
            Self::discover_ws_url(endpoint).await?
        };

        info!("Connecting browser instance at {}", ws_url);
        let transport = CdpConnection::connect(&ws_url).await?;
        Ok(Arc::new(Self { transport }))
    }

    async fn discover_ws_url(endpoint: &str) -> Result<String> {
        let http_endpoint = endpoint
            .replace("ws://", "http://")
            .replace("wss://", "https://");
        let url = format!("{}/json/version", http_endpoint.trim_end_matches('/'));

        let response = reqwest::get(&url)
            .await
            .map_err(|e| Error::unknown(format!("Failed to reach browser: {}", e)))?;
        let version: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::unknown(format!("Bad /json/version payload: {}", e)))?;

        version
            .get("webSocketDebuggerUrl")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::unknown("Browser did not advertise a WebSocket URL"))
    }
}

#[async_trait]
impl BrowserInstance for RemoteBrowser {
    fn transport(&self) -> Arc<dyn CdpTransport> {
        self.transport.clone()
    }

    async fn close(&self) -> Result<()> {
        let session = CdpSession::browser(self.transport.clone());
        // The browser may die before answering; that is a successful close.
        match session.send_command("Browser.close", json!({})).await {
            Ok(_) => {}
            Err(e) if e.is_close_error() => {}
            Err(e) => return Err(e),
        }
        self.transport.close();
        Ok(())
    }
}

/// A factory connecting to a fixed endpoint for every session.
pub fn remote_factory(endpoint: String) -> BrowserFactory {
    Arc::new(move || {
        let endpoint = endpoint.clone();
        Box::pin(async move {
            let browser = RemoteBrowser::connect(&endpoint).await?;
            Ok(browser as Arc<dyn BrowserInstance>)
        })
    })
}

/// A factory wrapping an existing transport (tests and embedding).
pub fn transport_factory(transport: Arc<dyn CdpTransport>) -> BrowserFactory {
    Arc::new(move || {
        let transport = transport.clone();
        Box::pin(async move {
            Ok(Arc::new(TransportBrowser { transport }) as Arc<dyn BrowserInstance>)
        })
    })
}

/// Browser instance backed by a pre-built transport
#[derive(Debug)]
pub struct TransportBrowser {
    transport: Arc<dyn CdpTransport>,
}

#[async_trait]
impl BrowserInstance for TransportBrowser {
    fn transport(&self) -> Arc<dyn CdpTransport> {
        self.transport.clone()
    }

    async fn close(&self) -> Result<()> {
        let session = CdpSession::browser(self.transport.clone());
        match session.send_command("Browser.close", json!({})).await {
            Ok(_) => {}
            Err(e) if e.is_close_error() => {}
            Err(e) => return Err(e),
        }
        self.transport.close();
        Ok(())
    }
}
