//! bidi-oxide server entry point
//!
//! Presents a WebDriver BiDi interface over HTTP + WebSocket and drives a
//! browser through the Chrome DevTools Protocol.
//!
//! ## Environment variables
//! - `BIDI_HOST`: listen address (default: 127.0.0.1)
//! - `BIDI_PORT`: listen port (default: 8080)
//! - `BIDI_HEADLESS`: run the browser headless (default: true)
//! - `BIDI_CHANNEL`: Chrome release channel (stable|beta|dev|canary)
//! - `BIDI_VERBOSE`: verbose protocol logging
//! - `BIDI_CDP_ENDPOINT`: CDP endpoint of the browser launcher
//!   (default: ws://localhost:9222)

use bidi_oxide::browser::remote_factory;
use bidi_oxide::config::Config;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration first; the verbose flag feeds the log level.
    let config = Config::from_env()?;

    let log_level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|v| v.parse::<Level>().ok())
        .unwrap_or(if config.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        });

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    info!("bidi-oxide v{}", bidi_oxide::VERSION);
    info!(
        "Configuration loaded: host={}, port={}, headless={}, channel={:?}",
        config.host, config.port, config.headless, config.channel
    );

    // The browser launcher is a collaborator; we reach whatever endpoint it
    // exposes and open one instance per client connection.
    let cdp_endpoint =
        std::env::var("BIDI_CDP_ENDPOINT").unwrap_or_else(|_| "ws://localhost:9222".to_string());
    let factory = remote_factory(cdp_endpoint);

    let handle = bidi_oxide::server::start(config, factory).await?;
    info!("Serving WebDriver BiDi on {}", handle.addr);

    // Graceful shutdown on SIGINT/SIGTERM.
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM signal"),
            _ = sigint.recv() => info!("Received SIGINT signal"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C signal");
    }

    handle.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}
