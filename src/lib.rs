//! bidi-oxide: WebDriver BiDi server backed by the Chrome DevTools Protocol
//!
//! This library presents a WebDriver BiDi interface (HTTP + WebSocket) to
//! clients and drives a single browser instance through flat-mode CDP
//! multiplexing: commands fan in through the command processor, CDP events
//! fan out through the subscription-aware event pipeline.

pub mod error;
pub mod config;

pub mod browser;
pub mod cdp;
pub mod commands;
pub mod context;
pub mod events;
pub mod network;
pub mod script;
pub mod server;
pub mod target;

// Re-exports
pub use error::{Error, Result};

/// bidi-oxide library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
