//! CDP (Chrome DevTools Protocol) layer
//!
//! One WebSocket to the browser, flat-mode session multiplexing on top.

pub mod client;
pub mod connection;
pub mod mock;
pub mod traits;
pub mod types;

pub use client::CdpSession;
pub use connection::CdpConnection;
pub use traits::CdpTransport;
pub use types::CdpEvent;
