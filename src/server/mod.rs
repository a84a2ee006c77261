//! BiDi server: per-connection core and the HTTP/WebSocket front end

pub mod bidi;
pub mod http;

pub use bidi::BidiServer;
pub use http::{start, ServerHandle};
