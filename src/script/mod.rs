//! Script domain plumbing: preload scripts, shared ids, channel proxies

pub mod channel;
pub mod preload;
pub mod shared_id;

pub use channel::ChannelPollerRegistry;
pub use preload::{ChannelProperties, PreloadScript, PreloadScriptStore};
pub use shared_id::{get_shared_id, parse_shared_id, SharedId};
