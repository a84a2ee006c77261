//! Event pipeline: subscriptions, fan-out, and ordered delivery

pub mod manager;
pub mod names;
pub mod queue;
pub mod subscriptions;

pub use manager::EventManager;
pub use queue::{EventQueue, EventSink};
pub use subscriptions::{Subscription, SubscriptionManager};

/// A message headed for the client socket
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    /// The JSON frame body (channel not yet attached)
    pub payload: serde_json::Value,
    /// Channel the producing subscription carried, attached verbatim at the
    /// transport boundary
    pub channel: Option<String>,
    /// Associated top-level context, if any
    pub context: Option<String>,
}
