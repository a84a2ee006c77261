//! Outgoing event queue
//!
//! Preserves the order in which payload futures were registered, not the
//! order in which they complete. Each registered future is spawned
//! immediately so slow payloads make progress while the head of the queue
//! drains; the consumer awaits slots strictly in registration order. A
//! failed slot is logged with its tag and skipped without back-pressure.

use crate::Result;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::OutgoingMessage;

/// Async sink receiving messages in registration order
pub type EventSink = Arc<dyn Fn(OutgoingMessage) -> BoxFuture<'static, ()> + Send + Sync>;

struct Slot {
    handle: JoinHandle<Result<OutgoingMessage>>,
    tag: String,
}

/// Registration-ordered queue of outgoing messages
pub struct EventQueue {
    slots_tx: mpsc::UnboundedSender<Slot>,
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue").finish()
    }
}

impl EventQueue {
    /// Create a queue draining into `sink`.
    pub fn new(sink: EventSink) -> Self {
        let (slots_tx, mut slots_rx) = mpsc::unbounded_channel::<Slot>();

        tokio::spawn(async move {
            while let Some(slot) = slots_rx.recv().await {
                match slot.handle.await {
                    Ok(Ok(message)) => sink(message).await,
                    Ok(Err(e)) => {
                        // Skipped slots never disturb the order of later ones.
                        debug!(tag = %slot.tag, error = %e, "Dropping queued event");
                    }
                    Err(e) => {
                        warn!(tag = %slot.tag, error = %e, "Queued event task failed");
                    }
                }
            }
        });

        Self { slots_tx }
    }

    /// Register a payload future. Delivery order is the order of `add` calls.
    pub fn add<F>(&self, future: F, tag: impl Into<String>)
    where
        F: Future<Output = Result<OutgoingMessage>> + Send + 'static,
    {
        let slot = Slot {
            handle: tokio::spawn(future),
            tag: tag.into(),
        };
        // A dropped receiver means the connection is gone; queued events for
        // it are discarded by design.
        let _ = self.slots_tx.send(slot);
    }

    /// Register an already-resolved message.
    pub fn add_ready(&self, message: OutgoingMessage, tag: impl Into<String>) {
        self.add(async move { Ok(message) }, tag);
    }
}
