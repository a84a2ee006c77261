//! Command dispatch: the processor and the per-domain handlers

pub mod browser;
pub mod browsing_context;
pub mod cdp;
pub mod network;
pub mod processor;
pub mod script;
pub mod session;
pub mod storage;

pub use processor::CommandProcessor;

use crate::browser::BrowserInstance;
use crate::config::Config;
use crate::target::{SharedStores, TargetRegistry};
use std::sync::Arc;

/// Everything a domain handler needs once a session is established
#[derive(Clone)]
pub struct CommandContext {
    pub config: Config,
    pub stores: SharedStores,
    pub registry: Arc<TargetRegistry>,
    pub browser: Arc<dyn BrowserInstance>,
}

impl std::fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandContext").finish()
    }
}
