//! Server state

use std::sync::Arc;

use crate::app::options::{Connector, ServerOptions};
use crate::server::registry::Registry;
use crate::storage::settings::Settings;

/// Server state shared across handlers
pub struct ServerState {
    pub settings: Arc<Settings>,
    pub options: ServerOptions,
    pub connector: Connector,
    pub registry: Arc<Registry>,
}

impl ServerState {
    pub fn new(settings: Arc<Settings>, options: ServerOptions, connector: Connector) -> Self {
        let registry = Arc::new(Registry::new(options.history_limit));
        Self {
            settings,
            options,
            connector,
            registry,
        }
    }
}
