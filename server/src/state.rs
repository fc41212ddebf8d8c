//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor and
//! cloned into every session task. It holds the typed config, the registry
//! adapter over the coordination store, and the notification hub.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::services::hub::Hub;
use crate::services::registry::Registry;

/// Clone is required by Axum; all inner fields are Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<Registry>,
    pub hub: Arc<Hub>,
}

impl AppState {
    #[must_use]
    pub fn new(config: ServerConfig, registry: Arc<Registry>, hub: Arc<Hub>) -> Self {
        Self { config: Arc::new(config), registry, hub }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
