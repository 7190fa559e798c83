//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the store behind a trait object (so handlers are testable
//! against a mock) and the broadcast dispatcher as an explicitly
//! constructed instance — there is no process-global broadcast handle.

use std::sync::Arc;

use crate::broadcast::Broadcaster;
use crate::services::store::ChatStore;

/// Shared application state, injected into Axum handlers via the `State`
/// extractor. Clone is required by Axum; all inner fields are cheap clones.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ChatStore>,
    pub broadcaster: Broadcaster,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn ChatStore>, broadcaster: Broadcaster) -> Self {
        Self { store, broadcaster }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
