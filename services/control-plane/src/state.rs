//! Application state shared across request handlers.

use std::sync::Arc;

use keel_store::Store;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    store: Arc<Store>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Get a reference to the object store.
    pub fn store(&self) -> &Store {
        &self.store
    }
}
